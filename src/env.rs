//! The evaluation environment threaded through every resolver call.
//!
//! [`EvaluationEnvironment`] bundles read access to the expanded tree, the
//! calculation table, the selection store, loaded query results, and the
//! environment facts, plus the row context and page parameters in scope for
//! the element being evaluated.

use std::collections::HashMap;
use std::rc::Rc;

use chrono::{DateTime, Utc};

use crate::calc::CalculationTable;
use crate::config::{EngineConfig, Viewport};
use crate::dom::{ElementData, ElementTree, Parameters, RepeatingContext};
use crate::selection::ActiveSelectionStore;
use crate::source::QueryCache;

// ---------------------------------------------------------------------------
// InputValues
// ---------------------------------------------------------------------------

/// Pull-based access to the live value of input elements.
pub trait InputValues {
    /// Current value of the input with the given id, if the host knows it.
    fn current_value(&self, element_id: &str) -> Option<String>;
}

/// Host with no live inputs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInputs;

impl InputValues for NoInputs {
    fn current_value(&self, _element_id: &str) -> Option<String> {
        None
    }
}

impl InputValues for HashMap<String, String> {
    fn current_value(&self, element_id: &str) -> Option<String> {
        self.get(element_id).cloned()
    }
}

impl<T: InputValues + ?Sized> InputValues for Rc<T> {
    fn current_value(&self, element_id: &str) -> Option<String> {
        (**self).current_value(element_id)
    }
}

static NO_INPUTS: NoInputs = NoInputs;

// ---------------------------------------------------------------------------
// EnvironmentFacts
// ---------------------------------------------------------------------------

/// Facts read by `timestamp`, `screen_width`, and `screen_height` steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentFacts {
    pub viewport: Viewport,
    pub now: DateTime<Utc>,
}

impl EnvironmentFacts {
    pub fn new(viewport: Viewport, now: DateTime<Utc>) -> Self {
        Self { viewport, now }
    }

    /// Facts for the current instant.
    pub fn current(viewport: Viewport) -> Self {
        Self::new(viewport, Utc::now())
    }
}

// ---------------------------------------------------------------------------
// EvaluationEnvironment
// ---------------------------------------------------------------------------

/// Everything a step may read while it is being resolved.
#[derive(Clone)]
pub struct EvaluationEnvironment<'a> {
    pub tree: &'a ElementTree,
    pub calculations: &'a CalculationTable,
    pub selections: &'a ActiveSelectionStore,
    pub queries: &'a QueryCache,
    pub facts: &'a EnvironmentFacts,
    pub config: &'a EngineConfig,
    pub inputs: &'a dyn InputValues,
    /// Row context of the element being evaluated.
    pub context: Option<Rc<RepeatingContext>>,
    /// Parameters of the enclosing page.
    pub parameters: Option<Rc<Parameters>>,
}

impl<'a> EvaluationEnvironment<'a> {
    pub fn new(
        tree: &'a ElementTree,
        calculations: &'a CalculationTable,
        selections: &'a ActiveSelectionStore,
        queries: &'a QueryCache,
        facts: &'a EnvironmentFacts,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            tree,
            calculations,
            selections,
            queries,
            facts,
            config,
            inputs: &NO_INPUTS,
            context: None,
            parameters: None,
        }
    }

    /// Use the given live input values (builder).
    pub fn with_inputs(mut self, inputs: &'a dyn InputValues) -> Self {
        self.inputs = inputs;
        self
    }

    /// Evaluate inside the given row context (builder).
    pub fn with_context(mut self, context: Option<Rc<RepeatingContext>>) -> Self {
        self.context = context;
        self
    }

    /// Evaluate with the given page parameters (builder).
    pub fn with_parameters(mut self, parameters: Option<Rc<Parameters>>) -> Self {
        self.parameters = parameters;
        self
    }

    /// A copy scoped to an element's row context and page parameters.
    pub fn scoped_to(&self, element: &ElementData) -> Self {
        Self {
            context: element.context().cloned(),
            parameters: element.parameters.clone(),
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for EvaluationEnvironment<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationEnvironment")
            .field("elements", &self.tree.len())
            .field("calculations", &self.calculations.len())
            .field("context", &self.context.as_ref().map(|c| &c.container_id))
            .field("parameters", &self.parameters)
            .finish()
    }
}
