//! Condition engine: ordered, first-true-wins visibility rules.
//!
//! A conditional element is visible when one of its conditions reduces to a
//! truthy value. Conditions are tried in order and evaluation stops at the
//! first match, so later conditions never touch their sources. A condition
//! that fails to evaluate counts as false; when every condition fails the
//! element fails open and stays visible.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::calc::{reduce_steps, ConditionOperation, EvalGuard, Step, StepSource};
use crate::dom::{ElementData, Properties, RenderType};
use crate::env::EvaluationEnvironment;
use crate::error::{EngineError, Result};

/// One visibility rule with optional property overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step<ConditionOperation>>,
    /// Merged into the element's properties when this condition matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

impl Condition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn step(mut self, source: StepSource) -> Self {
        self.steps.push(Step::first(source));
        self
    }

    pub fn then(mut self, op: ConditionOperation, source: StepSource) -> Self {
        self.steps.push(Step::then(op, source));
        self
    }

    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// Reduce a condition's steps and read the result as a boolean.
pub fn evaluate_condition(condition: &Condition, env: &EvaluationEnvironment<'_>) -> Result<bool> {
    let mut guard = EvalGuard::new(env.config.max_depth);
    reduce_steps(&condition.steps, env, &mut guard).map(|value| value.is_truthy())
}

/// Visibility decision for one element.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionOutcome {
    pub visible: bool,
    /// Index of the first condition that held.
    pub matched_index: Option<usize>,
    /// Conditions that failed to evaluate before the decision was made.
    pub failures: Vec<EngineError>,
}

impl ConditionOutcome {
    fn shown() -> Self {
        Self {
            visible: true,
            matched_index: None,
            failures: Vec::new(),
        }
    }

    /// The error to report for this element, if any condition failed.
    pub fn error(&self) -> Option<EngineError> {
        let first = self.failures.first()?;
        if self.visible && self.matched_index.is_none() {
            return Some(EngineError::ConditionEvaluation {
                count: self.failures.len(),
                first: first.to_string(),
            });
        }
        Some(first.clone())
    }
}

/// Decide whether `element` is visible and which condition matched.
pub fn evaluate_element(element: &ElementData, env: &EvaluationEnvironment<'_>) -> ConditionOutcome {
    if element.render_type == RenderType::Fixed || element.conditions.is_empty() {
        return ConditionOutcome::shown();
    }
    let env = env.scoped_to(element);
    let mut failures = Vec::new();
    for (index, condition) in element.conditions.iter().enumerate() {
        match evaluate_condition(condition, &env) {
            Ok(true) => {
                trace!(element = %element.id, index, "condition matched");
                return ConditionOutcome {
                    visible: true,
                    matched_index: Some(index),
                    failures,
                };
            }
            Ok(false) => {}
            Err(err) => {
                warn!(element = %element.id, index, error = %err, "condition failed");
                failures.push(err);
            }
        }
    }
    // Fail open only when nothing evaluated cleanly.
    let visible = failures.len() == element.conditions.len();
    ConditionOutcome {
        visible,
        matched_index: None,
        failures,
    }
}
