//! Screen session: the evaluation pipeline and its state machine.
//!
//! A [`Session`] owns everything that lives as long as one screen display:
//! the app definition, the selection store, the query cache, and the latest
//! render. Each trigger bumps a generation counter and runs the pipeline
//!
//! ```text
//! Idle -> Loading -> Expanding -> ConditionsResolved -> CalculationsResolved -> Rendered
//! ```
//!
//! Loading is the only phase that awaits. A run that finds the counter moved
//! on after an await stops and reports itself superseded, so the last trigger
//! is the one whose render is committed.

use std::cell::{Cell, Ref, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace, warn};

use crate::calc::{render_text, StepSource};
use crate::condition::{evaluate_element, Condition, ConditionOutcome};
use crate::config::{EngineConfig, Viewport};
use crate::dom::{
    AppDefinition, ContainerType, ContentType, Element, ElementId, ElementTree, ScreenDefinition,
};
use crate::env::{EnvironmentFacts, EvaluationEnvironment, InputValues, NoInputs};
use crate::error::EngineError;
use crate::expand::Expander;
use crate::selection::ActiveSelectionStore;
use crate::source::{QueryCache, QueryKey, RowSource};

// ---------------------------------------------------------------------------
// Phase / Trigger
// ---------------------------------------------------------------------------

/// Pipeline state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Expanding,
    ConditionsResolved,
    CalculationsResolved,
    Rendered,
}

/// What caused a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    ScreenChange(String),
    TabSelection { container_id: String, index: usize },
    /// Re-run with an empty query cache.
    Refresh,
}

// ---------------------------------------------------------------------------
// RenderOutput
// ---------------------------------------------------------------------------

/// A committed render: the evaluated tree and per-element errors.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    pub generation: u64,
    pub screen_id: String,
    pub tree: ElementTree,
    /// Element id to error message. Several failures are joined with `"; "`.
    pub errors: BTreeMap<String, String>,
}

impl RenderOutput {
    /// Rendered `text` property of an element.
    pub fn text_of(&self, id: &str) -> Option<String> {
        self.tree.query_by_id(id).and_then(|(_, data)| data.text())
    }

    /// Whether the element exists and neither it nor an ancestor was hidden.
    pub fn is_visible(&self, id: &str) -> bool {
        self.tree.query_by_id(id).is_some_and(|(_, data)| data.visible)
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Rendered(Rc<RenderOutput>),
    /// A later trigger started before this run finished loading.
    Superseded { generation: u64 },
}

impl RunOutcome {
    pub fn rendered(&self) -> Option<&Rc<RenderOutput>> {
        match self {
            RunOutcome::Rendered(output) => Some(output),
            RunOutcome::Superseded { .. } => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, RunOutcome::Superseded { .. })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

type Clock = Box<dyn Fn() -> DateTime<Utc>>;

/// One screen-display session.
pub struct Session<S: RowSource> {
    app: RefCell<AppDefinition>,
    screen_id: RefCell<String>,
    source: S,
    inputs: Box<dyn InputValues>,
    config: EngineConfig,
    selections: ActiveSelectionStore,
    queries: QueryCache,
    viewport: Cell<Viewport>,
    clock: Clock,
    phase: Cell<Phase>,
    generation: Cell<u64>,
    latest: RefCell<Option<Rc<RenderOutput>>>,
}

impl<S: RowSource> Session<S> {
    pub fn new(app: AppDefinition, screen_id: impl Into<String>, source: S) -> Self {
        let config = EngineConfig::default();
        Self {
            app: RefCell::new(app),
            screen_id: RefCell::new(screen_id.into()),
            source,
            inputs: Box::new(NoInputs),
            viewport: Cell::new(config.viewport),
            config,
            selections: ActiveSelectionStore::new(),
            queries: QueryCache::new(),
            clock: Box::new(Utc::now),
            phase: Cell::new(Phase::Idle),
            generation: Cell::new(0),
            latest: RefCell::new(None),
        }
    }

    /// Use the given configuration (builder). Resets the viewport to the
    /// configured one.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.viewport.set(config.viewport);
        self.config = config;
        self
    }

    /// Read live input values from `inputs` (builder).
    pub fn with_inputs(mut self, inputs: impl InputValues + 'static) -> Self {
        self.inputs = Box::new(inputs);
        self
    }

    /// Read the current time from `clock` (builder).
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase.get()
    }

    /// Generation of the most recent trigger.
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    /// The last committed render.
    pub fn latest(&self) -> Option<Rc<RenderOutput>> {
        self.latest.borrow().clone()
    }

    pub fn screen_id(&self) -> String {
        self.screen_id.borrow().clone()
    }

    pub fn app(&self) -> Ref<'_, AppDefinition> {
        self.app.borrow()
    }

    pub fn selections(&self) -> &ActiveSelectionStore {
        &self.selections
    }

    pub fn queries(&self) -> &QueryCache {
        &self.queries
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Update the viewport seen by the next run.
    pub fn resize(&self, width: u32, height: u32) {
        self.viewport.set(Viewport::new(width, height));
    }

    /// First render of the current screen.
    pub async fn start(&self) -> RunOutcome {
        self.trigger(Trigger::Initial).await
    }

    /// Switch to another screen and render it.
    pub async fn change_screen(&self, screen_id: impl Into<String>) -> RunOutcome {
        self.trigger(Trigger::ScreenChange(screen_id.into())).await
    }

    /// Drop cached query results and render again.
    pub async fn refresh(&self) -> RunOutcome {
        self.trigger(Trigger::Refresh).await
    }

    /// Make `index` the active child of a tabs or slider container and render
    /// again.
    pub async fn select_active_child(&self, container_id: &str, index: usize) -> RunOutcome {
        self.trigger(Trigger::TabSelection {
            container_id: container_id.to_owned(),
            index,
        })
        .await
    }

    /// Apply a trigger and run the pipeline from Loading.
    pub async fn trigger(&self, trigger: Trigger) -> RunOutcome {
        let generation = self.generation.get() + 1;
        self.generation.set(generation);
        debug!(generation, ?trigger, "pipeline triggered");

        match trigger {
            Trigger::Initial => {}
            Trigger::ScreenChange(screen_id) => *self.screen_id.borrow_mut() = screen_id,
            Trigger::TabSelection {
                container_id,
                index,
            } => self.apply_selection(&container_id, index),
            Trigger::Refresh => self.queries.clear(),
        }

        self.run(generation).await
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.get() != generation
    }

    /// Store the selection and persist it on tabs definitions.
    ///
    /// The index is clamped to the container's last child so the stored
    /// selection and the persisted `activeTab` always name a real child.
    fn apply_selection(&self, container_id: &str, index: usize) {
        let rendered = self.latest.borrow().as_ref().and_then(|out| {
            let (key, data) = out.tree.query_by_id(container_id)?;
            Some((data.definition_id().to_owned(), out.tree.children(key).len()))
        });
        let (definition_id, child_count) = rendered.unwrap_or_else(|| {
            let count = self
                .app
                .borrow()
                .find_element(container_id)
                .map_or(0, |element| element.children.len());
            (container_id.to_owned(), count)
        });

        let index = if child_count > 0 && index >= child_count {
            warn!(
                container = container_id,
                index,
                child_count,
                "selection out of range, using last child"
            );
            child_count - 1
        } else {
            index
        };
        self.selections.select(container_id, index);

        let mut app = self.app.borrow_mut();
        if let Some(element) = app.find_element_mut(&definition_id) {
            if element.container_type == ContainerType::Tabs {
                element
                    .properties
                    .insert("activeTab", (index + 1).to_string());
            }
        }
    }

    async fn run(&self, generation: u64) -> RunOutcome {
        self.phase.set(Phase::Loading);
        let app = self.app.borrow().clone();
        let screen_id = self.screen_id();
        let mut errors = BTreeMap::new();

        let Some(screen) = app.screen(&screen_id) else {
            warn!(screen = %screen_id, "screen not found");
            record(
                &mut errors,
                &screen_id,
                EngineError::MissingScreen {
                    screen_id: screen_id.clone(),
                }
                .to_string(),
            );
            return self.commit(generation, screen_id, ElementTree::new(), errors);
        };

        // Loading
        if self.config.cache_queries {
            self.queries.clear_failures();
        } else {
            self.queries.clear();
        }
        for key in collect_queries(&app, screen) {
            if self.is_stale(generation) {
                return self.superseded(generation);
            }
            if self.queries.contains(&key) {
                trace!(table = %key.source.table, "query cached");
                continue;
            }
            let result = self.source.fetch_rows(&key.source, &key.filters).await;
            // A newer run owns the cache now; these rows may predate a refresh.
            if self.is_stale(generation) {
                return self.superseded(generation);
            }
            if let Err(err) = &result {
                warn!(table = %key.source.table, error = %err, "row fetch failed");
            }
            self.queries.insert(key, result);
        }
        if self.is_stale(generation) {
            return self.superseded(generation);
        }

        // Expanding
        self.phase.set(Phase::Expanding);
        let expansion = Expander::new(&self.queries)
            .with_screens(&app.screens)
            .within_screen(screen.id.clone())
            .with_max_depth(self.config.max_depth)
            .run(&screen.elements);
        let mut tree = expansion.tree;
        for (id, err) in expansion.errors {
            record(&mut errors, &id, err.to_string());
        }

        let facts = EnvironmentFacts::new(self.viewport.get(), (self.clock)());

        // Conditions
        let outcomes = {
            let env = self.environment(&tree, &app, &facts);
            resolve_conditions(&tree, &env)
        };
        for (key, outcome) in outcomes {
            if !outcome.visible {
                for hidden in tree.walk_depth_first(key) {
                    if let Some(data) = tree.get_mut(hidden) {
                        data.visible = false;
                    }
                }
            }
            let Some(data) = tree.get_mut(key) else {
                continue;
            };
            if let Some(err) = outcome.error() {
                record(&mut errors, &data.id, err.to_string());
            }
            data.visible = outcome.visible;
            data.matched_condition = outcome.matched_index;
            let overrides = outcome
                .matched_index
                .and_then(|i| data.conditions.get(i))
                .and_then(|c: &Condition| c.properties.clone());
            if let Some(overrides) = overrides {
                data.properties.merge(&overrides);
            }
        }
        self.phase.set(Phase::ConditionsResolved);

        // Calculations
        let rendered = {
            let env = self.environment(&tree, &app, &facts);
            resolve_calculations(&tree, &env)
        };
        for (key, property, text, diagnostics) in rendered {
            let Some(data) = tree.get_mut(key) else {
                continue;
            };
            for err in diagnostics {
                record(&mut errors, &data.id, err.to_string());
            }
            data.properties.insert(property, text);
        }
        self.phase.set(Phase::CalculationsResolved);

        self.commit(generation, screen_id, tree, errors)
    }

    fn environment<'a>(
        &'a self,
        tree: &'a ElementTree,
        app: &'a AppDefinition,
        facts: &'a EnvironmentFacts,
    ) -> EvaluationEnvironment<'a> {
        EvaluationEnvironment::new(
            tree,
            &app.calculations,
            &self.selections,
            &self.queries,
            facts,
            &self.config,
        )
        .with_inputs(self.inputs.as_ref())
    }

    fn commit(
        &self,
        generation: u64,
        screen_id: String,
        tree: ElementTree,
        errors: BTreeMap<String, String>,
    ) -> RunOutcome {
        debug!(
            generation,
            screen = %screen_id,
            elements = tree.len(),
            errors = errors.len(),
            "render committed"
        );
        let output = Rc::new(RenderOutput {
            generation,
            screen_id,
            tree,
            errors,
        });
        *self.latest.borrow_mut() = Some(Rc::clone(&output));
        self.phase.set(Phase::Rendered);
        RunOutcome::Rendered(output)
    }

    fn superseded(&self, generation: u64) -> RunOutcome {
        debug!(
            generation,
            latest = self.generation.get(),
            "run superseded"
        );
        RunOutcome::Superseded { generation }
    }
}

impl<S: RowSource> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("screen_id", &self.screen_id.borrow())
            .field("phase", &self.phase.get())
            .field("generation", &self.generation.get())
            .field("cached_queries", &self.queries.len())
            .finish()
    }
}

/// Append `message` to the error entry of `id`.
fn record(errors: &mut BTreeMap<String, String>, id: &str, message: String) {
    errors
        .entry(id.to_owned())
        .and_modify(|existing| {
            existing.push_str("; ");
            existing.push_str(&message);
        })
        .or_insert(message);
}

// ---------------------------------------------------------------------------
// Pipeline passes
// ---------------------------------------------------------------------------

/// Evaluate conditions in tree order. Subtrees of hidden elements are not
/// visited; the caller marks them hidden.
fn resolve_conditions(
    tree: &ElementTree,
    env: &EvaluationEnvironment<'_>,
) -> Vec<(ElementId, ConditionOutcome)> {
    let mut outcomes = Vec::new();
    let mut stack: Vec<ElementId> = tree.roots().iter().rev().copied().collect();
    while let Some(key) = stack.pop() {
        let Some(data) = tree.get(key) else {
            continue;
        };
        let outcome = evaluate_element(data, env);
        if outcome.visible {
            stack.extend(tree.children(key).iter().rev().copied());
        }
        outcomes.push((key, outcome));
    }
    outcomes
}

/// Render every text property of every visible element.
fn resolve_calculations(
    tree: &ElementTree,
    env: &EvaluationEnvironment<'_>,
) -> Vec<(ElementId, String, String, Vec<EngineError>)> {
    let mut rendered = Vec::new();
    let mut stack: Vec<ElementId> = tree.roots().iter().rev().copied().collect();
    while let Some(key) = stack.pop() {
        let Some(data) = tree.get(key) else {
            continue;
        };
        if !data.visible {
            continue;
        }
        let scoped = env.scoped_to(data);
        for property in data.properties.text_keys() {
            let Some(raw) = data.properties.get_text(&property) else {
                continue;
            };
            if !raw.contains("{{") {
                continue;
            }
            let out = render_text(&raw, &scoped);
            rendered.push((key, property, out.text, out.diagnostics));
        }
        stack.extend(tree.children(key).iter().rev().copied());
    }
    rendered
}

/// Every query the screen can need, each once, in discovery order.
///
/// Covers repeating containers and `database` steps in conditions, including
/// those of embedded screens, plus `database` steps of every calculation.
fn collect_queries(app: &AppDefinition, screen: &ScreenDefinition) -> Vec<QueryKey> {
    let mut collector = QueryCollector {
        app,
        keys: Vec::new(),
        seen: HashSet::new(),
        screens: vec![screen.id.clone()],
    };
    for element in &screen.elements {
        collector.element(element);
    }
    for calculation in app.calculations.iter() {
        for step in &calculation.steps {
            collector.step(&step.source);
        }
    }
    collector.keys
}

struct QueryCollector<'a> {
    app: &'a AppDefinition,
    keys: Vec<QueryKey>,
    seen: HashSet<QueryKey>,
    screens: Vec<String>,
}

impl QueryCollector<'_> {
    fn push(&mut self, key: QueryKey) {
        if self.seen.insert(key.clone()) {
            self.keys.push(key);
        }
    }

    fn step(&mut self, source: &StepSource) {
        if let Some((source, filters)) = source.query_source() {
            self.push(QueryKey::new(source, filters.to_vec()));
        }
    }

    fn element(&mut self, element: &Element) {
        if let (ContentType::Repeating, Some(config)) =
            (element.content_type, &element.repeating_config)
        {
            self.push(QueryKey::new(config.source.clone(), config.filters.clone()));
        }
        for condition in &element.conditions {
            for step in &condition.steps {
                self.step(&step.source);
            }
        }
        if let (ContentType::Page, Some(config)) = (element.content_type, &element.page_config) {
            let app = self.app;
            if !self.screens.contains(&config.screen_id) {
                if let Some(screen) = app.screen(&config.screen_id) {
                    self.screens.push(screen.id.clone());
                    for child in &screen.elements {
                        self.element(child);
                    }
                    self.screens.pop();
                }
            }
        }
        for child in &element.children {
            self.element(child);
        }
    }
}
