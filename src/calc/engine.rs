//! Calculation table, evaluation, and `{{CALC:..}}` substitution.
//!
//! Evaluation is synchronous: every query a calculation can touch has been
//! loaded into the session cache before the calculation pass starts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::operators::reduce;
use super::resolver::resolve_guarded;
use super::step::{ConditionOperation, Operation, Step, StepSource};
use super::token::{scan, Segment};
use crate::env::EvaluationEnvironment;
use crate::error::{EngineError, Result};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Calculation / CalculationTable
// ---------------------------------------------------------------------------

/// A named, ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calculation {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step<Operation>>,
}

impl Calculation {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Append the leading step (builder).
    pub fn step(mut self, source: StepSource) -> Self {
        self.steps.push(Step::first(source));
        self
    }

    /// Append a step joined with `op` (builder).
    pub fn then(mut self, op: Operation, source: StepSource) -> Self {
        self.steps.push(Step::then(op, source));
        self
    }
}

/// Global calculation table, keyed by id. Serialized as a list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<Calculation>", into = "Vec<Calculation>")]
pub struct CalculationTable {
    entries: BTreeMap<String, Calculation>,
}

impl CalculationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a calculation (builder). A later entry replaces an earlier one.
    pub fn with(mut self, calculation: Calculation) -> Self {
        self.insert(calculation);
        self
    }

    pub fn insert(&mut self, calculation: Calculation) {
        self.entries.insert(calculation.id.clone(), calculation);
    }

    pub fn get(&self, id: &str) -> Option<&Calculation> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Calculation> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<Calculation>> for CalculationTable {
    fn from(list: Vec<Calculation>) -> Self {
        let mut table = Self::new();
        for calculation in list {
            table.insert(calculation);
        }
        table
    }
}

impl From<CalculationTable> for Vec<Calculation> {
    fn from(table: CalculationTable) -> Self {
        table.entries.into_values().collect()
    }
}

// ---------------------------------------------------------------------------
// EvalGuard
// ---------------------------------------------------------------------------

/// Stack of calculations currently being evaluated.
///
/// Re-entering an id on the stack is a cycle; a stack deeper than the
/// configured limit is a depth error. The guard also collects recoverable
/// failures from nested substitutions, which render as placeholders.
#[derive(Debug, Clone)]
pub struct EvalGuard {
    stack: Vec<String>,
    max_depth: usize,
    notes: Vec<EngineError>,
}

impl EvalGuard {
    pub fn new(max_depth: usize) -> Self {
        Self {
            stack: Vec::new(),
            max_depth,
            notes: Vec::new(),
        }
    }

    /// Push `id`, failing on a cycle or when the stack is full.
    pub fn enter(&mut self, id: &str) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|s| s == id) {
            let mut chain: Vec<&str> = self.stack[pos..].iter().map(String::as_str).collect();
            chain.push(id);
            let chain = chain.join(" -> ");
            warn!(%chain, "calculation cycle detected");
            return Err(EngineError::CalculationCycle { chain });
        }
        if self.stack.len() >= self.max_depth {
            return Err(EngineError::DepthExceeded {
                limit: self.max_depth,
            });
        }
        self.stack.push(id.to_owned());
        Ok(())
    }

    pub fn exit(&mut self) {
        self.stack.pop();
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Record a failure that was rendered inline instead of propagated.
    pub fn note(&mut self, err: EngineError) {
        self.notes.push(err);
    }

    /// Drain the recorded failures, oldest first.
    pub fn take_notes(&mut self) -> Vec<EngineError> {
        std::mem::take(&mut self.notes)
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate a calculation and stringify the result.
pub fn evaluate(id: &str, env: &EvaluationEnvironment<'_>) -> Result<String> {
    let mut guard = EvalGuard::new(env.config.max_depth);
    evaluate_value(id, env, &mut guard).map(|value| value.to_string())
}

/// Evaluate a calculation to a [`Value`] under an existing guard.
pub fn evaluate_value(
    id: &str,
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<Value> {
    let calculation = env
        .calculations
        .get(id)
        .ok_or_else(|| EngineError::MissingCalculation { id: id.to_owned() })?;
    guard.enter(id)?;
    let result = reduce_steps(&calculation.steps, env, guard);
    guard.exit();
    debug!(calculation = id, ok = result.is_ok(), "calculation evaluated");
    result
}

/// Resolve the first step and fold the rest into it, left to right.
///
/// An empty list reduces to [`Value::Empty`]. A later step without an
/// operator concatenates.
pub fn reduce_steps<Op>(
    steps: &[Step<Op>],
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<Value>
where
    Op: Copy + Into<ConditionOperation>,
{
    let mut iter = steps.iter();
    let Some(first) = iter.next() else {
        return Ok(Value::Empty);
    };
    let mut acc = resolve_guarded(&first.source, env, guard)?;
    for step in iter {
        let next = resolve_guarded(&step.source, env, guard)?;
        let op = step
            .operation
            .map(Into::into)
            .unwrap_or(ConditionOperation::Concatenate);
        acc = reduce(&acc, &next, op)?;
    }
    Ok(acc)
}

// ---------------------------------------------------------------------------
// Token substitution
// ---------------------------------------------------------------------------

/// Placeholder shown for an unknown calculation id.
pub fn missing_placeholder(id: &str, len: usize) -> String {
    let short: String = id.chars().take(len).collect();
    format!("[Missing: {short}]")
}

/// Replace every `{{CALC:<id>}}` in `text`, left to right.
///
/// Unknown ids become placeholders; any other failure aborts the whole
/// substitution. Nested placeholders are noted on the guard.
pub fn substitute_tokens(text: &str, env: &EvaluationEnvironment<'_>) -> Result<String> {
    let mut guard = EvalGuard::new(env.config.max_depth);
    substitute_guarded(text, env, &mut guard)
}

pub(crate) fn substitute_guarded(
    text: &str,
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<String> {
    if !text.contains("{{") {
        return Ok(text.to_owned());
    }
    let mut out = String::with_capacity(text.len());
    for segment in scan(text) {
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Calc { id, .. } => match evaluate_value(id, env, guard) {
                Ok(value) => out.push_str(&value.to_string()),
                Err(err @ EngineError::MissingCalculation { .. }) => {
                    warn!(calculation = id, "unknown calculation referenced");
                    out.push_str(&missing_placeholder(id, env.config.missing_id_len));
                    guard.note(err);
                }
                Err(err) => return Err(err),
            },
        }
    }
    Ok(out)
}

/// Result of rendering one text property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedText {
    pub text: String,
    /// Failures of individual tokens, in order.
    pub diagnostics: Vec<EngineError>,
}

/// Substitute tokens leniently: each failing token is replaced by an inline
/// `[Error: ..]` and recorded, and the rest of the text still renders.
pub fn render_text(text: &str, env: &EvaluationEnvironment<'_>) -> RenderedText {
    let mut rendered = RenderedText::default();
    if !text.contains("{{") {
        rendered.text = text.to_owned();
        return rendered;
    }
    for segment in scan(text) {
        match segment {
            Segment::Literal(s) => rendered.text.push_str(s),
            Segment::Calc { id, .. } => {
                let mut guard = EvalGuard::new(env.config.max_depth);
                let result = evaluate_value(id, env, &mut guard);
                rendered.diagnostics.extend(guard.take_notes());
                match result {
                    Ok(value) => rendered.text.push_str(&value.to_string()),
                    Err(err @ EngineError::MissingCalculation { .. }) => {
                        rendered
                            .text
                            .push_str(&missing_placeholder(id, env.config.missing_id_len));
                        rendered.diagnostics.push(err);
                    }
                    Err(err) => {
                        rendered.text.push_str(&format!("[Error: {err}]"));
                        rendered.diagnostics.push(err);
                    }
                }
            }
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::dom::ElementTree;
    use crate::env::EnvironmentFacts;
    use crate::selection::ActiveSelectionStore;
    use crate::source::QueryCache;
    use pretty_assertions::assert_eq;

    struct Fixture {
        tree: ElementTree,
        calculations: CalculationTable,
        selections: ActiveSelectionStore,
        queries: QueryCache,
        facts: EnvironmentFacts,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(calculations: CalculationTable) -> Self {
            Self {
                tree: ElementTree::new(),
                calculations,
                selections: ActiveSelectionStore::new(),
                queries: QueryCache::new(),
                facts: EnvironmentFacts::current(Default::default()),
                config: EngineConfig::default(),
            }
        }

        fn env(&self) -> EvaluationEnvironment<'_> {
            EvaluationEnvironment::new(
                &self.tree,
                &self.calculations,
                &self.selections,
                &self.queries,
                &self.facts,
                &self.config,
            )
        }
    }

    fn custom(v: &str) -> StepSource {
        StepSource::custom(v)
    }

    #[test]
    fn subtraction_order() {
        let fx = Fixture::new(CalculationTable::new().with(
            Calculation::new("c").step(custom("5")).then(Operation::Subtract, custom("2")),
        ));
        assert_eq!(evaluate("c", &fx.env()).unwrap(), "3");
    }

    #[test]
    fn divide_by_zero_propagates() {
        let fx = Fixture::new(CalculationTable::new().with(
            Calculation::new("c").step(custom("1")).then(Operation::Divide, custom("0")),
        ));
        assert_eq!(evaluate("c", &fx.env()), Err(EngineError::DivisionByZero));
    }

    #[test]
    fn zero_is_not_empty() {
        let fx = Fixture::new(
            CalculationTable::new()
                .with(Calculation::new("zero").step(custom("2")).then(Operation::Subtract, custom("2")))
                .with(Calculation::new("empty")),
        );
        assert_eq!(evaluate("zero", &fx.env()).unwrap(), "0");
        assert_eq!(evaluate("empty", &fx.env()).unwrap(), "");
    }

    #[test]
    fn nested_tokens_resolve() {
        let fx = Fixture::new(
            CalculationTable::new()
                .with(Calculation::new("inner").step(custom("B")))
                .with(
                    Calculation::new("outer")
                        .step(custom("A"))
                        .then(Operation::Concatenate, custom("{{CALC:inner}}")),
                ),
        );
        assert_eq!(
            substitute_tokens("Hello {{CALC:outer}}!", &fx.env()).unwrap(),
            "Hello AB!"
        );
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let fx = Fixture::new(
            CalculationTable::new().with(Calculation::new("a").step(custom("{{CALC:a}}"))),
        );
        assert_eq!(
            evaluate("a", &fx.env()),
            Err(EngineError::CalculationCycle {
                chain: "a -> a".into()
            })
        );
    }

    #[test]
    fn mutual_reference_is_a_cycle() {
        let fx = Fixture::new(
            CalculationTable::new()
                .with(Calculation::new("a").step(custom("x{{CALC:b}}")))
                .with(Calculation::new("b").step(custom("{{CALC:a}}"))),
        );
        let rendered = render_text("[{{CALC:a}}] ok", &fx.env());
        assert_eq!(
            rendered.text,
            "[[Error: calculation cycle: a -> b -> a]] ok"
        );
        assert_eq!(rendered.diagnostics.len(), 1);
    }

    #[test]
    fn depth_limit() {
        let mut table = CalculationTable::new();
        for i in 0..5 {
            table.insert(Calculation::new(format!("c{i}")).step(custom(&format!("{{{{CALC:c{}}}}}", i + 1))));
        }
        table.insert(Calculation::new("c5").step(custom("end")));
        let mut fx = Fixture::new(table);
        assert_eq!(evaluate("c0", &fx.env()).unwrap(), "end");
        fx.config = EngineConfig::default().with_max_depth(3);
        assert_eq!(
            evaluate("c0", &fx.env()),
            Err(EngineError::DepthExceeded { limit: 3 })
        );
    }

    #[test]
    fn missing_calculation_is_a_placeholder() {
        let fx = Fixture::new(CalculationTable::new());
        assert_eq!(
            substitute_tokens("x {{CALC:3f9a77c1-aaaa}} y", &fx.env()).unwrap(),
            "x [Missing: 3f9a77c1] y"
        );
        let rendered = render_text("{{CALC:gone}}", &fx.env());
        assert_eq!(rendered.text, "[Missing: gone]");
        assert_eq!(
            rendered.diagnostics,
            vec![EngineError::MissingCalculation { id: "gone".into() }]
        );
    }

    #[test]
    fn one_failing_token_leaves_the_rest() {
        let fx = Fixture::new(
            CalculationTable::new()
                .with(Calculation::new("ok").step(custom("fine")))
                .with(Calculation::new("bad").step(custom("1")).then(Operation::Divide, custom("0"))),
        );
        let rendered = render_text("{{CALC:ok}} / {{CALC:bad}}", &fx.env());
        assert_eq!(rendered.text, "fine / [Error: division by zero]");
        assert_eq!(rendered.diagnostics, vec![EngineError::DivisionByZero]);
    }

    #[test]
    fn table_parses_from_list() {
        let table: CalculationTable = serde_json::from_str(
            r#"[{"id": "a", "steps": [{"source": "custom", "value": "1"}]}, {"id": "b"}]"#,
        )
        .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("a").map(|c| c.steps.len()), Some(1));
        assert!(table.get("b").is_some_and(|c| c.steps.is_empty()));
    }

    #[test]
    fn table_parses_operations() {
        let table: CalculationTable = serde_json::from_str(
            r#"[{"id": "diff", "steps": [
                {"source": "custom", "value": "5"},
                {"source": "custom", "value": "2", "operation": "subtract"}
            ]}]"#,
        )
        .unwrap();
        let steps = &table.get("diff").unwrap().steps;
        assert_eq!(steps[0].operation, None);
        assert_eq!(steps[1].operation, Some(Operation::Subtract));

        let fx = Fixture::new(table);
        assert_eq!(evaluate("diff", &fx.env()).unwrap(), "3");
    }

    #[test]
    fn nested_missing_calculation_is_reported() {
        let fx = Fixture::new(
            CalculationTable::new().with(
                Calculation::new("outer")
                    .step(custom("A"))
                    .then(Operation::Concatenate, custom("{{CALC:gone}}")),
            ),
        );
        let rendered = render_text("{{CALC:outer}}", &fx.env());
        assert_eq!(rendered.text, "A[Missing: gone]");
        assert_eq!(
            rendered.diagnostics,
            vec![EngineError::MissingCalculation { id: "gone".into() }]
        );
    }
}
