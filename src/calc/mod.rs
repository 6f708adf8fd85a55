//! Calculations: step model, value resolution, operator reduction, and token
//! substitution.

pub mod engine;
pub mod operators;
pub mod resolver;
pub mod step;
pub mod token;

pub use engine::{
    evaluate, evaluate_value, missing_placeholder, reduce_steps, render_text, substitute_tokens,
    Calculation, CalculationTable, EvalGuard, RenderedText,
};
pub use operators::reduce;
pub use resolver::{resolve, resolve_guarded};
pub use step::{
    ConditionOperation, ContainerValueType, DatabaseAction, Operation, Step, StepSource,
    ROW_NUMBER_COLUMN,
};
pub use token::{has_references, references, scan, Segment, CALC_PREFIX};
