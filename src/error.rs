//! Engine error taxonomy.
//!
//! Every failure inside the engine is local: the session turns these into
//! inline diagnostics and entries in the render error map. Nothing here is
//! allowed to escape a screen evaluation.

use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised while resolving steps, calculations, conditions, or expansion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A `{{CALC:..}}` token or calculation lookup named an unknown id.
    #[error("calculation `{id}` not found")]
    MissingCalculation { id: String },

    /// A `repeating_container` step ran outside a matching row context.
    #[error("no repeating context for container `{container_id}`")]
    MissingContext { container_id: String },

    /// `divide` with a zero-valued right operand.
    #[error("division by zero")]
    DivisionByZero,

    /// A calculation reached itself again through token substitution.
    #[error("calculation cycle: {chain}")]
    CalculationCycle { chain: String },

    /// Nesting went past the configured depth limit.
    #[error("nesting deeper than {limit} levels")]
    DepthExceeded { limit: usize },

    /// A row fetch failed or its result was never loaded.
    #[error(transparent)]
    ExternalQuery(#[from] QueryError),

    /// Every condition of an element failed to evaluate.
    #[error("all {count} conditions failed: {first}")]
    ConditionEvaluation { count: usize, first: String },

    /// A page container points at a screen that does not exist.
    #[error("screen `{screen_id}` not found")]
    MissingScreen { screen_id: String },

    /// A page container embeds a screen that is already being embedded.
    #[error("page cycle through screen `{screen_id}`")]
    PageCycle { screen_id: String },
}

/// Failures from the external row source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("query against `{table}` failed: {message}")]
    Failed { table: String, message: String },

    #[error("query against `{table}` was not loaded")]
    NotLoaded { table: String },
}

impl QueryError {
    /// Build a [`QueryError::Failed`] for the given table.
    pub fn failed(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            table: table.into(),
            message: message.into(),
        }
    }
}

/// Errors from loading an [`EngineConfig`](crate::config::EngineConfig) or an
/// app definition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },
}
