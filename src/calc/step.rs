//! Step model: value sources and operators.
//!
//! A step is one value source plus, for every step but the first, the operator
//! that folds it into the running result. Sources and operators are closed
//! enums; the JSON form uses a `source` tag with camelCase fields.

use serde::{Deserialize, Serialize};

use crate::source::{Filter, SourceRef};

// ---------------------------------------------------------------------------
// Operators
// ---------------------------------------------------------------------------

/// Operators available to calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concatenate,
}

/// Operators available to conditions: the calculation set plus logic and
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concatenate,
    And,
    Or,
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
}

impl From<Operation> for ConditionOperation {
    fn from(op: Operation) -> Self {
        match op {
            Operation::Add => ConditionOperation::Add,
            Operation::Subtract => ConditionOperation::Subtract,
            Operation::Multiply => ConditionOperation::Multiply,
            Operation::Divide => ConditionOperation::Divide,
            Operation::Concatenate => ConditionOperation::Concatenate,
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// What an `element` step reads from a tabs or slider container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerValueType {
    /// 1-based index of the active child.
    #[default]
    ActiveTabOrder,
    /// Text of the marked value element under the active child.
    ActiveTabValue,
}

/// How a `database` step formats its rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseAction {
    /// First column of the first row.
    #[default]
    Value,
    /// First column of every row, comma-joined.
    Values,
    /// Number of rows.
    Count,
}

/// Column name that reads the 1-based row number instead of a record field.
pub const ROW_NUMBER_COLUMN: &str = "row_number";

/// Where a step's value comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StepSource {
    /// Literal text; may embed `{{CALC:..}}` tokens.
    Custom {
        #[serde(default)]
        value: String,
    },
    /// Current value of another element.
    Element {
        element_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        container_value_type: Option<ContainerValueType>,
    },
    /// Filtered query against an external table.
    Database {
        #[serde(default)]
        data_source: String,
        table: String,
        /// Column to read; defaults to the first column of each row.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<String>,
        #[serde(default)]
        filters: Vec<Filter>,
        #[serde(default)]
        action: DatabaseAction,
    },
    /// Column of the row bound to an enclosing repeating container.
    RepeatingContainer { container_id: String, column: String },
    /// Parameter passed to the enclosing page.
    PassedParameter { name: String },
    /// Current time.
    Timestamp {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
    },
    ScreenWidth,
    ScreenHeight,
}

impl StepSource {
    pub fn custom(value: impl Into<String>) -> Self {
        StepSource::Custom {
            value: value.into(),
        }
    }

    pub fn element(element_id: impl Into<String>) -> Self {
        StepSource::Element {
            element_id: element_id.into(),
            container_value_type: None,
        }
    }

    pub fn container_value(element_id: impl Into<String>, value_type: ContainerValueType) -> Self {
        StepSource::Element {
            element_id: element_id.into(),
            container_value_type: Some(value_type),
        }
    }

    pub fn database(table: impl Into<String>, filters: Vec<Filter>, action: DatabaseAction) -> Self {
        StepSource::Database {
            data_source: String::new(),
            table: table.into(),
            column: None,
            filters,
            action,
        }
    }

    pub fn repeating(container_id: impl Into<String>, column: impl Into<String>) -> Self {
        StepSource::RepeatingContainer {
            container_id: container_id.into(),
            column: column.into(),
        }
    }

    pub fn parameter(name: impl Into<String>) -> Self {
        StepSource::PassedParameter { name: name.into() }
    }

    /// The table reference of a `database` step.
    pub fn query_source(&self) -> Option<(SourceRef, &[Filter])> {
        match self {
            StepSource::Database {
                data_source,
                table,
                filters,
                ..
            } => Some((
                SourceRef {
                    data_source: data_source.clone(),
                    table: table.clone(),
                },
                filters.as_slice(),
            )),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A source and the operator joining it to the previous result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step<Op> {
    /// Ignored on the first step. A missing key reads as `None`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<Op>,
    #[serde(flatten)]
    pub source: StepSource,
}

impl<Op> Step<Op> {
    /// A leading step (no operator).
    pub fn first(source: StepSource) -> Self {
        Self {
            operation: None,
            source,
        }
    }

    /// A follow-up step joined with `op`.
    pub fn then(op: Op, source: StepSource) -> Self {
        Self {
            operation: Some(op),
            source,
        }
    }
}
