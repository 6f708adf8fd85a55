//! External row source: filters, query keys, and the session query cache.
//!
//! The engine never talks to a database directly. It asks a [`RowSource`] for
//! the rows of a table under a filter list, and keeps the answers in a
//! [`QueryCache`] keyed by `(source, table, filters)`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::QueryError;
use crate::value::Value;

/// One row: column name to scalar, in column order.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Shared result of one query.
pub type Rows = Rc<Vec<Record>>;

// ---------------------------------------------------------------------------
// SourceRef / Filter
// ---------------------------------------------------------------------------

/// Reference to an external table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    /// Data source identifier; empty for the app's default source.
    #[serde(default)]
    pub data_source: String,
    pub table: String,
}

impl SourceRef {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            data_source: String::new(),
            table: table.into(),
        }
    }
}

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    /// Case-insensitive substring match on the text form.
    Contains,
}

/// How a filter combines with the filter before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterLogic {
    #[default]
    And,
    Or,
}

/// A single column filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    #[serde(deserialize_with = "scalar_string")]
    pub value: String,
    /// Ignored on the first filter of a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<FilterLogic>,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: FilterOperator, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
            logic: None,
        }
    }

    /// Set how this filter combines with the previous one (builder).
    pub fn with_logic(mut self, logic: FilterLogic) -> Self {
        self.logic = Some(logic);
        self
    }

    /// Whether a single record satisfies this filter in isolation.
    pub fn matches(&self, record: &Record) -> bool {
        let cell = record.get(&self.column).map(Value::from).unwrap_or_default();
        let wanted = Value::text(self.value.as_str());
        match self.operator {
            FilterOperator::Equals => cell.loose_eq(&wanted),
            FilterOperator::NotEquals => !cell.loose_eq(&wanted),
            FilterOperator::GreaterThan => cell.loose_cmp(&wanted).is_gt(),
            FilterOperator::LessThan => cell.loose_cmp(&wanted).is_lt(),
            FilterOperator::GreaterEqual => cell.loose_cmp(&wanted).is_ge(),
            FilterOperator::LessEqual => cell.loose_cmp(&wanted).is_le(),
            FilterOperator::Contains => cell
                .to_string()
                .to_lowercase()
                .contains(&self.value.to_lowercase()),
        }
    }
}

/// Evaluate a filter list against a record, folding left to right with each
/// filter's `logic`. An empty list matches everything.
pub fn filters_match(record: &Record, filters: &[Filter]) -> bool {
    let mut iter = filters.iter();
    let Some(first) = iter.next() else {
        return true;
    };
    let mut acc = first.matches(record);
    for filter in iter {
        let hit = filter.matches(record);
        acc = match filter.logic.unwrap_or_default() {
            FilterLogic::And => acc && hit,
            FilterLogic::Or => acc || hit,
        };
    }
    acc
}

/// Accept strings, numbers, booleans, or null for a filter value.
fn scalar_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let json = serde_json::Value::deserialize(deserializer)?;
    Ok(Value::from(&json).to_string())
}

// ---------------------------------------------------------------------------
// RowSource
// ---------------------------------------------------------------------------

/// Capability to fetch rows from the persistence layer.
///
/// Implementations may suspend; the session awaits them one at a time.
pub trait RowSource {
    fn fetch_rows(
        &self,
        source: &SourceRef,
        filters: &[Filter],
    ) -> impl Future<Output = Result<Vec<Record>, QueryError>>;
}

// ---------------------------------------------------------------------------
// QueryKey / QueryCache
// ---------------------------------------------------------------------------

/// Cache key: one table under one filter list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub source: SourceRef,
    pub filters: Vec<Filter>,
}

impl QueryKey {
    pub fn new(source: SourceRef, filters: Vec<Filter>) -> Self {
        Self { source, filters }
    }
}

/// Per-session memo of query results.
///
/// Failures are held only until the next run starts, so a transient
/// outage is retried instead of sticking for the rest of the session.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: RefCell<HashMap<QueryKey, Result<Rows, QueryError>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached result for a key, if it has been loaded.
    pub fn get(&self, key: &QueryKey) -> Option<Result<Rows, QueryError>> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.entries.borrow().contains_key(key)
    }

    /// Store the outcome of a fetch, replacing any previous one.
    pub fn insert(&self, key: QueryKey, result: Result<Vec<Record>, QueryError>) {
        self.entries.borrow_mut().insert(key, result.map(Rc::new));
    }

    /// Forget everything (explicit refresh).
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    /// Drop failed entries so the next run fetches them again.
    pub fn clear_failures(&self) {
        self.entries.borrow_mut().retain(|_, result| result.is_ok());
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
