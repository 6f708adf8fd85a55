//! In-memory row source and input values for tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::Notify;

use crate::env::InputValues;
use crate::error::QueryError;
use crate::source::{filters_match, Filter, Record, RowSource, SourceRef};

/// Records from a JSON array of objects. Non-objects are skipped.
pub fn records(json: serde_json::Value) -> Vec<Record> {
    match json {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// MemoryRowSource
// ---------------------------------------------------------------------------

/// A [`RowSource`] over in-memory tables.
///
/// Filters are applied with [`filters_match`]. Unknown tables are empty.
/// Tables can be made to fail, and a fetch can be held until the test
/// releases it.
///
/// # Examples
///
/// ```ignore
/// use screenflow::testing::{records, MemoryRowSource};
/// use serde_json::json;
///
/// let source = MemoryRowSource::new()
///     .with_table("users", records(json!([{"id": 1, "name": "x"}])));
/// ```
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    tables: RefCell<HashMap<String, Vec<Record>>>,
    failures: RefCell<HashMap<String, String>>,
    gates: RefCell<HashMap<String, Rc<Notify>>>,
    calls: Cell<usize>,
}

impl MemoryRowSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table (builder).
    pub fn with_table(self, table: impl Into<String>, rows: Vec<Record>) -> Self {
        self.set_table(table, rows);
        self
    }

    /// Make every fetch against `table` fail (builder).
    pub fn failing(self, table: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures
            .borrow_mut()
            .insert(table.into(), message.into());
        self
    }

    /// Let fetches against `table` succeed again.
    pub fn recover(&self, table: &str) {
        self.failures.borrow_mut().remove(table);
    }

    /// Replace a table's rows.
    pub fn set_table(&self, table: impl Into<String>, rows: Vec<Record>) {
        self.tables.borrow_mut().insert(table.into(), rows);
    }

    /// Hold the next fetch against `table` until the returned gate is
    /// notified.
    pub fn hold(&self, table: impl Into<String>) -> Rc<Notify> {
        let gate = Rc::new(Notify::new());
        self.gates
            .borrow_mut()
            .insert(table.into(), Rc::clone(&gate));
        gate
    }

    /// Number of fetches made so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl RowSource for MemoryRowSource {
    async fn fetch_rows(
        &self,
        source: &SourceRef,
        filters: &[Filter],
    ) -> Result<Vec<Record>, QueryError> {
        self.calls.set(self.calls.get() + 1);

        let gate = self.gates.borrow_mut().remove(&source.table);
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if let Some(message) = self.failures.borrow().get(&source.table) {
            return Err(QueryError::failed(source.table.clone(), message.clone()));
        }
        let tables = self.tables.borrow();
        let rows = tables
            .get(&source.table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| filters_match(row, filters))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// CountingInputs
// ---------------------------------------------------------------------------

/// Input values that count how often each input is read.
#[derive(Debug, Default)]
pub struct CountingInputs {
    values: HashMap<String, String>,
    reads: RefCell<HashMap<String, usize>>,
}

impl CountingInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an input's value (builder).
    pub fn with_value(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(id.into(), value.into());
        self
    }

    /// How many times `id` has been read.
    pub fn reads(&self, id: &str) -> usize {
        self.reads.borrow().get(id).copied().unwrap_or(0)
    }
}

impl InputValues for CountingInputs {
    fn current_value(&self, element_id: &str) -> Option<String> {
        *self
            .reads
            .borrow_mut()
            .entry(element_id.to_owned())
            .or_insert(0) += 1;
        self.values.get(element_id).cloned()
    }
}
