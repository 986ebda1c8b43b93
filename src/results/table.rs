use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::row::{DataRow, RowState, build_index};
use crate::types::DbValue;

/// An in-memory table filled from one result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    pub name: String,
    column_names: Arc<Vec<String>>,
    rows: Vec<DataRow>,
    #[doc(hidden)]
    column_index_cache: Arc<HashMap<String, usize>>,
}

impl DataTable {
    #[must_use]
    pub fn new(name: impl Into<String>, column_names: Vec<String>) -> Self {
        let column_names = Arc::new(column_names);
        let column_index_cache = Arc::new(build_index(&column_names));
        Self {
            name: name.into(),
            column_names,
            rows: Vec::new(),
            column_index_cache,
        }
    }

    /// Create a table with a known row capacity
    #[must_use]
    pub fn with_capacity(name: impl Into<String>, column_names: Vec<String>, capacity: usize) -> Self {
        let mut table = Self::new(name, column_names);
        table.rows.reserve(capacity);
        table
    }

    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Append a row loaded from the server. Short rows are padded with `Null`.
    pub fn add_row_values(&mut self, mut values: Vec<DbValue>) {
        if values.len() < self.column_names.len() {
            values.resize(self.column_names.len(), DbValue::Null);
        }
        self.rows.push(DataRow::with_cache(
            self.column_names.clone(),
            values,
            self.column_index_cache.clone(),
        ));
    }

    /// Append a caller-created row that will be inserted on the next push to the server.
    pub fn insert_row(&mut self, values: Vec<DbValue>) {
        self.add_row_values(values);
        if let Some(row) = self.rows.last_mut() {
            row.set_state(RowState::Added);
        }
    }

    #[must_use]
    pub fn rows(&self) -> &[DataRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [DataRow] {
        &mut self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// First column of the first row, if any.
    #[must_use]
    pub fn first_value(&self) -> Option<&DbValue> {
        self.rows.first().and_then(|r| r.get_by_index(0))
    }

    /// Take rows from another result set with the same shape.
    pub(crate) fn merge(&mut self, other: DataTable) {
        for row in other.rows {
            self.add_row_values(row.values);
        }
    }

    /// Drop deleted rows and mark the rest unchanged.
    pub fn accept_changes(&mut self) {
        self.rows.retain(|r| r.state() != RowState::Deleted);
        for row in &mut self.rows {
            row.set_state(RowState::Unchanged);
        }
    }

    /// Render rows as an array of JSON objects keyed by column name.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let mut obj = Map::with_capacity(self.column_names.len());
                for (name, value) in self.column_names.iter().zip(&row.values) {
                    obj.insert(name.clone(), value.to_json());
                }
                JsonValue::Object(obj)
            })
            .collect();
        JsonValue::Array(rows)
    }
}
