use std::collections::HashMap;
use std::sync::Arc;

use crate::types::DbValue;

/// Change-tracking state of a row held in a [`DataTable`](super::DataTable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowState {
    /// Loaded from the server and not modified since
    #[default]
    Unchanged,
    Added,
    Modified,
    Deleted,
}

/// A row from a query result
///
/// This struct represents a single row from a query result,
/// with access to both the column names and the values.
#[derive(Debug, Clone)]
pub struct DataRow {
    /// The column names for this row (shared across all rows in a table)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<DbValue>,
    state: RowState,
    // Internal cache for faster column lookups (to avoid repeated string comparisons)
    #[doc(hidden)]
    pub(crate) column_index_cache: Arc<HashMap<String, usize>>,
}

impl PartialEq for DataRow {
    fn eq(&self, other: &Self) -> bool {
        self.column_names == other.column_names
            && self.values == other.values
            && self.state == other.state
    }
}

impl DataRow {
    /// Create a new row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<DbValue>) -> Self {
        let cache = Arc::new(build_index(&column_names));
        Self::with_cache(column_names, values, cache)
    }

    pub(crate) fn with_cache(
        column_names: Arc<Vec<String>>,
        values: Vec<DbValue>,
        column_index_cache: Arc<HashMap<String, usize>>,
    ) -> Self {
        Self {
            column_names,
            values,
            state: RowState::Unchanged,
            column_index_cache,
        }
    }

    /// Get the index of a column by name
    ///
    /// Exact matches come from the cache; otherwise the lookup falls back to a
    /// case-insensitive scan, matching how the server resolves column names.
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        if let Some(&idx) = self.column_index_cache.get(column_name) {
            return Some(idx);
        }

        self.column_names
            .iter()
            .position(|col| col.eq_ignore_ascii_case(column_name))
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&DbValue> {
        self.get_column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&DbValue> {
        self.values.get(index)
    }

    /// Overwrite a column value, marking an unchanged row as modified.
    ///
    /// Returns `false` when the column does not exist or the row holds no value for it.
    pub fn set(&mut self, column_name: &str, value: impl Into<DbValue>) -> bool {
        let Some(slot) = self
            .get_column_index(column_name)
            .and_then(|idx| self.values.get_mut(idx))
        else {
            return false;
        };
        *slot = value.into();
        if self.state == RowState::Unchanged {
            self.state = RowState::Modified;
        }
        true
    }

    /// Mark the row for deletion on the next push to the server.
    pub fn delete(&mut self) {
        self.state = RowState::Deleted;
    }

    #[must_use]
    pub fn state(&self) -> RowState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: RowState) {
        self.state = state;
    }

    /// Number of columns in the row
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) fn build_index(column_names: &[String]) -> HashMap<String, usize> {
    column_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect()
}
