use serde_json::{Map, Value as JsonValue};

use super::table::DataTable;

/// Name given to the first unmapped result set; later ones get `Table1`, `Table2`, ...
pub const DEFAULT_TABLE_NAME: &str = "Table";

/// The auto-generated name of the result set at `index`.
#[must_use]
pub fn default_table_name(index: usize) -> String {
    if index == 0 {
        DEFAULT_TABLE_NAME.to_string()
    } else {
        format!("{DEFAULT_TABLE_NAME}{index}")
    }
}

/// Ordered collection of named tables produced by one or more fills.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSet {
    tables: Vec<DataTable>,
}

impl DataSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tables(&self) -> &[DataTable] {
        &self.tables
    }

    #[must_use]
    pub fn table(&self, name: &str) -> Option<&DataTable> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut DataTable> {
        self.tables
            .iter_mut()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Add a table, appending its rows to an existing table of the same name.
    pub fn add_or_merge(&mut self, table: DataTable) {
        match self.table_mut(&table.name) {
            Some(existing) if existing.column_names() == table.column_names() => {
                existing.merge(table);
            }
            _ => self.tables.push(table),
        }
    }

    pub fn accept_changes(&mut self) {
        for table in &mut self.tables {
            table.accept_changes();
        }
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::with_capacity(self.tables.len());
        for table in &self.tables {
            obj.insert(table.name.clone(), table.to_json());
        }
        JsonValue::Object(obj)
    }
}

impl IntoIterator for DataSet {
    type Item = DataTable;
    type IntoIter = std::vec::IntoIter<DataTable>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}
