//! Helper utilities for testing and development.

use std::sync::Arc;

use crate::parameter::SqlParameter;
use crate::results::DataRow;
use crate::types::{DbValue, ParameterDirection};

/// Connection string understood by [`MemoryDriver`](super::MemoryDriver); any non-empty string
/// works, this one just reads well in tests.
pub const MEMORY_CONNECTION_STRING: &str = "Server=memory;Database=test;User Id=sa;Password=secret";

/// Create a test row with the given column names and values.
#[must_use]
pub fn create_test_row(column_names: Vec<String>, values: Vec<DbValue>) -> DataRow {
    DataRow::new(Arc::new(column_names), values)
}

/// Declared input parameters, typed `int`, for a scripted procedure.
#[must_use]
pub fn int_inputs(names: &[&str]) -> Vec<SqlParameter> {
    names
        .iter()
        .map(|name| SqlParameter::new(*name, ParameterDirection::Input).with_sql_type("int"))
        .collect()
}
