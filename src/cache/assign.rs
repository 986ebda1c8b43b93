use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;

use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::results::DataRow;
use crate::types::DbValue;

/// A record whose fields can feed stored-procedure parameters by name.
pub trait FieldSource {
    /// Value of the named field, if the record has one.
    fn field(&self, name: &str) -> Option<DbValue>;

    /// True when the record has no fields at all.
    fn is_empty(&self) -> bool;
}

impl FieldSource for DataRow {
    fn field(&self, name: &str) -> Option<DbValue> {
        self.get(name).cloned()
    }

    fn is_empty(&self) -> bool {
        DataRow::is_empty(self)
    }
}

impl<S: BuildHasher> FieldSource for HashMap<String, DbValue, S> {
    fn field(&self, name: &str) -> Option<DbValue> {
        self.get(name).cloned()
    }

    fn is_empty(&self) -> bool {
        HashMap::is_empty(self)
    }
}

impl FieldSource for BTreeMap<String, DbValue> {
    fn field(&self, name: &str) -> Option<DbValue> {
        self.get(name).cloned()
    }

    fn is_empty(&self) -> bool {
        BTreeMap::is_empty(self)
    }
}

/// Bind positional values onto a parameter template, in declared order.
///
/// # Errors
/// Returns `SqlHelperError::InvalidArgument` when the value count differs from the parameter
/// count. Nothing is assigned in that case.
pub fn assign_values(
    parameters: &mut [SqlParameter],
    values: &[ParamArg],
) -> Result<(), SqlHelperError> {
    if parameters.len() != values.len() {
        return Err(SqlHelperError::InvalidArgument(format!(
            "Parameter count ({}) does not match parameter value count ({}).",
            parameters.len(),
            values.len()
        )));
    }

    for (parameter, value) in parameters.iter_mut().zip(values) {
        parameter.value = Some(value.clone().into_value());
    }
    Ok(())
}

/// Bind record fields onto a parameter template by name.
///
/// Each parameter's name without its marker prefix is looked up in `record`; parameters with no
/// matching field keep their current value.
///
/// # Errors
/// Returns `SqlHelperError::InvalidState` if any parameter name is too short to carry a field
/// name (one character or less). Nothing is assigned in that case.
pub fn assign_values_from_record<R: FieldSource + ?Sized>(
    parameters: &mut [SqlParameter],
    record: &R,
) -> Result<(), SqlHelperError> {
    if let Some((index, bad)) = parameters
        .iter()
        .enumerate()
        .find(|(_, p)| p.bound_name().is_none())
    {
        return Err(SqlHelperError::InvalidState(format!(
            "Please provide a valid parameter name on parameter #{index}, the name has the following value: '{}'.",
            bad.name
        )));
    }

    for parameter in parameters.iter_mut() {
        if let Some(value) = parameter.bound_name().and_then(|name| record.field(name)) {
            parameter.value = Some(value);
        }
    }
    Ok(())
}
