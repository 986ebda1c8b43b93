use crate::types::{DbValue, ParameterDirection};

/// A named command parameter.
///
/// Names carry the `@` marker prefix by convention; the record-binding helpers strip the first
/// character to find the matching field.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlParameter {
    pub name: String,
    pub direction: ParameterDirection,
    /// `None` until a value is assigned; `Some(DbValue::Null)` is an explicit NULL.
    pub value: Option<DbValue>,
    /// Declared server type, e.g. `nvarchar(50)`. Filled in by parameter discovery.
    pub sql_type: Option<String>,
    pub size: Option<i32>,
    /// Row field that feeds this parameter when a data set is pushed back to the server.
    pub source_column: Option<String>,
}

impl SqlParameter {
    #[must_use]
    pub fn new(name: impl Into<String>, direction: ParameterDirection) -> Self {
        Self {
            name: name.into(),
            direction,
            value: None,
            sql_type: None,
            size: None,
            source_column: None,
        }
    }

    /// Input parameter with a value (or `None` to leave it unassigned).
    pub fn input<V: Into<DbValue>>(name: impl Into<String>, value: Option<V>) -> Self {
        let mut p = Self::new(name, ParameterDirection::Input);
        p.value = value.map(Into::into);
        p
    }

    #[must_use]
    pub fn output(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self::new(name, ParameterDirection::Output).with_sql_type(sql_type)
    }

    #[must_use]
    pub fn return_value() -> Self {
        Self::new("@RETURN_VALUE", ParameterDirection::ReturnValue).with_sql_type("int")
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<DbValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_sql_type(mut self, sql_type: impl Into<String>) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_source_column(mut self, column: impl Into<String>) -> Self {
        self.source_column = Some(column.into());
        self
    }

    /// The name without its marker prefix, or `None` when nothing is left after stripping it.
    #[must_use]
    pub fn bound_name(&self) -> Option<&str> {
        let mut chars = self.name.chars();
        chars.next()?;
        let rest = chars.as_str();
        (!rest.is_empty()).then_some(rest)
    }

    /// Current value, treating an unassigned parameter as NULL.
    #[must_use]
    pub fn value_or_null(&self) -> DbValue {
        self.value.clone().unwrap_or(DbValue::Null)
    }
}

/// Look up a parameter by name, ignoring ASCII case like the server does.
#[must_use]
pub fn find_parameter<'a>(parameters: &'a [SqlParameter], name: &str) -> Option<&'a SqlParameter> {
    parameters
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Write values read back from the server into the matching non-input parameters.
pub(crate) fn apply_output_values(parameters: &mut [SqlParameter], outputs: &[(String, DbValue)]) {
    for (name, value) in outputs {
        if let Some(p) = parameters
            .iter_mut()
            .find(|p| p.direction.receives_value() && p.name.eq_ignore_ascii_case(name))
        {
            p.value = Some(value.clone());
        }
    }
}

/// A positional value for the stored-procedure convenience entry points.
///
/// Plain values bind as-is; a parameter-like argument contributes only its inner value, so a
/// caller can pass parameters built elsewhere without the helper adopting their name or direction.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamArg {
    Value(Option<DbValue>),
    Parameter(SqlParameter),
}

impl ParamArg {
    /// The value to bind, with absent values turned into the NULL marker.
    #[must_use]
    pub fn into_value(self) -> DbValue {
        match self {
            ParamArg::Value(v) => v.unwrap_or(DbValue::Null),
            ParamArg::Parameter(p) => p.value.unwrap_or(DbValue::Null),
        }
    }
}

impl From<SqlParameter> for ParamArg {
    fn from(value: SqlParameter) -> Self {
        ParamArg::Parameter(value)
    }
}

impl From<DbValue> for ParamArg {
    fn from(value: DbValue) -> Self {
        ParamArg::Value(Some(value))
    }
}

impl<T: Into<DbValue>> From<Option<T>> for ParamArg {
    fn from(value: Option<T>) -> Self {
        ParamArg::Value(value.map(Into::into))
    }
}

macro_rules! impl_from_for_param_arg {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for ParamArg {
                fn from(value: $source) -> Self {
                    ParamArg::Value(Some(DbValue::from(value)))
                }
            }
        )*
    };
}

impl_from_for_param_arg!(i64, i32, i16, f64, f32, String, &str, bool, chrono::NaiveDateTime, Vec<u8>);

/// Build a `Vec<ParamArg>` from heterogeneous values.
///
/// ```rust
/// use sql_helper::{param_args, prelude::*};
///
/// let args = param_args![24, "alice", None::<i64>];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! param_args {
    ($($value:expr),* $(,)?) => {
        vec![$($crate::parameter::ParamArg::from($value)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_name_strips_marker() {
        assert_eq!(SqlParameter::new("@id", ParameterDirection::Input).bound_name(), Some("id"));
        assert_eq!(SqlParameter::new("@", ParameterDirection::Input).bound_name(), None);
        assert_eq!(SqlParameter::new("", ParameterDirection::Input).bound_name(), None);
    }

    #[test]
    fn param_arg_unwraps_parameter_like_values() {
        let wrapped = ParamArg::from(SqlParameter::input("@other", Some(5)));
        assert_eq!(wrapped.into_value(), DbValue::Int(5));

        let empty = ParamArg::from(SqlParameter::new("@other", ParameterDirection::Input));
        assert_eq!(empty.into_value(), DbValue::Null);

        assert_eq!(ParamArg::from(None::<&str>).into_value(), DbValue::Null);
    }

    #[test]
    fn output_values_only_land_on_receiving_parameters() {
        let mut params = vec![
            SqlParameter::input("@id", Some(1)),
            SqlParameter::output("@total", "int"),
        ];
        apply_output_values(
            &mut params,
            &[
                ("@ID".to_string(), DbValue::Int(99)),
                ("@total".to_string(), DbValue::Int(3)),
            ],
        );
        assert_eq!(params[0].value, Some(DbValue::Int(1)));
        assert_eq!(params[1].value, Some(DbValue::Int(3)));
    }
}
