use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::Serialize;
use serde_json::Value as JsonValue;

/// Values that can be bound to a parameter or read back from a row.
///
/// `DbValue::Null` is the explicit "no value" marker sent to the server. A parameter whose
/// value was never assigned holds `None` instead and is normalized to `Null` before execution:
/// ```rust
/// use sql_helper::prelude::*;
///
/// let mut p = SqlParameter::input("@name", None::<DbValue>);
/// assert!(p.value.is_none());
/// p.value = Some(DbValue::Null);
/// assert!(p.value.as_ref().is_some_and(DbValue::is_null));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// JSON value
    Json(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
    /// Explicit database NULL
    Null,
}

impl DbValue {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let DbValue::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let DbValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let DbValue::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let DbValue::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS.SSS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S.%3f") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let DbValue::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let DbValue::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Parse a command-line literal: `null`, integers, floats, `true`/`false`, otherwise text.
    #[must_use]
    pub fn parse_literal(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("null") {
            return DbValue::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return DbValue::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return DbValue::Float(f);
        }
        match raw {
            "true" => DbValue::Bool(true),
            "false" => DbValue::Bool(false),
            _ => DbValue::Text(raw.to_string()),
        }
    }

    /// Render as JSON for display; blobs become arrays of bytes.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

macro_rules! impl_from_for_db_value {
    ($($source:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$source> for DbValue {
                fn from(value: $source) -> Self {
                    DbValue::$variant(value.into())
                }
            }
        )*
    };
}

impl_from_for_db_value! {
    i64 => Int,
    i32 => Int,
    i16 => Int,
    f64 => Float,
    f32 => Float,
    String => Text,
    &str => Text,
    bool => Bool,
    NaiveDateTime => Timestamp,
    JsonValue => Json,
    Vec<u8> => Blob,
}

/// How the command text is interpreted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum CommandType {
    /// A SQL statement or batch
    Text,
    /// The name of a stored procedure
    StoredProcedure,
}

/// Direction of a command parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    /// The procedure's integer return code
    ReturnValue,
}

impl ParameterDirection {
    /// Directions whose value is sent to the server.
    #[must_use]
    pub fn sends_value(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }

    /// Directions whose value is read back from the server.
    #[must_use]
    pub fn receives_value(self) -> bool {
        !matches!(self, Self::Input)
    }
}

/// Which shape of cursor a reader is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Plain row cursor
    Rows,
    /// `FOR XML` output delivered as text fragments
    Xml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_parse_to_the_narrowest_value() {
        assert_eq!(DbValue::parse_literal("NULL"), DbValue::Null);
        assert_eq!(DbValue::parse_literal("42"), DbValue::Int(42));
        assert_eq!(DbValue::parse_literal("4.5"), DbValue::Float(4.5));
        assert_eq!(DbValue::parse_literal("true"), DbValue::Bool(true));
        assert_eq!(
            DbValue::parse_literal("alice"),
            DbValue::Text("alice".into())
        );
    }

    #[test]
    fn int_reads_as_bool_only_for_zero_and_one() {
        assert_eq!(DbValue::Int(1).as_bool(), Some(&true));
        assert_eq!(DbValue::Int(0).as_bool(), Some(&false));
        assert_eq!(DbValue::Int(2).as_bool(), None);
    }

    #[test]
    fn null_serializes_as_json_null() {
        assert_eq!(DbValue::Null.to_json(), JsonValue::Null);
        assert_eq!(DbValue::Int(7).to_json(), serde_json::json!(7));
    }
}
