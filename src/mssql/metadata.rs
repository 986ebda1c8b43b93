use futures_util::TryStreamExt;
use tiberius::{Query, Row};

use super::client::MssqlClient;
use crate::error::SqlHelperError;
use crate::parameter::SqlParameter;
use crate::types::ParameterDirection;

const PROCEDURE_PARAMETERS_SQL: &str = "\
SELECT p.name, TYPE_NAME(p.user_type_id), p.max_length, p.precision, p.scale, p.is_output
FROM sys.parameters AS p
WHERE p.object_id = OBJECT_ID(@P1) AND p.parameter_id > 0
ORDER BY p.parameter_id";

/// Read a stored procedure's declared parameters from the catalog, return value first.
///
/// # Errors
/// Returns `SqlHelperError::DependencyFailure` when the procedure does not exist or the catalog
/// query fails.
pub(crate) async fn derive_parameters(
    client: &mut MssqlClient,
    procedure_name: &str,
) -> Result<Vec<SqlParameter>, SqlHelperError> {
    let mut exists = Query::new("SELECT OBJECT_ID(@P1)");
    exists.bind(procedure_name.to_string());
    let row = exists
        .query(client)
        .await
        .map_err(catalog_error)?
        .into_row()
        .await
        .map_err(catalog_error)?;
    let object_id: Option<i32> = match &row {
        Some(row) => row.try_get(0).map_err(catalog_error)?,
        None => None,
    };
    if object_id.is_none() {
        return Err(SqlHelperError::DependencyFailure(format!(
            "Could not find stored procedure '{procedure_name}'."
        )));
    }

    let mut query = Query::new(PROCEDURE_PARAMETERS_SQL);
    query.bind(procedure_name.to_string());
    let mut rows = query
        .query(client)
        .await
        .map_err(catalog_error)?
        .into_row_stream();

    let mut parameters = vec![SqlParameter::return_value()];
    while let Some(row) = rows.try_next().await.map_err(catalog_error)? {
        parameters.push(parameter_from_row(&row)?);
    }
    Ok(parameters)
}

fn parameter_from_row(row: &Row) -> Result<SqlParameter, SqlHelperError> {
    let missing = |column: &str| {
        SqlHelperError::DependencyFailure(format!("sys.parameters returned no {column}"))
    };
    let name: &str = row
        .try_get(0)
        .map_err(catalog_error)?
        .ok_or_else(|| missing("name"))?;
    let type_name: &str = row
        .try_get(1)
        .map_err(catalog_error)?
        .ok_or_else(|| missing("type"))?;
    let max_length: i16 = row.try_get(2).map_err(catalog_error)?.unwrap_or(0);
    let precision: u8 = row.try_get(3).map_err(catalog_error)?.unwrap_or(0);
    let scale: u8 = row.try_get(4).map_err(catalog_error)?.unwrap_or(0);
    let is_output: bool = row.try_get(5).map_err(catalog_error)?.unwrap_or(false);

    let direction = if is_output {
        ParameterDirection::InputOutput
    } else {
        ParameterDirection::Input
    };
    let (sql_type, size) = type_declaration(type_name, max_length, precision, scale);
    let mut parameter = SqlParameter::new(name, direction).with_sql_type(sql_type);
    parameter.size = size;
    Ok(parameter)
}

/// Full type declaration plus the size in characters (or bytes) for sized types.
fn type_declaration(
    type_name: &str,
    max_length: i16,
    precision: u8,
    scale: u8,
) -> (String, Option<i32>) {
    let lower = type_name.to_ascii_lowercase();
    match lower.as_str() {
        "nvarchar" | "nchar" => {
            if max_length < 0 {
                (format!("{lower}(max)"), Some(-1))
            } else {
                let chars = i32::from(max_length) / 2;
                (format!("{lower}({chars})"), Some(chars))
            }
        }
        "varchar" | "char" | "varbinary" | "binary" => {
            if max_length < 0 {
                (format!("{lower}(max)"), Some(-1))
            } else {
                (format!("{lower}({max_length})"), Some(i32::from(max_length)))
            }
        }
        "decimal" | "numeric" => (format!("{lower}({precision}, {scale})"), None),
        "datetime2" | "datetimeoffset" | "time" => (format!("{lower}({scale})"), None),
        _ => (type_name.to_string(), None),
    }
}

fn catalog_error(err: impl std::fmt::Display) -> SqlHelperError {
    SqlHelperError::DependencyFailure(format!("SQL Server parameter discovery error: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sized_types_render_their_length() {
        assert_eq!(
            type_declaration("nvarchar", 100, 0, 0),
            ("nvarchar(50)".to_string(), Some(50))
        );
        assert_eq!(
            type_declaration("varbinary", -1, 0, 0),
            ("varbinary(max)".to_string(), Some(-1))
        );
        assert_eq!(
            type_declaration("decimal", 9, 18, 4),
            ("decimal(18, 4)".to_string(), None)
        );
        assert_eq!(type_declaration("int", 4, 10, 0), ("int".to_string(), None));
    }
}
