use std::fmt::Write;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, Query, QueryItem};

use super::client::MssqlClient;
use crate::backend::Command;
use crate::error::SqlHelperError;
use crate::parameter::SqlParameter;
use crate::results::DataTable;
use crate::types::{CommandType, DbValue, ParameterDirection};

/// Column carrying `@@ROWCOUNT` in the trailing result set of a batch.
const ROWCOUNT_COLUMN: &str = "__rows_affected";

/// A command rewritten into a T-SQL batch with positional `@Pn` placeholders.
///
/// Named parameters become local variables so the command text (or `EXEC`) can refer to them by
/// name, and values the server writes back are selected in one trailing result set.
#[derive(Debug)]
pub(crate) struct Batch {
    pub(crate) sql: String,
    values: Vec<DbValue>,
    has_trailer: bool,
}

/// What a batch produced once its trailing result set has been peeled off.
#[derive(Debug, Default)]
pub(crate) struct BatchOutput {
    pub(crate) tables: Vec<DataTable>,
    pub(crate) outputs: Vec<(String, DbValue)>,
    pub(crate) rows_affected: Option<usize>,
}

impl Batch {
    /// Build the batch for `command`. With `capture_rowcount` the trailer also reports
    /// `@@ROWCOUNT` of the command body.
    pub(crate) fn build(command: &Command<'_>, capture_rowcount: bool) -> Self {
        let mut sql = String::new();
        let mut values = Vec::new();

        match command.command_type {
            CommandType::Text => {
                for p in command.parameters.iter() {
                    let var = variable_name(&p.name);
                    let _ = write!(sql, "DECLARE {var} {}", declared_type(p));
                    if p.direction.sends_value() {
                        let placeholder = bind(&mut values, p);
                        let _ = write!(sql, " = {placeholder}");
                    }
                    sql.push_str(";\n");
                }
                sql.push_str(command.text);
                sql.push('\n');
            }
            CommandType::StoredProcedure => {
                let mut args = Vec::new();
                let mut return_var = None;
                for p in command.parameters.iter() {
                    let var = variable_name(&p.name);
                    match p.direction {
                        ParameterDirection::Input => {
                            let placeholder = bind(&mut values, p);
                            args.push(format!("{var} = {placeholder}"));
                        }
                        ParameterDirection::InputOutput => {
                            let placeholder = bind(&mut values, p);
                            let _ = writeln!(
                                sql,
                                "DECLARE {var} {} = {placeholder};",
                                declared_type(p)
                            );
                            args.push(format!("{var} = {var} OUTPUT"));
                        }
                        ParameterDirection::Output => {
                            let _ = writeln!(sql, "DECLARE {var} {};", declared_type(p));
                            args.push(format!("{var} = {var} OUTPUT"));
                        }
                        ParameterDirection::ReturnValue => {
                            let _ = writeln!(sql, "DECLARE {var} int;");
                            return_var = Some(var);
                        }
                    }
                }
                sql.push_str("EXEC ");
                if let Some(var) = return_var {
                    let _ = write!(sql, "{var} = ");
                }
                sql.push_str(command.text);
                if !args.is_empty() {
                    sql.push(' ');
                    sql.push_str(&args.join(", "));
                }
                sql.push_str(";\n");
            }
        }

        let mut trailer: Vec<String> = command
            .parameters
            .iter()
            .filter(|p| p.direction.receives_value())
            .map(|p| format!("{} AS [{}]", variable_name(&p.name), p.name.replace(']', "]]")))
            .collect();
        if capture_rowcount {
            trailer.push(format!("@@ROWCOUNT AS [{ROWCOUNT_COLUMN}]"));
        }
        let has_trailer = !trailer.is_empty();
        if has_trailer {
            let _ = write!(sql, "SELECT {};", trailer.join(", "));
        }

        Self {
            sql,
            values,
            has_trailer,
        }
    }

    fn to_query(&self) -> Query<'_> {
        bind_query_params(&self.sql, &self.values)
    }

    /// Run the batch and collect every result set.
    pub(crate) async fn run(&self, client: &mut MssqlClient) -> Result<BatchOutput, SqlHelperError> {
        let mut stream = self.to_query().query(client).await.map_err(|e| {
            SqlHelperError::DependencyFailure(format!("SQL Server query error: {e}"))
        })?;

        let mut tables: Vec<DataTable> = Vec::new();
        while let Some(item) = stream.try_next().await.map_err(|e| {
            SqlHelperError::DependencyFailure(format!("SQL Server row fetch error: {e}"))
        })? {
            match item {
                QueryItem::Metadata(meta) => {
                    let column_names = meta.columns().iter().map(|c| c.name().to_string()).collect();
                    tables.push(DataTable::new("", column_names));
                }
                QueryItem::Row(row) => {
                    let values = row
                        .cells()
                        .map(|(_, data)| extract_value(data))
                        .collect::<Result<Vec<_>, _>>()?;
                    if let Some(table) = tables.last_mut() {
                        table.add_row_values(values);
                    }
                }
            }
        }

        let mut output = BatchOutput::default();
        if self.has_trailer {
            let trailer = tables.pop().ok_or_else(|| {
                SqlHelperError::DependencyFailure(
                    "SQL Server did not return the output parameter values".into(),
                )
            })?;
            if let Some(row) = trailer.rows().first() {
                for (name, value) in trailer.column_names().iter().zip(&row.values) {
                    if name == ROWCOUNT_COLUMN {
                        output.rows_affected = value.as_int().map(|n| usize::try_from(*n).unwrap_or(0));
                    } else {
                        output.outputs.push((name.clone(), value.clone()));
                    }
                }
            }
        }
        output.tables = tables;
        Ok(output)
    }

    /// Run a batch that returns no rows and report the rows affected.
    pub(crate) async fn execute(&self, client: &mut MssqlClient) -> Result<usize, SqlHelperError> {
        let exec_result = self.to_query().execute(client).await.map_err(|e| {
            SqlHelperError::DependencyFailure(format!("SQL Server execute error: {e}"))
        })?;
        let rows_affected: u64 = exec_result.rows_affected().iter().sum();
        convert_affected_rows(rows_affected)
    }
}

fn bind(values: &mut Vec<DbValue>, parameter: &SqlParameter) -> String {
    values.push(parameter.value_or_null());
    format!("@P{}", values.len())
}

/// Run a statement with no parameters and no result, such as `BEGIN TRANSACTION`.
pub(crate) async fn execute_statement(
    client: &mut MssqlClient,
    statement: &'static str,
) -> Result<(), SqlHelperError> {
    Query::new(statement).execute(client).await.map_err(|e| {
        SqlHelperError::DependencyFailure(format!("SQL Server error running {statement}: {e}"))
    })?;
    Ok(())
}

/// Bind parameters directly to the query for SQL Server
pub(crate) fn bind_query_params<'a>(query: &'a str, params: &[DbValue]) -> Query<'a> {
    let mut query_builder = Query::new(query);

    for param in params {
        match param {
            DbValue::Int(i) => query_builder.bind(*i),
            DbValue::Float(f) => query_builder.bind(*f),
            DbValue::Text(s) => query_builder.bind(s.clone()),
            DbValue::Bool(b) => query_builder.bind(*b),
            DbValue::Timestamp(dt) => query_builder.bind(*dt),
            DbValue::Null => query_builder.bind(Option::<String>::None),
            DbValue::Json(jsval) => query_builder.bind(jsval.to_string()),
            DbValue::Blob(bytes) => query_builder.bind(bytes.clone()),
        }
    }

    query_builder
}

/// Convert one cell to a [`DbValue`].
pub(crate) fn extract_value(data: &ColumnData<'static>) -> Result<DbValue, SqlHelperError> {
    let value = match data {
        ColumnData::U8(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(DbValue::Null, |v| DbValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(DbValue::Null, DbValue::Int),
        ColumnData::F32(v) => v.map_or(DbValue::Null, |v| DbValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(DbValue::Null, DbValue::Float),
        ColumnData::Bit(v) => v.map_or(DbValue::Null, DbValue::Bool),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(DbValue::Null, |s| DbValue::Text(s.to_string())),
        ColumnData::Guid(v) => v.map_or(DbValue::Null, |g| DbValue::Text(g.to_string())),
        ColumnData::Binary(v) => v
            .as_ref()
            .map_or(DbValue::Null, |b| DbValue::Blob(b.to_vec())),
        ColumnData::Numeric(v) => v.map_or(DbValue::Null, |n| DbValue::Float(f64::from(n))),
        ColumnData::Xml(v) => v
            .as_ref()
            .map_or(DbValue::Null, |x| DbValue::Text((**x).clone().into_string())),
        other => temporal_value(other)?,
    };
    Ok(value)
}

fn temporal_value(data: &ColumnData<'static>) -> Result<DbValue, SqlHelperError> {
    if let Ok(value) = NaiveDateTime::from_sql(data) {
        return Ok(value.map_or(DbValue::Null, DbValue::Timestamp));
    }
    if let Ok(value) = NaiveDate::from_sql(data) {
        return Ok(value
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map_or(DbValue::Null, DbValue::Timestamp));
    }
    if let Ok(value) = DateTime::<FixedOffset>::from_sql(data) {
        return Ok(value.map_or(DbValue::Null, |dt| DbValue::Timestamp(dt.naive_utc())));
    }
    if let Ok(value) = NaiveTime::from_sql(data) {
        return Ok(value.map_or(DbValue::Null, |t| DbValue::Text(t.to_string())));
    }
    Err(SqlHelperError::DependencyFailure(format!(
        "unsupported SQL Server column type: {data:?}"
    )))
}

/// Name of the local variable standing in for a parameter.
pub(crate) fn variable_name(name: &str) -> String {
    if name.starts_with('@') {
        name.to_string()
    } else {
        format!("@{name}")
    }
}

/// Declared type of a parameter variable: the discovered type, else one inferred from the value.
pub(crate) fn declared_type(parameter: &SqlParameter) -> String {
    if let Some(sql_type) = &parameter.sql_type {
        return sql_type.clone();
    }
    match parameter.value.as_ref() {
        Some(DbValue::Int(_)) => "bigint".into(),
        Some(DbValue::Float(_)) => "float".into(),
        Some(DbValue::Bool(_)) => "bit".into(),
        Some(DbValue::Timestamp(_)) => "datetime2".into(),
        Some(DbValue::Blob(_)) => "varbinary(max)".into(),
        Some(DbValue::Text(_) | DbValue::Json(_) | DbValue::Null) | None => match parameter.size {
            Some(size) if size > 0 => format!("nvarchar({size})"),
            _ => "nvarchar(max)".into(),
        },
    }
}

fn convert_affected_rows(rows_affected: u64) -> Result<usize, SqlHelperError> {
    usize::try_from(rows_affected).map_err(|e| {
        SqlHelperError::DependencyFailure(format!("Invalid rows affected count: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn procedure_batch_declares_only_receiving_parameters() {
        let mut params = vec![
            SqlParameter::return_value(),
            SqlParameter::input("@id", Some(7)).with_sql_type("int"),
            SqlParameter::output("@total", "money"),
        ];
        let command = Command::new(CommandType::StoredProcedure, "dbo.GetTotal", &mut params);
        let batch = Batch::build(&command, false);
        assert_eq!(
            batch.sql,
            "DECLARE @RETURN_VALUE int;\n\
             DECLARE @total money;\n\
             EXEC @RETURN_VALUE = dbo.GetTotal @id = @P1, @total = @total OUTPUT;\n\
             SELECT @RETURN_VALUE AS [@RETURN_VALUE], @total AS [@total];"
        );
        assert_eq!(batch.values, vec![DbValue::Int(7)]);
    }

    #[test]
    fn text_batch_declares_named_parameters() {
        let mut params = vec![SqlParameter::input("@name", Some("alice"))];
        let command = Command::new(
            CommandType::Text,
            "SELECT * FROM people WHERE name = @name",
            &mut params,
        );
        let batch = Batch::build(&command, false);
        assert_eq!(
            batch.sql,
            "DECLARE @name nvarchar(max) = @P1;\nSELECT * FROM people WHERE name = @name\n"
        );
        assert!(!batch.has_trailer);
    }

    #[test]
    fn rowcount_capture_adds_a_trailer() {
        let mut params = Vec::new();
        let command = Command::new(CommandType::StoredProcedure, "dbo.Touch", &mut params);
        let batch = Batch::build(&command, true);
        assert!(batch.sql.ends_with("SELECT @@ROWCOUNT AS [__rows_affected];"));
        assert!(batch.has_trailer);
    }
}
