use tracing::debug;

use super::SqlHelper;
use crate::connection::SqlConnection;
use crate::error::SqlHelperError;
use crate::parameter::SqlParameter;
use crate::results::{DataRow, DataSet, RowState};
use crate::types::CommandType;

/// A stored-procedure command bound to a connection, with parameters that read their values
/// from row fields.
///
/// Built by [`SqlHelper::create_command`] and consumed by [`SqlHelper::update_dataset`].
#[derive(Debug, Clone)]
pub struct PreparedCommand {
    pub connection: SqlConnection,
    pub command_type: CommandType,
    pub command_text: String,
    pub parameters: Vec<SqlParameter>,
}

impl PreparedCommand {
    /// Parameters for one row: each parameter with a source column takes that field's value.
    fn bind_row(&self, row: &DataRow) -> Vec<SqlParameter> {
        let mut parameters = self.parameters.clone();
        for parameter in parameters
            .iter_mut()
            .filter(|p| p.direction.sends_value())
        {
            if let Some(value) = parameter.source_column.as_deref().and_then(|c| row.get(c)) {
                parameter.value = Some(value.clone());
            }
        }
        parameters
    }
}

impl SqlHelper {
    /// Build a stored-procedure command whose discovered parameters are fed from
    /// `source_columns`, by position.
    ///
    /// With no source columns the command carries no parameters and nothing is discovered.
    ///
    /// # Errors
    /// - `SqlHelperError::InvalidArgument` for an empty procedure name, or more source columns
    ///   than the procedure has parameters
    /// - `SqlHelperError::DependencyFailure` if discovery fails
    pub async fn create_command(
        &self,
        connection: &SqlConnection,
        procedure_name: &str,
        source_columns: &[&str],
    ) -> Result<PreparedCommand, SqlHelperError> {
        if procedure_name.is_empty() {
            return Err(SqlHelperError::argument_null("procedure name"));
        }

        let mut parameters = Vec::new();
        if !source_columns.is_empty() {
            parameters = self
                .cache
                .get_sp_parameter_set(connection, procedure_name)
                .await?;
            if source_columns.len() > parameters.len() {
                return Err(SqlHelperError::InvalidArgument(format!(
                    "{} source columns given but {procedure_name} declares {} parameters",
                    source_columns.len(),
                    parameters.len()
                )));
            }
            for (parameter, column) in parameters.iter_mut().zip(source_columns) {
                parameter.source_column = Some((*column).to_string());
            }
        }

        Ok(PreparedCommand {
            connection: connection.clone(),
            command_type: CommandType::StoredProcedure,
            command_text: procedure_name.to_string(),
            parameters,
        })
    }

    /// Push the pending changes of one table back to the server, then accept them.
    ///
    /// Added rows run through `insert`, modified rows through `update` and deleted rows through
    /// `delete`. Output parameters with a source column write their value back into the row.
    /// Returns the total number of rows affected.
    ///
    /// # Errors
    /// - `SqlHelperError::InvalidArgument` for an empty table name or a table not in `data_set`
    /// - `SqlHelperError::DependencyFailure` when an update or delete affects no rows
    /// - the backend's error if a command fails; changes already pushed stay pushed and the data
    ///   set is left unaccepted
    pub async fn update_dataset(
        &self,
        insert: &PreparedCommand,
        delete: &PreparedCommand,
        update: &PreparedCommand,
        data_set: &mut DataSet,
        table_name: &str,
    ) -> Result<usize, SqlHelperError> {
        if table_name.is_empty() {
            return Err(SqlHelperError::argument_null("table name"));
        }
        let table = data_set.table_mut(table_name).ok_or_else(|| {
            SqlHelperError::InvalidArgument(format!("no table named {table_name} in the data set"))
        })?;

        let mut affected = 0;
        for row in table.rows_mut() {
            let (command, kind) = match row.state() {
                RowState::Unchanged => continue,
                RowState::Added => (insert, "insert"),
                RowState::Modified => (update, "update"),
                RowState::Deleted => (delete, "delete"),
            };
            let mut parameters = command.bind_row(row);
            let count = self
                .execute_non_query(
                    &command.connection,
                    command.command_type,
                    &command.command_text,
                    &mut parameters,
                )
                .await?;
            if count == 0 && row.state() != RowState::Added {
                return Err(SqlHelperError::DependencyFailure(format!(
                    "Concurrency violation: the {kind} command affected 0 of the expected 1 records."
                )));
            }
            affected += count;

            for parameter in parameters.iter().filter(|p| p.direction.receives_value()) {
                if let (Some(column), Some(value)) = (&parameter.source_column, &parameter.value) {
                    row.set(column, value.clone());
                }
            }
        }
        debug!(table = table_name, affected, "pushed data set changes");

        data_set.accept_changes();
        Ok(affected)
    }
}
