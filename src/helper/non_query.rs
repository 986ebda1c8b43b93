use super::SqlHelper;
use crate::backend::Command;
use crate::cache::FieldSource;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::target::Target;
use crate::types::CommandType;

impl SqlHelper {
    /// Execute a command that returns no rows.
    ///
    /// Output and return values are written back into `parameters`.
    ///
    /// # Errors
    /// - `SqlHelperError::InvalidArgument` for empty command text or connection string
    /// - `SqlHelperError::InvalidState` for a finished transaction
    /// - the backend's error if the command fails
    pub async fn execute_non_query<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut [SqlParameter],
    ) -> Result<usize, SqlHelperError> {
        let prepared = self
            .prepare(target.into(), command_text, parameters)
            .await?;
        let mut command = Command::new(command_type, command_text, parameters);
        let outcome = prepared.connection.execute_non_query(&mut command).await;
        prepared.finish(outcome).await
    }

    /// Execute a stored procedure with positional values.
    ///
    /// # Errors
    /// As [`execute_non_query`](Self::execute_non_query), plus `InvalidArgument` when the value
    /// count differs from the procedure's parameter count.
    pub async fn execute_non_query_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<usize, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.execute_non_query(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// Execute a stored procedure with parameters bound from a record's fields.
    ///
    /// # Errors
    /// As [`execute_non_query`](Self::execute_non_query), plus `InvalidState` for a parameter
    /// name too short to match a field.
    pub async fn execute_non_query_typed_params<'a, R: FieldSource + ?Sized>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        record: &R,
    ) -> Result<usize, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .record_parameters(target, procedure_name, record)
            .await?;
        self.execute_non_query(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }
}
