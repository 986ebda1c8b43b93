use super::SqlHelper;
use crate::backend::Command;
use crate::cache::FieldSource;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::target::Target;
use crate::types::{CommandType, DbValue};

impl SqlHelper {
    /// Execute a command and return the first column of the first row.
    ///
    /// An empty result yields `DbValue::Null`.
    ///
    /// # Errors
    /// Same as [`execute_non_query`](Self::execute_non_query).
    pub async fn execute_scalar<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut [SqlParameter],
    ) -> Result<DbValue, SqlHelperError> {
        let prepared = self
            .prepare(target.into(), command_text, parameters)
            .await?;
        let mut command = Command::new(command_type, command_text, parameters);
        let outcome = prepared.connection.execute_scalar(&mut command).await;
        Ok(prepared.finish(outcome).await?.unwrap_or(DbValue::Null))
    }

    /// # Errors
    /// As [`execute_scalar`](Self::execute_scalar) and
    /// [`execute_non_query_sp`](Self::execute_non_query_sp).
    pub async fn execute_scalar_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<DbValue, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.execute_scalar(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// # Errors
    /// As [`execute_scalar`](Self::execute_scalar) and
    /// [`execute_non_query_typed_params`](Self::execute_non_query_typed_params).
    pub async fn execute_scalar_typed_params<'a, R: FieldSource + ?Sized>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        record: &R,
    ) -> Result<DbValue, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .record_parameters(target, procedure_name, record)
            .await?;
        self.execute_scalar(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }
}
