use tracing::warn;

use super::SqlHelper;
use crate::backend::Command;
use crate::cache::FieldSource;
use crate::cursor::SqlDataReader;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::target::Target;
use crate::types::{CommandType, ParameterDirection, ReadMode};

impl SqlHelper {
    /// Execute a command and open a forward-only reader over its first result set.
    ///
    /// While another reader holds the connection the open is retried up to
    /// `cursor_retry_limit` times, `cursor_retry_pause` apart. When every parameter is an input
    /// parameter `parameters` is left untouched; otherwise the parameters move into the reader,
    /// which fills in output values once its rows are exhausted.
    ///
    /// # Errors
    /// - `SqlHelperError::ResourceBusy` if the connection still has an open reader after the
    ///   last retry
    /// - otherwise as [`execute_non_query`](Self::execute_non_query)
    pub async fn execute_reader<'a>(
        &self,
        target: impl Into<Target<'a>>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut Vec<SqlParameter>,
    ) -> Result<SqlDataReader, SqlHelperError> {
        self.open_reader(
            target.into(),
            command_type,
            command_text,
            parameters,
            ReadMode::Rows,
        )
        .await
    }

    /// Open a reader over a stored procedure called with positional values.
    ///
    /// # Errors
    /// As [`execute_reader`](Self::execute_reader) and
    /// [`execute_non_query_sp`](Self::execute_non_query_sp).
    pub async fn execute_reader_sp<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<SqlDataReader, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .positional_parameters(target, procedure_name, values)
            .await?;
        self.execute_reader(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    /// Open a reader over a stored procedure bound from a record.
    ///
    /// # Errors
    /// As [`execute_reader`](Self::execute_reader) and
    /// [`execute_non_query_typed_params`](Self::execute_non_query_typed_params).
    pub async fn execute_reader_typed_params<'a, R: FieldSource + ?Sized>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        record: &R,
    ) -> Result<SqlDataReader, SqlHelperError> {
        let target = target.into();
        let mut parameters = self
            .record_parameters(target, procedure_name, record)
            .await?;
        self.execute_reader(
            target,
            CommandType::StoredProcedure,
            procedure_name,
            &mut parameters,
        )
        .await
    }

    pub(crate) async fn open_reader(
        &self,
        target: Target<'_>,
        command_type: CommandType,
        command_text: &str,
        parameters: &mut Vec<SqlParameter>,
        mode: ReadMode,
    ) -> Result<SqlDataReader, SqlHelperError> {
        let prepared = self.prepare(target, command_text, parameters).await?;

        let mut retries = 0;
        let (cursor, cursor_token) = loop {
            let mut command = Command::new(command_type, command_text, parameters);
            match prepared.connection.open_cursor(&mut command, mode).await {
                Ok(opened) => break opened,
                Err(e) if e.is_resource_busy() && retries < self.options.cursor_retry_limit => {
                    retries += 1;
                    warn!(
                        attempt = retries,
                        limit = self.options.cursor_retry_limit,
                        "connection has an open reader, retrying"
                    );
                    tokio::time::sleep(self.options.cursor_retry_pause).await;
                }
                Err(e) => return prepared.finish(Err(e)).await,
            }
        };

        let carried = if parameters
            .iter()
            .all(|p| p.direction == ParameterDirection::Input)
        {
            Vec::new()
        } else {
            std::mem::take(parameters)
        };

        Ok(SqlDataReader::new(
            prepared.connection,
            cursor,
            cursor_token,
            carried,
            prepared.must_close,
        ))
    }
}
