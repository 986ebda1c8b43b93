use tracing::{debug, warn};

use super::SqlHelper;
use crate::connection::SqlConnection;
use crate::error::{FINISHED_TRANSACTION_MESSAGE, SqlHelperError};
use crate::parameter::SqlParameter;
use crate::target::Target;
use crate::types::DbValue;

/// An open connection ready to run a command, plus whether the helper owns it.
pub(crate) struct PreparedConnection {
    pub(crate) connection: SqlConnection,
    pub(crate) must_close: bool,
}

impl PreparedConnection {
    /// Close an owned connection and hand back the command's outcome.
    ///
    /// A close failure only surfaces when the command itself succeeded.
    pub(crate) async fn finish<T>(
        self,
        outcome: Result<T, SqlHelperError>,
    ) -> Result<T, SqlHelperError> {
        if !self.must_close {
            return outcome;
        }
        debug!("closing connection opened for this call");
        match (self.connection.close().await, outcome) {
            (Ok(()), outcome) => outcome,
            (Err(close_err), Ok(_)) => Err(close_err),
            (Err(close_err), Err(e)) => {
                warn!(error = %close_err, "failed to close connection after a failed command");
                Err(e)
            }
        }
    }
}

impl SqlHelper {
    /// Resolve a target to an open connection and normalize the parameters.
    ///
    /// Validation happens before any I/O.
    pub(crate) async fn prepare(
        &self,
        target: Target<'_>,
        command_text: &str,
        parameters: &mut [SqlParameter],
    ) -> Result<PreparedConnection, SqlHelperError> {
        if command_text.is_empty() {
            return Err(SqlHelperError::argument_null("command text"));
        }
        target.connection_identity()?;

        let prepared = match target {
            Target::ConnectionString(cs) => {
                let connection = self.connection(cs)?;
                connection.open().await?;
                PreparedConnection {
                    connection,
                    must_close: true,
                }
            }
            Target::Connection(conn) => {
                let must_close = !conn.is_open().await;
                if must_close {
                    conn.open().await?;
                }
                PreparedConnection {
                    connection: conn.clone(),
                    must_close,
                }
            }
            Target::Transaction(tx) => {
                let connection = tx.connection().ok_or_else(|| {
                    SqlHelperError::InvalidState(FINISHED_TRANSACTION_MESSAGE.into())
                })?;
                if !connection.is_open().await {
                    return Err(SqlHelperError::InvalidState(
                        "the transaction's connection is closed".into(),
                    ));
                }
                PreparedConnection {
                    connection: connection.clone(),
                    must_close: false,
                }
            }
        };
        debug!(owned = prepared.must_close, "prepared connection");

        normalize_parameters(parameters);
        Ok(prepared)
    }
}

/// Unassigned values on parameters the server reads become an explicit NULL.
pub(crate) fn normalize_parameters(parameters: &mut [SqlParameter]) {
    for parameter in parameters
        .iter_mut()
        .filter(|p| p.direction.sends_value() && p.value.is_none())
    {
        parameter.value = Some(DbValue::Null);
    }
}
