use crate::connection::{SqlConnection, SqlTransaction};
use crate::error::{FINISHED_TRANSACTION_MESSAGE, SqlHelperError};

/// What a command runs against.
///
/// Each case carries exactly the handle the caller owns. A connection string means the helper
/// opens (and later closes) its own connection; a connection or transaction is used as-is.
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    ConnectionString(&'a str),
    Connection(&'a SqlConnection),
    Transaction(&'a SqlTransaction),
}

impl Target<'_> {
    /// Connection string identifying the database, used as the parameter cache key.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string and
    /// `SqlHelperError::InvalidState` for a finished transaction.
    pub fn connection_identity(&self) -> Result<&str, SqlHelperError> {
        let identity = match self {
            Target::ConnectionString(cs) => *cs,
            Target::Connection(conn) => conn.connection_string(),
            Target::Transaction(tx) => tx
                .connection()
                .ok_or_else(|| SqlHelperError::InvalidState(FINISHED_TRANSACTION_MESSAGE.into()))?
                .connection_string(),
        };
        if identity.is_empty() {
            return Err(SqlHelperError::argument_null("connection string"));
        }
        Ok(identity)
    }
}

impl<'a> From<&'a str> for Target<'a> {
    fn from(value: &'a str) -> Self {
        Target::ConnectionString(value)
    }
}

impl<'a> From<&'a String> for Target<'a> {
    fn from(value: &'a String) -> Self {
        Target::ConnectionString(value.as_str())
    }
}

impl<'a> From<&'a SqlConnection> for Target<'a> {
    fn from(value: &'a SqlConnection) -> Self {
        Target::Connection(value)
    }
}

impl<'a> From<&'a SqlTransaction> for Target<'a> {
    fn from(value: &'a SqlTransaction) -> Self {
        Target::Transaction(value)
    }
}
