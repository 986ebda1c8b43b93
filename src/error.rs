use thiserror::Error;

/// Message reported when a connection already has a live cursor attached.
pub(crate) const OPEN_CURSOR_MESSAGE: &str =
    "There is already an open reader associated with this connection which must be closed first.";

/// Message reported when a command targets a transaction that was already finished.
pub(crate) const FINISHED_TRANSACTION_MESSAGE: &str =
    "The transaction was rolled back or committed, please provide an open transaction.";

#[derive(Debug, Error)]
pub enum SqlHelperError {
    /// An empty or malformed argument, rejected before any I/O happens.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid for the current state of a connection, transaction or parameter.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The database rejected the connection, the command, or a metadata lookup.
    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    /// A cursor could not be opened because another one is still active on the connection.
    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[cfg(feature = "mssql")]
    #[error(transparent)]
    MssqlError(#[from] tiberius::error::Error),
}

impl SqlHelperError {
    /// True when the error came from the database rather than from local validation.
    #[must_use]
    pub fn is_dependency_failure(&self) -> bool {
        match self {
            Self::DependencyFailure(_) => true,
            #[cfg(feature = "mssql")]
            Self::MssqlError(_) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_resource_busy(&self) -> bool {
        matches!(self, Self::ResourceBusy(_))
    }

    pub(crate) fn argument_null(name: &str) -> Self {
        Self::InvalidArgument(format!("{name} must not be empty"))
    }
}
