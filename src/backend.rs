//! The database capability the helper is written against.
//!
//! A [`Driver`] turns a connection string into an unopened [`RawConnection`]; the connection
//! exposes open/close, transactions, the four execution primitives and stored-procedure
//! parameter discovery. The SQL Server implementation lives in [`crate::mssql`].

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SqlHelperError;
use crate::parameter::SqlParameter;
use crate::results::DataTable;
use crate::types::{CommandType, DbValue, ReadMode};

/// A fully prepared command handed to a backend.
///
/// Parameters are borrowed mutably so backends can write output and return values back in place.
#[derive(Debug)]
pub struct Command<'c> {
    pub command_type: CommandType,
    pub text: &'c str,
    pub parameters: &'c mut [SqlParameter],
}

impl<'c> Command<'c> {
    pub fn new(
        command_type: CommandType,
        text: &'c str,
        parameters: &'c mut [SqlParameter],
    ) -> Self {
        Self {
            command_type,
            text,
            parameters,
        }
    }

    /// True when any parameter expects a value from the server.
    #[must_use]
    pub fn has_output_parameters(&self) -> bool {
        self.parameters.iter().any(|p| p.direction.receives_value())
    }
}

/// Creates connections from connection strings.
pub trait Driver: Send + Sync + 'static {
    /// Build an unopened connection.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` or `ConfigError` if the connection string
    /// cannot be parsed.
    fn connect(&self, connection_string: &str) -> Result<Box<dyn RawConnection>, SqlHelperError>;
}

/// One physical connection to the server.
#[async_trait]
pub trait RawConnection: Send {
    async fn open(&mut self) -> Result<(), SqlHelperError>;

    async fn close(&mut self) -> Result<(), SqlHelperError>;

    fn is_open(&self) -> bool;

    async fn begin_transaction(&mut self) -> Result<(), SqlHelperError>;

    async fn commit(&mut self) -> Result<(), SqlHelperError>;

    async fn rollback(&mut self) -> Result<(), SqlHelperError>;

    /// Execute without returning rows; returns the number of rows affected.
    async fn execute_non_query(&mut self, command: &mut Command<'_>) -> Result<usize, SqlHelperError>;

    /// First column of the first row, or `None` when the command produced no rows.
    async fn execute_scalar(
        &mut self,
        command: &mut Command<'_>,
    ) -> Result<Option<DbValue>, SqlHelperError>;

    /// Open a forward-only cursor over the first result set.
    ///
    /// Output and return values are not written into `command`; they are delivered by the
    /// cursor once its rows are exhausted.
    async fn execute_reader(
        &mut self,
        command: &mut Command<'_>,
        mode: ReadMode,
    ) -> Result<Box<dyn RawCursor>, SqlHelperError>;

    /// Materialize every result set. Tables come back unnamed and in server order.
    async fn fill(&mut self, command: &mut Command<'_>) -> Result<Vec<DataTable>, SqlHelperError>;

    /// The declared parameters of a stored procedure, return value first.
    async fn derive_parameters(
        &mut self,
        procedure_name: &str,
    ) -> Result<Vec<SqlParameter>, SqlHelperError>;
}

/// Forward-only row source returned by [`RawConnection::execute_reader`].
#[async_trait]
pub trait RawCursor: Send {
    fn column_names(&self) -> Arc<Vec<String>>;

    async fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlHelperError>;

    /// Output and return values, keyed by parameter name. Empty until the rows are exhausted.
    fn take_output_values(&mut self) -> Vec<(String, DbValue)>;
}

/// Cursor over rows that were already drained from the wire.
#[derive(Debug, Default)]
pub struct BufferedCursor {
    column_names: Arc<Vec<String>>,
    rows: VecDeque<Vec<DbValue>>,
    outputs: Vec<(String, DbValue)>,
}

impl BufferedCursor {
    #[must_use]
    pub fn new(
        column_names: Vec<String>,
        rows: impl IntoIterator<Item = Vec<DbValue>>,
        outputs: Vec<(String, DbValue)>,
    ) -> Self {
        Self {
            column_names: Arc::new(column_names),
            rows: rows.into_iter().collect(),
            outputs,
        }
    }
}

#[async_trait]
impl RawCursor for BufferedCursor {
    fn column_names(&self) -> Arc<Vec<String>> {
        self.column_names.clone()
    }

    async fn next_row(&mut self) -> Result<Option<Vec<DbValue>>, SqlHelperError> {
        Ok(self.rows.pop_front())
    }

    fn take_output_values(&mut self) -> Vec<(String, DbValue)> {
        if self.rows.is_empty() {
            std::mem::take(&mut self.outputs)
        } else {
            Vec::new()
        }
    }
}
