use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Mutex;

use crate::backend::{Command, Driver, RawConnection, RawCursor};
use crate::config::redact_connection_string;
use crate::error::{FINISHED_TRANSACTION_MESSAGE, OPEN_CURSOR_MESSAGE, SqlHelperError};
use crate::parameter::SqlParameter;
use crate::results::DataTable;
use crate::types::{DbValue, ReadMode};

/// Shared handle to one physical connection.
///
/// Clones refer to the same connection. Only one cursor may be open on a connection at a time;
/// every other operation attempted while a cursor is live fails with
/// [`SqlHelperError::ResourceBusy`].
#[derive(Clone)]
pub struct SqlConnection {
    driver: Arc<dyn Driver>,
    connection_string: Arc<str>,
    raw: Arc<Mutex<Box<dyn RawConnection>>>,
    // Token of the live cursor, 0 when the slot is free.
    cursor_slot: Arc<AtomicU64>,
    cursor_generation: Arc<AtomicU64>,
}

/// Identifies one cursor's claim on a connection's cursor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CursorToken(u64);

impl fmt::Debug for SqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlConnection")
            .field(
                "connection_string",
                &redact_connection_string(&self.connection_string),
            )
            .field("cursor_active", &self.has_open_cursor())
            .finish_non_exhaustive()
    }
}

impl SqlConnection {
    /// Build an unopened connection.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string, or whatever the
    /// driver reports for one it cannot parse.
    pub fn new(driver: Arc<dyn Driver>, connection_string: &str) -> Result<Self, SqlHelperError> {
        if connection_string.is_empty() {
            return Err(SqlHelperError::argument_null("connection string"));
        }
        let raw = driver.connect(connection_string)?;
        Ok(Self {
            driver,
            connection_string: Arc::from(connection_string),
            raw: Arc::new(Mutex::new(raw)),
            cursor_slot: Arc::new(AtomicU64::new(0)),
            cursor_generation: Arc::new(AtomicU64::new(0)),
        })
    }

    /// A new, unopened connection with the same connection string.
    ///
    /// # Errors
    /// Returns whatever the driver reports when building the connection.
    pub fn try_clone_unopened(&self) -> Result<Self, SqlHelperError> {
        Self::new(self.driver.clone(), &self.connection_string)
    }

    #[must_use]
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// True when both handles refer to the same physical connection.
    #[must_use]
    pub fn same_connection(&self, other: &SqlConnection) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw)
    }

    /// Open the connection if it is not already open.
    ///
    /// # Errors
    /// Returns `SqlHelperError::DependencyFailure` (or the backend's own error) if the server
    /// cannot be reached.
    pub async fn open(&self) -> Result<(), SqlHelperError> {
        let mut raw = self.raw.lock().await;
        if !raw.is_open() {
            raw.open().await?;
        }
        Ok(())
    }

    /// Close the connection. Closing also abandons any cursor still attached to it.
    ///
    /// # Errors
    /// Returns the backend's error if the close handshake fails.
    pub async fn close(&self) -> Result<(), SqlHelperError> {
        let mut raw = self.raw.lock().await;
        self.cursor_slot.store(0, Ordering::Release);
        if raw.is_open() {
            raw.close().await?;
        }
        Ok(())
    }

    pub async fn is_open(&self) -> bool {
        self.raw.lock().await.is_open()
    }

    #[must_use]
    pub fn has_open_cursor(&self) -> bool {
        self.cursor_slot.load(Ordering::Acquire) != 0
    }

    /// Start a transaction on this (open) connection.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidState` if the connection is closed or busy with a cursor,
    /// or the backend's error if `BEGIN` fails.
    pub async fn begin_transaction(&self) -> Result<SqlTransaction, SqlHelperError> {
        self.ensure_no_cursor()?;
        let mut raw = self.raw.lock().await;
        if !raw.is_open() {
            return Err(SqlHelperError::InvalidState(
                "a transaction can only be started on an open connection".into(),
            ));
        }
        raw.begin_transaction().await?;
        Ok(SqlTransaction {
            connection: self.clone(),
            finished: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_no_cursor(&self) -> Result<(), SqlHelperError> {
        if self.has_open_cursor() {
            Err(SqlHelperError::ResourceBusy(OPEN_CURSOR_MESSAGE.into()))
        } else {
            Ok(())
        }
    }

    pub(crate) async fn execute_non_query(
        &self,
        command: &mut Command<'_>,
    ) -> Result<usize, SqlHelperError> {
        self.ensure_no_cursor()?;
        self.raw.lock().await.execute_non_query(command).await
    }

    pub(crate) async fn execute_scalar(
        &self,
        command: &mut Command<'_>,
    ) -> Result<Option<DbValue>, SqlHelperError> {
        self.ensure_no_cursor()?;
        self.raw.lock().await.execute_scalar(command).await
    }

    pub(crate) async fn fill(
        &self,
        command: &mut Command<'_>,
    ) -> Result<Vec<DataTable>, SqlHelperError> {
        self.ensure_no_cursor()?;
        self.raw.lock().await.fill(command).await
    }

    /// Attach a cursor to this connection, failing fast when one is already live.
    pub(crate) async fn open_cursor(
        &self,
        command: &mut Command<'_>,
        mode: ReadMode,
    ) -> Result<(Box<dyn RawCursor>, CursorToken), SqlHelperError> {
        let token = CursorToken(self.cursor_generation.fetch_add(1, Ordering::Relaxed) + 1);
        if self
            .cursor_slot
            .compare_exchange(0, token.0, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SqlHelperError::ResourceBusy(OPEN_CURSOR_MESSAGE.into()));
        }
        match self.raw.lock().await.execute_reader(command, mode).await {
            Ok(cursor) => Ok((cursor, token)),
            Err(e) => {
                self.release_cursor(token);
                Err(e)
            }
        }
    }

    /// Free the cursor slot if `token` still holds it. A reader that outlived a close of its
    /// connection no longer does.
    pub(crate) fn release_cursor(&self, token: CursorToken) {
        let _ = self.cursor_slot.compare_exchange(
            token.0,
            0,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) async fn derive_parameters(
        &self,
        procedure_name: &str,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        self.raw.lock().await.derive_parameters(procedure_name).await
    }
}

/// Handle to a transaction in progress on a [`SqlConnection`].
///
/// Once committed or rolled back the transaction no longer exposes its connection, and any
/// command targeting it fails with [`SqlHelperError::InvalidState`].
#[derive(Clone, Debug)]
pub struct SqlTransaction {
    connection: SqlConnection,
    finished: Arc<AtomicBool>,
}

impl SqlTransaction {
    /// The owning connection, or `None` once the transaction has been committed or rolled back.
    #[must_use]
    pub fn connection(&self) -> Option<&SqlConnection> {
        (!self.is_finished()).then_some(&self.connection)
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// # Errors
    /// Returns `SqlHelperError::InvalidState` if the transaction was already finished, or the
    /// backend's error if `COMMIT` fails (the transaction then stays open).
    pub async fn commit(&self) -> Result<(), SqlHelperError> {
        self.finish(true).await
    }

    /// # Errors
    /// Returns `SqlHelperError::InvalidState` if the transaction was already finished, or the
    /// backend's error if `ROLLBACK` fails (the transaction then stays open).
    pub async fn rollback(&self) -> Result<(), SqlHelperError> {
        self.finish(false).await
    }

    async fn finish(&self, commit: bool) -> Result<(), SqlHelperError> {
        if self.is_finished() {
            return Err(SqlHelperError::InvalidState(
                FINISHED_TRANSACTION_MESSAGE.into(),
            ));
        }
        self.connection.ensure_no_cursor()?;
        let mut raw = self.connection.raw.lock().await;
        // Re-check under the lock so two concurrent finishers cannot both succeed.
        if self.is_finished() {
            return Err(SqlHelperError::InvalidState(
                FINISHED_TRANSACTION_MESSAGE.into(),
            ));
        }
        if commit {
            raw.commit().await?;
        } else {
            raw.rollback().await?;
        }
        self.finished.store(true, Ordering::Release);
        Ok(())
    }
}
