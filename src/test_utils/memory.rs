//! A scripted in-memory stand-in for SQL Server.
//!
//! Stored procedures are declared with their parameters and a handler; command text is matched
//! exactly. Every connection opened through the driver shares the same script, counters and
//! command log, so a test can keep a clone of the driver and inspect what happened.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::backend::{BufferedCursor, Command, Driver, RawConnection, RawCursor};
use crate::error::SqlHelperError;
use crate::parameter::{SqlParameter, find_parameter};
use crate::results::DataTable;
use crate::types::{CommandType, DbValue, ParameterDirection, ReadMode};

/// Column name SQL Server gives to `FOR XML` output.
pub const XML_COLUMN_NAME: &str = "XML_F52E2B61-18A1-11d1-B105-00805F49916B";

/// What a scripted command hands back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub rows_affected: usize,
    pub tables: Vec<DataTable>,
    pub return_value: Option<i64>,
}

impl Response {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn rows_affected(count: usize) -> Self {
        Self {
            rows_affected: count,
            ..Self::default()
        }
    }

    /// One result set with the given columns and rows.
    #[must_use]
    pub fn table(columns: &[&str], rows: Vec<Vec<DbValue>>) -> Self {
        Self::default().with_table(columns, rows)
    }

    /// A single unnamed column holding one value.
    #[must_use]
    pub fn scalar(value: impl Into<DbValue>) -> Self {
        Self::table(&[""], vec![vec![value.into()]])
    }

    /// `FOR XML` output split over one row per fragment.
    #[must_use]
    pub fn xml(fragments: &[&str]) -> Self {
        Self::table(
            &[XML_COLUMN_NAME],
            fragments
                .iter()
                .map(|f| vec![DbValue::Text((*f).to_string())])
                .collect(),
        )
    }

    /// Append another result set.
    #[must_use]
    pub fn with_table(mut self, columns: &[&str], rows: Vec<Vec<DbValue>>) -> Self {
        let mut table = DataTable::with_capacity(
            "",
            columns.iter().map(|c| (*c).to_string()).collect(),
            rows.len(),
        );
        for row in rows {
            table.add_row_values(row);
        }
        self.tables.push(table);
        self
    }

    #[must_use]
    pub fn with_rows_affected(mut self, count: usize) -> Self {
        self.rows_affected = count;
        self
    }

    #[must_use]
    pub fn with_return_value(mut self, value: i64) -> Self {
        self.return_value = Some(value);
        self
    }
}

/// The command a handler is asked to answer.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub command_type: CommandType,
    pub command_text: &'a str,
    pub parameters: &'a mut [SqlParameter],
    pub in_transaction: bool,
}

impl Invocation<'_> {
    /// Value of the named parameter.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&DbValue> {
        find_parameter(&*self.parameters, name).and_then(|p| p.value.as_ref())
    }

    /// Write an output value, as the server would on completion.
    pub fn set_output(&mut self, name: &str, value: impl Into<DbValue>) {
        if let Some(p) = self
            .parameters
            .iter_mut()
            .find(|p| p.direction.receives_value() && p.name.eq_ignore_ascii_case(name))
        {
            p.value = Some(value.into());
        }
    }
}

type Handler = Arc<dyn Fn(&mut Invocation<'_>) -> Result<Response, SqlHelperError> + Send + Sync>;

struct Procedure {
    parameters: Vec<SqlParameter>,
    handler: Handler,
}

/// Which execution primitive ran a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    NonQuery,
    Scalar,
    Reader,
    XmlReader,
    Fill,
}

/// One entry of the driver's command log.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub kind: ExecutionKind,
    pub command_type: CommandType,
    pub command_text: String,
    /// Parameters as they were sent, before any output values were written.
    pub parameters: Vec<SqlParameter>,
    pub in_transaction: bool,
}

/// Snapshot of the driver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub opens: usize,
    pub closes: usize,
    pub open_connections: usize,
    pub derive_calls: usize,
    pub commits: usize,
    pub rollbacks: usize,
}

#[derive(Default)]
struct Shared {
    procedures: Mutex<HashMap<String, Procedure>>,
    texts: Mutex<HashMap<String, Handler>>,
    log: Mutex<Vec<ExecutedCommand>>,
    opens: AtomicUsize,
    closes: AtomicUsize,
    open_connections: AtomicUsize,
    derive_calls: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    unreachable: AtomicBool,
    fail_commits: AtomicBool,
    fail_closes: AtomicBool,
}

/// Driver over the scripted in-memory server. Clones share the script and counters.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for MemoryDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDriver")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a stored procedure. `parameters` excludes the return value, which every procedure
    /// reports first during discovery.
    pub fn define_procedure<F>(&self, name: &str, parameters: Vec<SqlParameter>, handler: F)
    where
        F: Fn(&mut Invocation<'_>) -> Result<Response, SqlHelperError> + Send + Sync + 'static,
    {
        lock(&self.shared.procedures).insert(
            name.to_ascii_lowercase(),
            Procedure {
                parameters,
                handler: Arc::new(handler),
            },
        );
    }

    /// Drop a procedure, as if it had been removed from the server.
    pub fn drop_procedure(&self, name: &str) {
        lock(&self.shared.procedures).remove(&name.to_ascii_lowercase());
    }

    /// Answer command text that matches `text` exactly.
    pub fn on_text<F>(&self, text: &str, handler: F)
    where
        F: Fn(&mut Invocation<'_>) -> Result<Response, SqlHelperError> + Send + Sync + 'static,
    {
        lock(&self.shared.texts).insert(text.to_string(), Arc::new(handler));
    }

    /// Make every subsequent open fail as if the server were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.shared.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Make every subsequent commit fail.
    pub fn set_fail_commits(&self, fail: bool) {
        self.shared.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent close report an error. The connection is still dropped.
    pub fn set_fail_closes(&self, fail: bool) {
        self.shared.fail_closes.store(fail, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        let s = &self.shared;
        MemoryStats {
            opens: s.opens.load(Ordering::SeqCst),
            closes: s.closes.load(Ordering::SeqCst),
            open_connections: s.open_connections.load(Ordering::SeqCst),
            derive_calls: s.derive_calls.load(Ordering::SeqCst),
            commits: s.commits.load(Ordering::SeqCst),
            rollbacks: s.rollbacks.load(Ordering::SeqCst),
        }
    }

    /// Every command executed so far, oldest first.
    #[must_use]
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        lock(&self.shared.log).clone()
    }
}

impl Driver for MemoryDriver {
    fn connect(&self, _connection_string: &str) -> Result<Box<dyn RawConnection>, SqlHelperError> {
        Ok(Box::new(MemoryConnection {
            shared: self.shared.clone(),
            open: false,
            in_transaction: false,
        }))
    }
}

struct MemoryConnection {
    shared: Arc<Shared>,
    open: bool,
    in_transaction: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), SqlHelperError> {
        if self.open {
            Ok(())
        } else {
            Err(SqlHelperError::InvalidState(
                "the connection is not open".into(),
            ))
        }
    }

    fn handler_for(&self, command: &Command<'_>) -> Result<Handler, SqlHelperError> {
        match command.command_type {
            CommandType::StoredProcedure => lock(&self.shared.procedures)
                .get(&command.text.to_ascii_lowercase())
                .map(|p| p.handler.clone())
                .ok_or_else(|| missing_procedure(command.text)),
            CommandType::Text => lock(&self.shared.texts)
                .get(command.text)
                .cloned()
                .ok_or_else(|| {
                    SqlHelperError::DependencyFailure(format!(
                        "Incorrect syntax near '{}'.",
                        command.text
                    ))
                }),
        }
    }

    fn invoke(
        &self,
        command: &mut Command<'_>,
        kind: ExecutionKind,
    ) -> Result<Response, SqlHelperError> {
        self.ensure_open()?;
        let handler = self.handler_for(command)?;
        lock(&self.shared.log).push(ExecutedCommand {
            kind,
            command_type: command.command_type,
            command_text: command.text.to_string(),
            parameters: command.parameters.to_vec(),
            in_transaction: self.in_transaction,
        });

        let mut invocation = Invocation {
            command_type: command.command_type,
            command_text: command.text,
            parameters: &mut *command.parameters,
            in_transaction: self.in_transaction,
        };
        let response = handler(&mut invocation)?;
        if let Some(rc) = response.return_value {
            if let Some(p) = command
                .parameters
                .iter_mut()
                .find(|p| p.direction == ParameterDirection::ReturnValue)
            {
                p.value = Some(DbValue::Int(rc));
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl RawConnection for MemoryConnection {
    async fn open(&mut self) -> Result<(), SqlHelperError> {
        if self.shared.unreachable.load(Ordering::SeqCst) {
            return Err(SqlHelperError::DependencyFailure(
                "A network-related error occurred while establishing a connection to SQL Server."
                    .into(),
            ));
        }
        if !self.open {
            self.open = true;
            self.shared.opens.fetch_add(1, Ordering::SeqCst);
            self.shared.open_connections.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlHelperError> {
        if self.open {
            self.open = false;
            self.in_transaction = false;
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
            self.shared.open_connections.fetch_sub(1, Ordering::SeqCst);
            if self.shared.fail_closes.load(Ordering::SeqCst) {
                return Err(SqlHelperError::DependencyFailure(
                    "A transport-level error has occurred when closing the connection.".into(),
                ));
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn begin_transaction(&mut self) -> Result<(), SqlHelperError> {
        self.ensure_open()?;
        if self.in_transaction {
            return Err(SqlHelperError::InvalidState(
                "a transaction is already in progress on this connection".into(),
            ));
        }
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), SqlHelperError> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        if self.shared.fail_commits.load(Ordering::SeqCst) {
            return Err(SqlHelperError::DependencyFailure(
                "The COMMIT TRANSACTION request failed.".into(),
            ));
        }
        if !self.in_transaction {
            return Err(no_transaction("COMMIT"));
        }
        self.in_transaction = false;
        self.shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SqlHelperError> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        if !self.in_transaction {
            return Err(no_transaction("ROLLBACK"));
        }
        self.in_transaction = false;
        self.shared.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_non_query(
        &mut self,
        command: &mut Command<'_>,
    ) -> Result<usize, SqlHelperError> {
        Ok(self.invoke(command, ExecutionKind::NonQuery)?.rows_affected)
    }

    async fn execute_scalar(
        &mut self,
        command: &mut Command<'_>,
    ) -> Result<Option<DbValue>, SqlHelperError> {
        let response = self.invoke(command, ExecutionKind::Scalar)?;
        Ok(response
            .tables
            .first()
            .and_then(DataTable::first_value)
            .cloned())
    }

    async fn execute_reader(
        &mut self,
        command: &mut Command<'_>,
        mode: ReadMode,
    ) -> Result<Box<dyn RawCursor>, SqlHelperError> {
        let kind = match mode {
            ReadMode::Rows => ExecutionKind::Reader,
            ReadMode::Xml => ExecutionKind::XmlReader,
        };
        // Outputs travel with the cursor, not through the caller's parameters.
        let mut parameters = command.parameters.to_vec();
        let mut detached = Command::new(command.command_type, command.text, &mut parameters);
        let response = self.invoke(&mut detached, kind)?;

        let outputs = parameters
            .iter()
            .filter(|p| p.direction.receives_value())
            .filter_map(|p| p.value.clone().map(|v| (p.name.clone(), v)))
            .collect();
        let cursor = match response.tables.into_iter().next() {
            Some(table) => BufferedCursor::new(
                table.column_names().to_vec(),
                table.rows().iter().map(|r| r.values.clone()).collect::<Vec<_>>(),
                outputs,
            ),
            None => BufferedCursor::new(Vec::new(), Vec::new(), outputs),
        };
        Ok(Box::new(cursor))
    }

    async fn fill(&mut self, command: &mut Command<'_>) -> Result<Vec<DataTable>, SqlHelperError> {
        Ok(self.invoke(command, ExecutionKind::Fill)?.tables)
    }

    async fn derive_parameters(
        &mut self,
        procedure_name: &str,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        self.ensure_open()?;
        // Round trips yield so concurrent callers interleave as they would against a server.
        tokio::task::yield_now().await;
        self.shared.derive_calls.fetch_add(1, Ordering::SeqCst);
        let procedures = lock(&self.shared.procedures);
        let procedure = procedures
            .get(&procedure_name.to_ascii_lowercase())
            .ok_or_else(|| missing_procedure(procedure_name))?;
        let mut parameters = Vec::with_capacity(procedure.parameters.len() + 1);
        parameters.push(SqlParameter::return_value());
        parameters.extend(procedure.parameters.iter().cloned());
        Ok(parameters)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn missing_procedure(name: &str) -> SqlHelperError {
    SqlHelperError::DependencyFailure(format!("Could not find stored procedure '{name}'."))
}

fn no_transaction(statement: &str) -> SqlHelperError {
    SqlHelperError::InvalidState(format!(
        "The {statement} TRANSACTION request has no corresponding BEGIN TRANSACTION."
    ))
}
