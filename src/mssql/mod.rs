// MSSQL module - the SQL Server backend behind the helper
//
// - config: connection string parsing and the options builder
// - client: raw client creation (TCP, SQL Browser, routing)
// - query: command batches, parameter binding and value extraction
// - metadata: stored procedure parameter discovery

pub mod client;
pub mod config;
mod metadata;
mod query;

use async_trait::async_trait;
use tiberius::Config as TiberiusConfig;
use tracing::debug;

pub use client::{MssqlClient, create_mssql_client};
pub use config::{MssqlOptions, MssqlOptionsBuilder, parse_connection_string};

use crate::backend::{BufferedCursor, Command, Driver, RawConnection, RawCursor};
use crate::error::SqlHelperError;
use crate::parameter::{SqlParameter, apply_output_values};
use crate::results::DataTable;
use crate::types::{DbValue, ReadMode};
use query::{Batch, execute_statement};

/// Driver for SQL Server over tiberius.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlDriver;

impl MssqlDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Driver for MssqlDriver {
    fn connect(&self, connection_string: &str) -> Result<Box<dyn RawConnection>, SqlHelperError> {
        let config = parse_connection_string(connection_string)?;
        Ok(Box::new(MssqlConnection {
            config,
            client: None,
        }))
    }
}

struct MssqlConnection {
    config: TiberiusConfig,
    client: Option<MssqlClient>,
}

impl MssqlConnection {
    fn client(&mut self) -> Result<&mut MssqlClient, SqlHelperError> {
        self.client
            .as_mut()
            .ok_or_else(|| SqlHelperError::InvalidState("the connection is not open".into()))
    }
}

#[async_trait]
impl RawConnection for MssqlConnection {
    async fn open(&mut self) -> Result<(), SqlHelperError> {
        if self.client.is_none() {
            self.client = Some(create_mssql_client(&self.config).await?);
            debug!(addr = %self.config.get_addr(), "opened SQL Server connection");
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SqlHelperError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn begin_transaction(&mut self) -> Result<(), SqlHelperError> {
        execute_statement(self.client()?, "BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<(), SqlHelperError> {
        execute_statement(self.client()?, "COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> Result<(), SqlHelperError> {
        execute_statement(self.client()?, "ROLLBACK TRANSACTION").await
    }

    async fn execute_non_query(
        &mut self,
        command: &mut Command<'_>,
    ) -> Result<usize, SqlHelperError> {
        let client = self.client()?;
        if !command.has_output_parameters() {
            return Batch::build(command, false).execute(client).await;
        }
        // Output values come back as a result set, so the row count is read from @@ROWCOUNT.
        let output = Batch::build(command, true).run(client).await?;
        apply_output_values(command.parameters, &output.outputs);
        Ok(output.rows_affected.unwrap_or(0))
    }

    async fn execute_scalar(
        &mut self,
        command: &mut Command<'_>,
    ) -> Result<Option<DbValue>, SqlHelperError> {
        let output = Batch::build(command, false).run(self.client()?).await?;
        apply_output_values(command.parameters, &output.outputs);
        Ok(output
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
        let output = Batch::build(command, false).run(self.client()?).await?;
        let cursor = match output.tables.into_iter().next() {
            Some(table) => {
                let rows = table
                    .rows()
                    .iter()
                    .map(|row| row.values.clone())
                    .collect::<Vec<_>>();
                BufferedCursor::new(table.column_names().to_vec(), rows, output.outputs)
            }
            None => BufferedCursor::new(Vec::new(), Vec::new(), output.outputs),
        };
        debug!(?mode, "opened buffered SQL Server cursor");
        Ok(Box::new(cursor))
    }

    async fn fill(&mut self, command: &mut Command<'_>) -> Result<Vec<DataTable>, SqlHelperError> {
        let output = Batch::build(command, false).run(self.client()?).await?;
        apply_output_values(command.parameters, &output.outputs);
        Ok(output.tables)
    }

    async fn derive_parameters(
        &mut self,
        procedure_name: &str,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        metadata::derive_parameters(self.client()?, procedure_name).await
    }
}
