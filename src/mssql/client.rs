use tiberius::{Client, Config as TiberiusConfig, SqlBrowser};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::error::SqlHelperError;

/// Type alias for SQL Server client
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Open a client for `config`, following a routing redirect if the server sends one.
///
/// Named instances are resolved through the SQL Browser service.
///
/// # Errors
/// Returns `SqlHelperError::DependencyFailure` if the TCP connection or the login fails.
pub async fn create_mssql_client(config: &TiberiusConfig) -> Result<MssqlClient, SqlHelperError> {
    let tcp = TcpStream::connect_named(config).await.map_err(|e| {
        SqlHelperError::DependencyFailure(format!("SQL Server TCP connection error: {e}"))
    })?;
    tcp.set_nodelay(true).map_err(|e| {
        SqlHelperError::DependencyFailure(format!("SQL Server TCP connection error: {e}"))
    })?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        Ok(client) => Ok(client),
        Err(tiberius::error::Error::Routing { host, port }) => {
            debug!(%host, port, "SQL Server redirected the connection");
            let mut routed = config.clone();
            routed.host(&host);
            routed.port(port);
            let tcp = TcpStream::connect(routed.get_addr()).await.map_err(|e| {
                SqlHelperError::DependencyFailure(format!("SQL Server TCP connection error: {e}"))
            })?;
            tcp.set_nodelay(true).map_err(|e| {
                SqlHelperError::DependencyFailure(format!("SQL Server TCP connection error: {e}"))
            })?;
            Client::connect(routed, tcp.compat_write()).await.map_err(|e| {
                SqlHelperError::DependencyFailure(format!("SQL Server connection error: {e}"))
            })
        }
        Err(e) => Err(SqlHelperError::DependencyFailure(format!(
            "SQL Server connection error: {e}"
        ))),
    }
}
