//! Stored-procedure oriented helper for SQL Server.
//!
//! [`SqlHelper`] runs commands in five modes (non-query, dataset, reader, scalar and XML reader)
//! against a connection string, an open [`SqlConnection`] or a [`SqlTransaction`]. Procedure
//! parameters are discovered once per connection string and kept in a [`ParameterCache`];
//! [`TransactionRegistry`] hands out integer ids for transactions that span several calls.

pub mod backend;
pub mod cache;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod helper;
pub mod parameter;
pub mod prelude;
pub mod registry;
pub mod results;
pub mod target;
pub mod types;

#[cfg(feature = "mssql")]
pub mod mssql;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::ParameterCache;
pub use config::{ConnectionSettings, HelperOptions, RegistryOptions};
pub use connection::{SqlConnection, SqlTransaction};
pub use cursor::{SqlDataReader, SqlXmlReader, XmlElement};
pub use error::SqlHelperError;
pub use helper::{PreparedCommand, SqlHelper};
pub use parameter::{ParamArg, SqlParameter};
pub use registry::{ConnectInfo, TransactionId, TransactionRegistry};
pub use results::{DataRow, DataSet, DataTable, RowState};
pub use target::Target;
pub use types::{CommandType, DbValue, ParameterDirection};

#[cfg(feature = "mssql")]
pub use mssql::MssqlDriver;
