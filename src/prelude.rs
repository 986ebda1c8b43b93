//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::cache::{FieldSource, ParameterCache};
pub use crate::config::{ConnectionSettings, HelperOptions, RegistryOptions};
pub use crate::connection::{SqlConnection, SqlTransaction};
pub use crate::cursor::{SqlDataReader, SqlXmlReader, XmlElement};
pub use crate::error::SqlHelperError;
pub use crate::helper::{PreparedCommand, SqlHelper};
pub use crate::param_args;
pub use crate::parameter::{ParamArg, SqlParameter};
pub use crate::registry::{ConnectInfo, TransactionId, TransactionRegistry};
pub use crate::results::{DataRow, DataSet, DataTable, RowState};
pub use crate::target::Target;
pub use crate::types::{CommandType, DbValue, ParameterDirection};

#[cfg(feature = "mssql")]
pub use crate::mssql::{MssqlDriver, MssqlOptions, MssqlOptionsBuilder};
