//! The command execution façade.
//!
//! Every execution mode accepts a [`Target`]: a connection string, a caller-owned
//! [`SqlConnection`] or a live [`SqlTransaction`](crate::connection::SqlTransaction). Connections
//! the helper opened itself are closed again once the call (or, for readers, the cursor) is done;
//! anything the caller opened is left open.

mod command;
mod dataset;
mod non_query;
mod prepare;
mod reader;
mod scalar;
mod xml;

use std::sync::Arc;

pub use command::PreparedCommand;

use crate::backend::Driver;
use crate::cache::{FieldSource, ParameterCache, assign_values, assign_values_from_record};
use crate::config::{HelperOptions, RegistryOptions};
use crate::connection::SqlConnection;
use crate::error::SqlHelperError;
use crate::parameter::{ParamArg, SqlParameter};
use crate::registry::TransactionRegistry;
use crate::target::Target;

/// Stored-procedure oriented command helper.
///
/// Cloning is cheap; clones share the driver and the parameter cache.
///
#[cfg_attr(feature = "test-utils", doc = "```rust")]
#[cfg_attr(not(feature = "test-utils"), doc = "```rust,ignore")]
/// use std::sync::Arc;
/// use sql_helper::prelude::*;
/// use sql_helper::test_utils::{MemoryDriver, Response};
///
/// # tokio_test_block(async {
/// let driver = MemoryDriver::new();
/// driver.on_text("SELECT 1", |_| Ok(Response::scalar(1)));
/// let helper = SqlHelper::new(Arc::new(driver));
///
/// let value = helper
///     .execute_scalar("Server=memory", CommandType::Text, "SELECT 1", &mut [])
///     .await?;
/// assert_eq!(value, DbValue::Int(1));
/// # Ok::<(), SqlHelperError>(())
/// # }).unwrap();
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct SqlHelper {
    driver: Arc<dyn Driver>,
    cache: Arc<ParameterCache>,
    options: HelperOptions,
}

impl std::fmt::Debug for SqlHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlHelper")
            .field("options", &self.options)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl SqlHelper {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_options(driver, HelperOptions::default())
    }

    #[must_use]
    pub fn with_options(driver: Arc<dyn Driver>, options: HelperOptions) -> Self {
        let cache = Arc::new(ParameterCache::new(driver.clone(), options.cache_capacity));
        Self {
            driver,
            cache,
            options,
        }
    }

    #[must_use]
    pub fn parameter_cache(&self) -> &ParameterCache {
        &self.cache
    }

    #[must_use]
    pub fn options(&self) -> &HelperOptions {
        &self.options
    }

    /// An unopened connection built by this helper's driver.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string.
    pub fn connection(&self, connection_string: &str) -> Result<SqlConnection, SqlHelperError> {
        SqlConnection::new(self.driver.clone(), connection_string)
    }

    /// A transaction registry sharing this helper's driver.
    #[must_use]
    pub fn transaction_registry(&self, options: &RegistryOptions) -> TransactionRegistry {
        TransactionRegistry::with_options(self.driver.clone(), options)
    }

    /// Discover the procedure's parameters and bind `values` by position.
    ///
    /// No values means no parameters at all, and no discovery round trip.
    async fn positional_parameters(
        &self,
        target: Target<'_>,
        procedure_name: &str,
        values: &[ParamArg],
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let mut parameters = self
            .cache
            .get_sp_parameter_set(target, procedure_name)
            .await?;
        assign_values(&mut parameters, values)?;
        Ok(parameters)
    }

    /// Discover the procedure's parameters and bind them from `record` by name.
    ///
    /// An empty record means no parameters at all, and no discovery round trip.
    async fn record_parameters<R: FieldSource + ?Sized>(
        &self,
        target: Target<'_>,
        procedure_name: &str,
        record: &R,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        if record.is_empty() {
            return Ok(Vec::new());
        }
        let mut parameters = self
            .cache
            .get_sp_parameter_set(target, procedure_name)
            .await?;
        assign_values_from_record(&mut parameters, record)?;
        Ok(parameters)
    }
}
