//! Stored-procedure parameter discovery and caching.
//!
//! Templates are keyed by connection string, procedure name and whether the return-value
//! parameter was requested. Every read hands out a deep copy, so callers are free to bind values
//! onto what they get back.

pub mod assign;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use crate::backend::Driver;
use crate::config::redact_connection_string;
use crate::connection::SqlConnection;
use crate::error::SqlHelperError;
use crate::parameter::SqlParameter;
use crate::target::Target;
use crate::types::{DbValue, ParameterDirection};

pub use assign::{FieldSource, assign_values, assign_values_from_record};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    connection: String,
    command_text: String,
    include_return_value: bool,
}

impl CacheKey {
    fn new(connection: &str, command_text: &str, include_return_value: bool) -> Self {
        Self {
            connection: connection.to_string(),
            command_text: command_text.to_string(),
            include_return_value,
        }
    }
}

#[derive(Debug, Default)]
struct CacheEntries {
    templates: HashMap<CacheKey, Arc<[SqlParameter]>>,
    // Insertion order, oldest first; only consulted when a capacity is set.
    order: VecDeque<CacheKey>,
}

/// Process-lifetime cache of stored-procedure parameter templates.
pub struct ParameterCache {
    driver: Arc<dyn Driver>,
    capacity: Option<usize>,
    entries: RwLock<CacheEntries>,
}

impl std::fmt::Debug for ParameterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ParameterCache {
    /// Create a cache that discovers templates through `driver`.
    ///
    /// With `capacity` set, inserting past the limit evicts the oldest template; the next request
    /// for an evicted procedure goes back to the server.
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>, capacity: Option<usize>) -> Self {
        Self {
            driver,
            capacity: capacity.map(|c| c.max(1)),
            entries: RwLock::new(CacheEntries::default()),
        }
    }

    /// The parameters declared by `procedure_name`, values set to NULL.
    ///
    /// On a miss the procedure's metadata is read over a fresh connection built from the
    /// target's connection string; a caller's open connection or transaction is never used for
    /// discovery.
    ///
    /// # Errors
    /// - `SqlHelperError::InvalidArgument` for an empty connection string or procedure name
    /// - `SqlHelperError::InvalidState` for a finished transaction target
    /// - `SqlHelperError::DependencyFailure` if discovery fails on the server
    pub async fn get_parameter_template<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
        include_return_value: bool,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        let target = target.into();
        if procedure_name.is_empty() {
            return Err(SqlHelperError::argument_null("procedure name"));
        }
        let identity = target.connection_identity()?;
        let key = CacheKey::new(identity, procedure_name, include_return_value);

        if let Some(hit) = self.lookup(&key) {
            debug!(procedure = procedure_name, "parameter cache hit");
            return Ok(hit);
        }

        debug!(
            procedure = procedure_name,
            connection = %redact_connection_string(identity),
            "parameter cache miss, discovering"
        );
        let connection = match target {
            Target::ConnectionString(cs) => SqlConnection::new(self.driver.clone(), cs)?,
            Target::Connection(conn) => conn.try_clone_unopened()?,
            Target::Transaction(_) => SqlConnection::new(self.driver.clone(), identity)?,
        };
        let mut discovered = discover(&connection, procedure_name).await?;

        if !include_return_value {
            discovered.retain(|p| p.direction != ParameterDirection::ReturnValue);
        }
        for parameter in &mut discovered {
            parameter.value = Some(DbValue::Null);
        }

        Ok(self.insert(key, discovered))
    }

    /// Shorthand for [`get_parameter_template`](Self::get_parameter_template) without the
    /// return-value parameter.
    ///
    /// # Errors
    /// Same as [`get_parameter_template`](Self::get_parameter_template).
    pub async fn get_sp_parameter_set<'a>(
        &self,
        target: impl Into<Target<'a>>,
        procedure_name: &str,
    ) -> Result<Vec<SqlParameter>, SqlHelperError> {
        self.get_parameter_template(target, procedure_name, false)
            .await
    }

    /// Store a caller-built parameter set for a command, replacing any existing entry.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string or command text.
    pub fn cache_parameter_set(
        &self,
        connection_string: &str,
        command_text: &str,
        parameters: Vec<SqlParameter>,
    ) -> Result<(), SqlHelperError> {
        validate_key(connection_string, command_text)?;
        let key = CacheKey::new(connection_string, command_text, false);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .templates
            .insert(key.clone(), Arc::from(parameters))
            .is_none()
        {
            entries.order.push_back(key);
            self.evict_over_capacity(&mut entries);
        }
        Ok(())
    }

    /// A deep copy of a previously stored parameter set, if any.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string or command text.
    pub fn get_cached_parameter_set(
        &self,
        connection_string: &str,
        command_text: &str,
    ) -> Result<Option<Vec<SqlParameter>>, SqlHelperError> {
        validate_key(connection_string, command_text)?;
        Ok(self.lookup(&CacheKey::new(connection_string, command_text, false)))
    }

    /// Forget both templates (with and without return value) of one procedure.
    ///
    /// Returns `true` if anything was removed.
    pub fn invalidate(&self, connection_string: &str, procedure_name: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for include in [false, true] {
            let key = CacheKey::new(connection_string, procedure_name, include);
            if entries.templates.remove(&key).is_some() {
                entries.order.retain(|k| k != &key);
                removed = true;
            }
        }
        removed
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.templates.clear();
        entries.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .templates
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &CacheKey) -> Option<Vec<SqlParameter>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.templates.get(key).map(|template| template.to_vec())
    }

    /// Insert a discovered template unless a concurrent discovery got there first, and return a
    /// copy of whichever template is cached.
    fn insert(&self, key: CacheKey, template: Vec<SqlParameter>) -> Vec<SqlParameter> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = entries.templates.get(&key) {
            return existing.to_vec();
        }
        let stored: Arc<[SqlParameter]> = Arc::from(template);
        entries.templates.insert(key.clone(), stored.clone());
        entries.order.push_back(key);
        self.evict_over_capacity(&mut entries);
        stored.to_vec()
    }

    fn evict_over_capacity(&self, entries: &mut CacheEntries) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while entries.templates.len() > capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            entries.templates.remove(&oldest);
            debug!(procedure = %oldest.command_text, "evicted parameter template");
        }
    }
}

fn validate_key(connection_string: &str, command_text: &str) -> Result<(), SqlHelperError> {
    if connection_string.is_empty() {
        return Err(SqlHelperError::argument_null("connection string"));
    }
    if command_text.is_empty() {
        return Err(SqlHelperError::argument_null("command text"));
    }
    Ok(())
}

async fn discover(
    connection: &SqlConnection,
    procedure_name: &str,
) -> Result<Vec<SqlParameter>, SqlHelperError> {
    connection.open().await.map_err(into_dependency_failure)?;
    let discovered = connection.derive_parameters(procedure_name).await;
    if let Err(e) = connection.close().await {
        warn!(error = %e, "failed to close discovery connection");
    }
    discovered.map_err(into_dependency_failure)
}

fn into_dependency_failure(err: SqlHelperError) -> SqlHelperError {
    match err {
        SqlHelperError::DependencyFailure(_) => err,
        other => SqlHelperError::DependencyFailure(other.to_string()),
    }
}
