use std::borrow::Cow;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::error::SqlHelperError;

/// Environment variable consulted when no connection string is configured explicitly.
pub const CONNECTION_STRING_ENV: &str = "SQLConnection";

/// Seed used for transaction identifiers unless configured otherwise.
pub const DEFAULT_TRANSACTION_ID_SEED: u64 = 1;

static PASSWORD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Quoted values may contain `;`, with the quote doubled inside.
    Regex::new(r#"(?i)\b(password|pwd)\s*=\s*('(?:[^']|'')*'|"(?:[^"]|"")*"|[^;]*)"#)
        .expect("password pattern is valid")
});

/// Mask the password in a connection string before it reaches a log line.
#[must_use]
pub fn redact_connection_string(connection_string: &str) -> Cow<'_, str> {
    PASSWORD_PATTERN.replace_all(connection_string, "$1=***")
}

/// Tuning knobs for [`SqlHelper`](crate::helper::SqlHelper).
#[derive(Debug, Clone)]
pub struct HelperOptions {
    /// How many times opening a cursor is retried while another cursor holds the connection.
    pub cursor_retry_limit: u32,
    /// Pause between cursor retries.
    pub cursor_retry_pause: Duration,
    /// Maximum number of parameter templates kept; `None` keeps every template for the life of
    /// the cache.
    pub cache_capacity: Option<usize>,
}

impl Default for HelperOptions {
    fn default() -> Self {
        Self {
            cursor_retry_limit: 10,
            cursor_retry_pause: Duration::from_millis(500),
            cache_capacity: None,
        }
    }
}

impl HelperOptions {
    #[must_use]
    pub fn builder() -> HelperOptionsBuilder {
        HelperOptionsBuilder {
            opts: Self::default(),
        }
    }
}

/// Fluent builder for helper options.
#[derive(Debug, Clone)]
pub struct HelperOptionsBuilder {
    opts: HelperOptions,
}

impl HelperOptionsBuilder {
    #[must_use]
    pub fn cursor_retry_limit(mut self, limit: u32) -> Self {
        self.opts.cursor_retry_limit = limit;
        self
    }

    #[must_use]
    pub fn cursor_retry_pause(mut self, pause: Duration) -> Self {
        self.opts.cursor_retry_pause = pause;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.opts.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn finish(self) -> HelperOptions {
        self.opts
    }
}

/// Options for the [`TransactionRegistry`](crate::registry::TransactionRegistry).
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Seed for the identifier generator. Identifiers repeat across runs with the same seed.
    pub id_seed: u64,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            id_seed: DEFAULT_TRANSACTION_ID_SEED,
        }
    }
}

/// Where the default connection string comes from.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSettings {
    connection_string: Option<String>,
}

impl ConnectionSettings {
    #[must_use]
    pub fn new(connection_string: Option<String>) -> Self {
        Self {
            connection_string: connection_string.filter(|s| !s.is_empty()),
        }
    }

    /// The configured connection string, falling back to the `SQLConnection` environment variable.
    ///
    /// # Errors
    /// Returns `SqlHelperError::ConfigError` when neither source provides a value.
    pub fn connection_string(&self) -> Result<String, SqlHelperError> {
        if let Some(cs) = &self.connection_string {
            return Ok(cs.clone());
        }
        match std::env::var(CONNECTION_STRING_ENV) {
            Ok(cs) if !cs.is_empty() => Ok(cs),
            _ => Err(SqlHelperError::ConfigError(format!(
                "no connection string configured and {CONNECTION_STRING_ENV} is not set"
            ))),
        }
    }
}
