//! Transactions addressed by an integer handle.
//!
//! Callers that cannot hold a [`SqlTransaction`] across requests begin one here, pass the
//! returned [`TransactionId`] around, and later commit or roll back by id.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::backend::Driver;
use crate::config::{RegistryOptions, redact_connection_string};
use crate::connection::{SqlConnection, SqlTransaction};
use crate::error::SqlHelperError;
use crate::target::Target;

/// Caller-visible handle for a registered transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i32);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a command should run for a given transaction id.
#[derive(Debug, Clone)]
pub enum ConnectInfo {
    /// The id names a live transaction.
    Transaction(SqlTransaction),
    /// Unknown id; run on a fresh connection from the default connection string.
    ConnectionString(String),
}

impl ConnectInfo {
    #[must_use]
    pub fn target(&self) -> Target<'_> {
        match self {
            ConnectInfo::Transaction(tx) => Target::Transaction(tx),
            ConnectInfo::ConnectionString(cs) => Target::ConnectionString(cs),
        }
    }
}

struct Entry {
    connection: SqlConnection,
    transaction: SqlTransaction,
    // Set while a commit or rollback is in flight so a concurrent one sees a miss.
    finishing: bool,
}

/// Registry of open transactions keyed by [`TransactionId`].
pub struct TransactionRegistry {
    driver: Arc<dyn Driver>,
    rng: Mutex<ChaCha8Rng>,
    entries: Mutex<HashMap<TransactionId, Entry>>,
}

impl fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("live", &self.len())
            .finish_non_exhaustive()
    }
}

impl TransactionRegistry {
    #[must_use]
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_options(driver, &RegistryOptions::default())
    }

    #[must_use]
    pub fn with_options(driver: Arc<dyn Driver>, options: &RegistryOptions) -> Self {
        Self {
            driver,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(options.id_seed)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Open a connection, start a transaction on it and register it.
    ///
    /// # Errors
    /// Returns `SqlHelperError::InvalidArgument` for an empty connection string, or the backend's
    /// error if the connection cannot be opened or `BEGIN` fails. The connection is closed again
    /// in that case.
    pub async fn begin(&self, connection_string: &str) -> Result<TransactionId, SqlHelperError> {
        let connection = SqlConnection::new(self.driver.clone(), connection_string)?;
        connection.open().await?;
        let transaction = match connection.begin_transaction().await {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!(error = %close_err, "failed to close connection after BEGIN failed");
                }
                return Err(e);
            }
        };

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let id = self.next_free_id(&entries);
        entries.insert(
            id,
            Entry {
                connection,
                transaction,
                finishing: false,
            },
        );
        debug!(
            %id,
            connection = %redact_connection_string(connection_string),
            "registered transaction"
        );
        Ok(id)
    }

    /// Commit and forget the transaction. Failures are logged and reported as `false`. A failed
    /// commit leaves the transaction registered; a failed close after a successful commit does not.
    pub async fn commit(&self, id: TransactionId) -> bool {
        self.finish(id, true).await
    }

    /// Roll back and forget the transaction. Failures are reported as for
    /// [`commit`](Self::commit).
    pub async fn rollback(&self, id: TransactionId) -> bool {
        self.finish(id, false).await
    }

    /// The live transaction registered under `id`.
    #[must_use]
    pub fn get(&self, id: TransactionId) -> Option<SqlTransaction> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .map(|entry| entry.transaction.clone())
    }

    /// The transaction for `id`, or `default_connection_string` when the id is not registered.
    #[must_use]
    pub fn connect_info(&self, id: TransactionId, default_connection_string: &str) -> ConnectInfo {
        match self.get(id) {
            Some(tx) => ConnectInfo::Transaction(tx),
            None => ConnectInfo::ConnectionString(default_connection_string.to_string()),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn finish(&self, id: TransactionId, commit: bool) -> bool {
        let action = if commit { "commit" } else { "rollback" };
        let claimed = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get_mut(&id) {
                Some(entry) if !entry.finishing => {
                    entry.finishing = true;
                    Some((entry.connection.clone(), entry.transaction.clone()))
                }
                _ => None,
            }
        };
        let Some((connection, transaction)) = claimed else {
            warn!(%id, action, "no transaction registered under this id");
            return false;
        };

        let finished = if commit {
            transaction.commit().await
        } else {
            transaction.rollback().await
        };
        if let Err(e) = finished {
            if let Some(entry) = self
                .entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_mut(&id)
            {
                entry.finishing = false;
            }
            error!(%id, action, error = %e, "transaction could not be finished");
            return false;
        }

        // The transaction is over on the server; the entry goes even if closing fails.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);

        if connection.is_open().await {
            if let Err(e) = connection.close().await {
                error!(%id, error = %e, "failed to close connection after {action}");
                return false;
            }
        }
        debug!(%id, action, "transaction finished");
        true
    }

    /// Draw ids until one is not in use by a live transaction.
    fn next_free_id(&self, live: &HashMap<TransactionId, Entry>) -> TransactionId {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let id = TransactionId(rng.random_range(0..i32::MAX));
            if !live.contains_key(&id) {
                return id;
            }
            warn!(%id, "transaction id already in use, drawing another");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_yields_same_ids() {
        let draw = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..3)
                .map(|_| rng.random_range(0..i32::MAX))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(1), draw(1));
        assert_ne!(draw(1), draw(2));
    }

    #[test]
    fn transaction_ids_serialize_as_bare_integers() {
        let id = TransactionId(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        assert_eq!(serde_json::from_str::<TransactionId>("42").unwrap(), id);
        assert_eq!(id.to_string(), "42");
    }
}
