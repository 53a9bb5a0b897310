//! Db-context ORM integration
//!
//! A [`DbContext`] tracks changes and writes them with `save_changes`. Inside
//! a transaction the [`DbContextManager`] hands every caller the same context
//! and, once the transaction completes, applies the configured
//! [`TransactionCommitAction`] and forgets it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use autotx_concurrency::{TransactionManager, TransactionStatus};
use autotx_core::{LocalIdentifier, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::TransactionStore;

/// Change-tracking unit of work against one store.
pub trait DbContext: Send + Sync {
    /// Identity, for diagnostics.
    fn id(&self) -> Uuid;

    /// Track `value` under `key`.
    fn add(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Track removal of `key`.
    fn remove(&self, key: &str) -> Result<()>;

    /// Read `key`, tracked changes first.
    fn find(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Write tracked changes, enlisting in the ambient transaction when one
    /// is active. Returns the number of written entries.
    fn save_changes(&self) -> Result<usize>;

    /// Release the context.
    fn dispose(&self);

    /// Whether [`DbContext::dispose`] ran.
    fn is_disposed(&self) -> bool;
}

/// Creates db contexts for one configured store.
pub trait DbContextFactory: Send + Sync {
    /// Create a new context.
    fn create(&self) -> Result<Arc<dyn DbContext>>;
}

/// Data a db-context factory is built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbContextOptions {
    /// Connection string handed to the provider
    pub connection_string: String,
    /// Provider options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl DbContextOptions {
    /// Options for `connection_string`.
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            options: BTreeMap::new(),
        }
    }
}

/// What happens to a transaction's db context when the transaction completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCommitAction {
    /// Leave the context alone
    Nothing,
    /// Dispose it
    #[default]
    Dispose,
}

/// Db contexts keyed by transaction.
pub type DbContextStore = TransactionStore<Arc<dyn DbContext>>;

type ContextSource = Box<dyn Fn() -> Result<Arc<dyn DbContext>> + Send + Sync>;

/// Hands out the db context of the current transaction.
pub struct DbContextManager {
    create: ContextSource,
    transaction_manager: Arc<TransactionManager>,
    store: Arc<DbContextStore>,
    commit_action: TransactionCommitAction,
}

impl DbContextManager {
    /// Manager creating contexts through `create`.
    pub fn new<F>(
        create: F,
        transaction_manager: Arc<TransactionManager>,
        store: Arc<DbContextStore>,
        commit_action: TransactionCommitAction,
    ) -> Self
    where
        F: Fn() -> Result<Arc<dyn DbContext>> + Send + Sync + 'static,
    {
        Self {
            create: Box::new(create),
            transaction_manager,
            store,
            commit_action,
        }
    }

    /// Context for the current transaction, or a fresh one outside any.
    pub fn open_db_context(&self) -> Result<Arc<dyn DbContext>> {
        let transaction = match self.transaction_manager.current_transaction() {
            Some(transaction) => transaction,
            None => return (self.create)(),
        };

        let id = transaction.local_identifier();
        let (context, created) = self.store.get_or_try_insert_with(id, || (self.create)())?;
        if created {
            tracing::debug!(tx = %id, context = %context.id(), "stored db context for transaction");
            let store = Arc::clone(&self.store);
            let action = self.commit_action;
            transaction.on_completed(move |status| finish_stored(&store, id, action, status));
        }
        Ok(context)
    }

    /// Configured commit action.
    pub fn commit_action(&self) -> TransactionCommitAction {
        self.commit_action
    }

    /// Contexts waiting for their transaction to complete.
    pub fn pending(&self) -> usize {
        self.store.len()
    }
}

fn finish_stored(
    store: &DbContextStore,
    id: LocalIdentifier,
    action: TransactionCommitAction,
    status: TransactionStatus,
) {
    if let Some(context) = store.take(id) {
        tracing::debug!(tx = %id, ?status, ?action, "transaction completed, releasing db context");
        if action == TransactionCommitAction::Dispose {
            context.dispose();
        }
    }
}

impl fmt::Debug for DbContextManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbContextManager")
            .field("commit_action", &self.commit_action)
            .field("pending", &self.pending())
            .finish()
    }
}
