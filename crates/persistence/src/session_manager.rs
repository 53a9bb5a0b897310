//! Session sharing across a transaction.
//!
//! ```text
//! open_session()
//!   ├─ no current transaction      -> fresh session, caller owns it
//!   └─ current transaction T
//!        ├─ unit of work stored for T -> its session
//!        └─ otherwise -> open, wrap in a unit of work, store under T,
//!                        finish it when T completes:
//!                          Committed -> commit, anything else -> rollback,
//!                          then dispose
//! ```

use std::fmt;
use std::sync::Arc;

use autotx_concurrency::{TransactionManager, TransactionStatus};
use autotx_core::{LocalIdentifier, Result};
use autotx_facility::AmbientTransactionOption;

use crate::session::Session;
use crate::store::TransactionStore;
use crate::unit_of_work::{ExplicitUnitOfWork, ImplicitUnitOfWork, UnitOfWork};

/// Units of work keyed by transaction.
pub type SessionStore = TransactionStore<Arc<dyn UnitOfWork>>;

type SessionSource = Box<dyn Fn() -> Result<Arc<dyn Session>> + Send + Sync>;

/// Hands out the session of the current transaction.
///
/// Inside a transaction the first call opens a session wrapped in a unit of
/// work and stores it under the transaction's identity; later calls in the
/// same transaction get the same session. When the transaction completes the
/// unit of work commits on `Committed`, rolls back otherwise, and is disposed.
///
/// Outside a transaction every call opens a new session the caller owns.
pub struct SessionManager {
    open: SessionSource,
    transaction_manager: Arc<TransactionManager>,
    store: Arc<SessionStore>,
    ambient_transaction: AmbientTransactionOption,
}

impl SessionManager {
    /// Manager opening sessions through `open`.
    pub fn new<F>(
        open: F,
        transaction_manager: Arc<TransactionManager>,
        store: Arc<SessionStore>,
        ambient_transaction: AmbientTransactionOption,
    ) -> Self
    where
        F: Fn() -> Result<Arc<dyn Session>> + Send + Sync + 'static,
    {
        Self {
            open: Box::new(open),
            transaction_manager,
            store,
            ambient_transaction,
        }
    }

    /// Session for the current transaction, or a fresh one outside any.
    pub fn open_session(&self) -> Result<Arc<dyn Session>> {
        let transaction = match self.transaction_manager.current_transaction() {
            Some(transaction) => transaction,
            None => return (self.open)(),
        };

        let id = transaction.local_identifier();
        let (unit_of_work, created) = self
            .store
            .get_or_try_insert_with(id, || self.create_unit_of_work())?;
        if created {
            tracing::debug!(tx = %id, session = %unit_of_work.current_session().id(), "stored session for transaction");
            let store = Arc::clone(&self.store);
            transaction.on_completed(move |status| finish_stored(&store, id, status));
        }
        Ok(Arc::clone(unit_of_work.current_session()))
    }

    /// Units of work waiting for their transaction to complete.
    pub fn pending(&self) -> usize {
        self.store.len()
    }

    fn create_unit_of_work(&self) -> Result<Arc<dyn UnitOfWork>> {
        let session = (self.open)()?;
        Ok(match self.ambient_transaction {
            AmbientTransactionOption::Enabled => Arc::new(ImplicitUnitOfWork::new(session)),
            AmbientTransactionOption::Disabled => Arc::new(ExplicitUnitOfWork::begin(session)?),
        })
    }
}

fn finish_stored(store: &SessionStore, id: LocalIdentifier, status: TransactionStatus) {
    let unit_of_work = match store.take(id) {
        Some(unit_of_work) => unit_of_work,
        None => return,
    };
    let result = match status {
        TransactionStatus::Committed => unit_of_work.commit(),
        TransactionStatus::Aborted | TransactionStatus::Active | TransactionStatus::InDoubt => {
            unit_of_work.rollback()
        }
    };
    if let Err(e) = result {
        tracing::warn!(tx = %id, ?status, error = %e, "error in the O-R persistence layer");
    }
    unit_of_work.dispose();
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("ambient_transaction", &self.ambient_transaction)
            .field("pending", &self.pending())
            .finish()
    }
}
