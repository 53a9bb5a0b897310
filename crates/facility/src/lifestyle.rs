//! Per-transaction lifetimes
//!
//! A scope context maps a transaction identity to a container [`Scope`]:
//!
//! ```text
//! resolve(per-transaction component)
//!   └─> PerTransactionReuse::current_scope
//!         └─> context.get_current_or_default
//!               ├─ no transaction        -> MissingTransaction
//!               ├─ scope for tx id found -> reuse it
//!               └─ otherwise             -> create under lock, subscribe to
//!                                           completion: remove + dispose
//! ```
//!
//! [`PerTransactionScopeContext`] keys off the innermost transaction, so every
//! forked dependent transaction gets its own scope.
//! [`PerTopTransactionScopeContext`] keys off the outermost one, so forks share
//! the scope of the transaction they were forked from.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autotx_concurrency::{Transaction, TransactionManager, TransactionStatus};
use autotx_container::{Request, Reuse, Scope, ScopeProvider};
use autotx_core::{Error, LocalIdentifier, Result, TypeInfo};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

/// Scope name of [`PerTransactionScopeContext`].
pub const PER_TRANSACTION_SCOPE_NAME: &str = "TransactionScopeContext";

/// Scope name of [`PerTopTransactionScopeContext`].
pub const PER_TOP_TRANSACTION_SCOPE_NAME: &str = "TopTransactionScopeContext";

/// Which transaction a scope context keys off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionSemantic {
    /// The innermost transaction.
    Current,
    /// The outermost transaction.
    Top,
}

struct ContextState {
    name: &'static str,
    storage: DashMap<LocalIdentifier, Arc<Scope>>,
    write_lock: Mutex<()>,
    disposed: AtomicBool,
}

impl ContextState {
    fn evict(&self, key: LocalIdentifier, status: TransactionStatus) {
        let removed = {
            let _guard = self.write_lock.lock();
            if self.disposed.load(Ordering::SeqCst) {
                return;
            }
            self.storage.remove(&key)
        };
        if let Some((_, scope)) = removed {
            scope.dispose();
            tracing::debug!(context = self.name, tx = %key, ?status, "transaction completed, scope disposed");
        }
    }
}

/// Transaction-keyed scope storage shared by both context flavors.
///
/// A scope is created the first time a component is resolved inside a
/// transaction and disposed, with everything it holds, when that transaction's
/// family completes. Scopes still open when the context is disposed are
/// disposed then.
pub struct PerTransactionScopeContextBase {
    state: Arc<ContextState>,
    manager: Arc<TransactionManager>,
    semantic: TransactionSemantic,
}

impl PerTransactionScopeContextBase {
    /// Context named `name` keyed by `semantic`.
    pub fn new(
        name: &'static str,
        manager: Arc<TransactionManager>,
        semantic: TransactionSemantic,
    ) -> Self {
        Self {
            state: Arc::new(ContextState {
                name,
                storage: DashMap::new(),
                write_lock: Mutex::new(()),
                disposed: AtomicBool::new(false),
            }),
            manager,
            semantic,
        }
    }

    /// Context name.
    pub fn name(&self) -> &'static str {
        self.state.name
    }

    fn semantic_transaction(&self) -> Option<Arc<Transaction>> {
        match self.semantic {
            TransactionSemantic::Current => self.manager.current_transaction(),
            TransactionSemantic::Top => self.manager.current_top_transaction(),
        }
    }

    /// Whether a transaction this context can key off is ambient.
    pub fn is_current_transaction(&self) -> bool {
        self.semantic_transaction().is_some()
    }

    /// Scope of the ambient transaction, created on first use.
    ///
    /// Fails with [`Error::MissingTransaction`] outside a transaction and with
    /// [`Error::Disposed`] after [`dispose`](Self::dispose).
    pub fn get_current_or_default(&self, service: TypeInfo) -> Result<Arc<Scope>> {
        if self.is_disposed() {
            return Err(Error::Disposed(format!("{} scope context", self.state.name)));
        }

        let transaction = self.semantic_transaction().ok_or_else(|| {
            Error::MissingTransaction(format!(
                "No transaction in context when trying to instantiate model for resolve type {}. \
                 If you have verified that your call stack contains a method with a transaction \
                 attribute, then also make sure that you have registered the AutoTx facility.",
                service
            ))
        })?;
        let key = transaction.local_identifier();

        if let Some(scope) = self.state.storage.get(&key) {
            return Ok(Arc::clone(scope.value()));
        }

        let scope = {
            let _guard = self.state.write_lock.lock();
            if self.is_disposed() {
                return Err(Error::Disposed(format!("{} scope context", self.state.name)));
            }
            if let Some(scope) = self.state.storage.get(&key) {
                return Ok(Arc::clone(scope.value()));
            }
            let scope = Arc::new(Scope::new(format!("{}:{}", self.state.name, key)));
            self.state.storage.insert(key, Arc::clone(&scope));
            scope
        };
        tracing::debug!(context = self.state.name, tx = %key, service = %service, "created transaction scope");

        let state = Arc::downgrade(&self.state);
        transaction.on_completed(move |status| {
            if let Some(state) = state.upgrade() {
                state.evict(key, status);
            }
        });
        Ok(scope)
    }

    /// Number of live scopes.
    pub fn open_scopes(&self) -> usize {
        self.state.storage.len()
    }

    /// Whether [`dispose`](Self::dispose) ran.
    pub fn is_disposed(&self) -> bool {
        self.state.disposed.load(Ordering::SeqCst)
    }

    /// Dispose every outstanding scope. Repeated calls only log.
    pub fn dispose(&self) {
        if self.state.disposed.swap(true, Ordering::SeqCst) {
            tracing::info!(context = self.state.name, "repeated call to dispose, ignoring");
            return;
        }
        let scopes = {
            let _guard = self.state.write_lock.lock();
            let count = self.state.storage.len();
            if count > 0 {
                tracing::warn!(context = self.state.name, count, "storage contains {} items at dispose", count);
            }
            let scopes: Vec<Arc<Scope>> = self
                .state
                .storage
                .iter()
                .map(|entry| Arc::clone(entry.value()))
                .collect();
            self.state.storage.clear();
            scopes
        };
        for scope in scopes {
            scope.dispose();
        }
    }
}

impl fmt::Debug for PerTransactionScopeContextBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerTransactionScopeContextBase")
            .field("name", &self.state.name)
            .field("semantic", &self.semantic)
            .field("open_scopes", &self.open_scopes())
            .finish()
    }
}

/// Scope context keyed by the innermost transaction.
#[derive(Debug)]
pub struct PerTransactionScopeContext(PerTransactionScopeContextBase);

impl PerTransactionScopeContext {
    /// New context over `manager`.
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self(PerTransactionScopeContextBase::new(
            PER_TRANSACTION_SCOPE_NAME,
            manager,
            TransactionSemantic::Current,
        ))
    }
}

impl Deref for PerTransactionScopeContext {
    type Target = PerTransactionScopeContextBase;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Scope context keyed by the outermost transaction.
#[derive(Debug)]
pub struct PerTopTransactionScopeContext(PerTransactionScopeContextBase);

impl PerTopTransactionScopeContext {
    /// New context over `manager`.
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self(PerTransactionScopeContextBase::new(
            PER_TOP_TRANSACTION_SCOPE_NAME,
            manager,
            TransactionSemantic::Top,
        ))
    }
}

impl Deref for PerTopTransactionScopeContext {
    type Target = PerTransactionScopeContextBase;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Scoped reuse backed by the container's [`PerTransactionScopeContext`].
///
/// The context is resolved on first use, from the container of that request.
#[derive(Default)]
pub struct PerTransactionReuse {
    context: OnceCell<Arc<PerTransactionScopeContext>>,
}

impl ScopeProvider for PerTransactionReuse {
    fn name(&self) -> &str {
        PER_TRANSACTION_SCOPE_NAME
    }

    fn current_scope(&self, request: &Request<'_>) -> Result<Arc<Scope>> {
        let context = self
            .context
            .get_or_try_init(|| request.container().resolve::<PerTransactionScopeContext>())?;
        context.get_current_or_default(request.service_type())
    }
}

/// Scoped reuse backed by the container's [`PerTopTransactionScopeContext`].
#[derive(Default)]
pub struct PerTopTransactionReuse {
    context: OnceCell<Arc<PerTopTransactionScopeContext>>,
}

impl ScopeProvider for PerTopTransactionReuse {
    fn name(&self) -> &str {
        PER_TOP_TRANSACTION_SCOPE_NAME
    }

    fn current_scope(&self, request: &Request<'_>) -> Result<Arc<Scope>> {
        let context = self
            .context
            .get_or_try_init(|| request.container().resolve::<PerTopTransactionScopeContext>())?;
        context.get_current_or_default(request.service_type())
    }
}

/// Per-transaction reuse policies.
pub struct AutoTxReuse;

impl AutoTxReuse {
    /// One instance per transaction; forks get their own.
    pub fn per_transaction() -> Reuse {
        Reuse::scoped(PerTransactionReuse::default())
    }

    /// One instance per top-level transaction; forks share it.
    pub fn per_top_transaction() -> Reuse {
        Reuse::scoped(PerTopTransactionReuse::default())
    }
}
