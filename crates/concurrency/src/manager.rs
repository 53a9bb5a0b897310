//! Transaction manager
//!
//! The sole authority for creating and joining transactions. Decisions made by
//! [`TransactionManager::create_transaction`]:
//!
//! | Mode | Current transaction | Fork | Result |
//! |------|---------------------|------|--------|
//! | `Suppress` | any | any | `None` |
//! | `Requires` / `RequiresNew` | none | any | new root, pushed on the activity |
//! | `Requires` | some | no | the current transaction, flagged as joined |
//! | `RequiresNew` | some | no | new root, pushed on the activity |
//! | any but `Suppress` | some | yes | dependent clone, delivered through a fork scope |
//!
//! Whenever a value is returned the transaction is `Active`.

use std::fmt;
use std::sync::Arc;

use autotx_core::{
    Result, TransactionAttribute, TransactionMode, TransactionOptions, TransactionState,
};

use crate::activity::{Activity, ActivityManager};
use crate::platform::{DependentCloneOption, PlatformTransaction};
use crate::scope::TxScope;
use crate::transaction::{DependentTask, Transaction};

/// Result of [`TransactionManager::create_transaction`].
pub struct CreatedTransaction {
    transaction: Arc<Transaction>,
    should_fork: bool,
    joined: bool,
    activity_manager: Arc<dyn ActivityManager>,
}

impl CreatedTransaction {
    /// The transaction.
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.transaction
    }

    /// Whether the caller must run the work on a separate unit of work.
    pub fn should_fork(&self) -> bool {
        self.should_fork
    }

    /// Whether this is the caller's existing transaction rather than a new one.
    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Seed the current flow with a fresh activity holding the dependent
    /// transaction. Meant to be called on the forked unit of work.
    pub fn fork_scope(&self) -> ForkScope {
        ForkScope::enter(
            Arc::clone(&self.activity_manager),
            Arc::clone(&self.transaction),
        )
    }
}

impl fmt::Debug for CreatedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatedTransaction")
            .field("transaction", &self.transaction)
            .field("should_fork", &self.should_fork)
            .field("joined", &self.joined)
            .finish()
    }
}

/// Guard installing a fork's activity; restores the previous one on drop.
#[must_use = "the fork's activity is removed when the scope is dropped"]
pub struct ForkScope {
    manager: Arc<dyn ActivityManager>,
    activity: Arc<Activity>,
    transaction: Arc<Transaction>,
    previous: Option<Arc<Activity>>,
}

impl ForkScope {
    fn enter(manager: Arc<dyn ActivityManager>, transaction: Arc<Transaction>) -> Self {
        let activity = Arc::new(Activity::new());
        activity.push(Arc::clone(&transaction));
        let previous = manager.install(Some(Arc::clone(&activity)));
        tracing::debug!(tx = %transaction.local_identifier(), activity = %activity.id(), "entered fork scope");
        Self {
            manager,
            activity,
            transaction,
            previous,
        }
    }

    /// The activity installed for the fork.
    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }
}

impl Drop for ForkScope {
    fn drop(&mut self) {
        self.activity.pop(self.transaction.local_identifier());
        self.manager.install(self.previous.take());
    }
}

/// Guard hiding the ambient transaction from nested code.
#[must_use = "suppression ends when the scope is dropped"]
pub struct SuppressionScope {
    activity: Arc<Activity>,
    _ambient: TxScope,
}

impl Drop for SuppressionScope {
    fn drop(&mut self) {
        self.activity.pop_suppression();
    }
}

/// Creates, tracks and forks transactions.
///
/// The manager decides, per transactional call, whether a new transaction is
/// needed:
/// - `Suppress` yields no transaction; the caller hides the ambient one
/// - `Requires` joins the current transaction when there is one
/// - `RequiresNew` always pushes a new committable root
/// - a forked attribute with a current transaction yields a dependent clone
///   that blocks the root's commit until it completes
///
/// New roots are pushed onto the caller's [`Activity`] and popped again when
/// the transaction is disposed. The manager itself holds no per-call state,
/// so one instance serves every thread.
///
/// # Thread Safety
///
/// Which activity is "current" is decided by the [`ActivityManager`]: per OS
/// thread or per async flow. Forked work runs on another thread and installs
/// its own activity through [`ForkScope`].
pub struct TransactionManager {
    activity_manager: Arc<dyn ActivityManager>,
    defaults: TransactionOptions,
}

impl TransactionManager {
    /// Manager using `activity_manager` for flow identity.
    pub fn new(activity_manager: Arc<dyn ActivityManager>) -> Self {
        Self {
            activity_manager,
            defaults: TransactionOptions::default(),
        }
    }

    /// Replace the options used when an attribute leaves values unset.
    pub fn with_defaults(mut self, defaults: TransactionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Defaults applied to attributes.
    pub fn defaults(&self) -> &TransactionOptions {
        &self.defaults
    }

    /// The activity manager.
    pub fn activity_manager(&self) -> &Arc<dyn ActivityManager> {
        &self.activity_manager
    }

    /// Create or join a transaction for a method carrying `attribute`.
    ///
    /// Unset attribute values fall back to [`defaults`](Self::defaults).
    /// Returns `None` when the attribute suppresses transactions.
    pub fn create_transaction(
        &self,
        attribute: &TransactionAttribute,
    ) -> Result<Option<CreatedTransaction>> {
        self.create_transaction_with(attribute.resolve(&self.defaults))
    }

    /// Create or join a transaction with fully resolved options.
    ///
    /// Errors from the platform primitive propagate unchanged.
    pub fn create_transaction_with(
        &self,
        options: TransactionOptions,
    ) -> Result<Option<CreatedTransaction>> {
        if options.mode == TransactionMode::Suppress {
            tracing::debug!("transaction suppressed");
            return Ok(None);
        }

        let activity = self.activity_manager.current_activity();

        if let Some(current) = activity.current_transaction() {
            if options.fork {
                let inner = current
                    .inner()
                    .dependent_clone(DependentCloneOption::BlockCommitUntilComplete)?;
                let dependent = Arc::new(Transaction::dependent(inner, current, options));
                tracing::debug!(tx = %dependent.local_identifier(), "created dependent transaction for fork");
                return Ok(Some(self.created(dependent, true, false)));
            }
            if options.mode == TransactionMode::Requires {
                return Ok(Some(self.created(current, false, true)));
            }
        }

        let inner = PlatformTransaction::committable(options.isolation_level, options.timeout);
        let id = inner.local_identifier();
        let on_dispose = {
            let activity = Arc::downgrade(&activity);
            Box::new(move || {
                if let Some(activity) = activity.upgrade() {
                    activity.pop(id);
                }
            })
        };
        let transaction = Arc::new(Transaction::new(
            inner,
            activity.count() + 1,
            options,
            Some(on_dispose),
        ));
        activity.push(Arc::clone(&transaction));
        tracing::debug!(tx = %id, depth = transaction.stack_depth(), "created transaction");

        debug_assert_eq!(transaction.state(), TransactionState::Active);
        Ok(Some(self.created(transaction, false, false)))
    }

    fn created(
        &self,
        transaction: Arc<Transaction>,
        should_fork: bool,
        joined: bool,
    ) -> CreatedTransaction {
        CreatedTransaction {
            transaction,
            should_fork,
            joined,
            activity_manager: Arc::clone(&self.activity_manager),
        }
    }

    /// Innermost visible transaction of the current flow.
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        self.activity_manager
            .installed()
            .and_then(|activity| activity.current_transaction())
    }

    /// Outermost visible transaction of the current flow, resolved to its root
    /// across fork boundaries.
    pub fn current_top_transaction(&self) -> Option<Arc<Transaction>> {
        self.activity_manager
            .installed()
            .and_then(|activity| activity.top_transaction())
    }

    /// Number of transactions on the current flow's stack.
    pub fn count(&self) -> usize {
        self.activity_manager
            .installed()
            .map_or(0, |activity| activity.count())
    }

    /// Hand a forked unit of work to the current transaction so its
    /// completion observes the outcome.
    pub fn enlist_dependent_task(&self, task: DependentTask) {
        match self.current_transaction() {
            Some(parent) => parent.register_dependent(task),
            None => {
                tracing::warn!(dependent = %task.id(), "no current transaction to enlist dependent task with; detaching")
            }
        }
    }

    /// Hide the ambient transaction until the returned guard drops.
    pub fn suppress(&self) -> SuppressionScope {
        let activity = self.activity_manager.current_activity();
        activity.push_suppression();
        SuppressionScope {
            activity,
            _ambient: TxScope::suppress(),
        }
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("defaults", &self.defaults)
            .field("count", &self.count())
            .finish()
    }
}
