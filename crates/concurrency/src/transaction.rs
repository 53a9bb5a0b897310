//! Transaction wrapper
//!
//! [`Transaction`] wraps one [`PlatformTransaction`] handle and enforces the
//! state machine:
//!
//! ```text
//! Active -> { CommittedOrCompleted | Aborted | InDoubt } -> Disposed
//! ```
//!
//! It also owns the forked units of work registered against it: completing a
//! transaction first joins every dependent task and fails with
//! [`Error::DependentTransactionsFailed`] if any of them failed.

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use autotx_core::{Error, LocalIdentifier, Result, TransactionOptions, TransactionState};
use parking_lot::Mutex;

use crate::platform::{PlatformTransaction, TransactionStatus};
use crate::scope::TxScope;

type DisposeAction = Box<dyn FnOnce() + Send>;

/// A forked unit of work running a dependent transaction.
pub struct DependentTask {
    id: LocalIdentifier,
    handle: JoinHandle<Result<()>>,
}

impl DependentTask {
    /// Run `work` on a new thread.
    pub fn spawn<F>(id: LocalIdentifier, work: F) -> Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("autotx-fork-{}", id.sequence()))
            .spawn(work)
            .map_err(|e| Error::Internal(format!("failed to spawn forked unit of work: {}", e)))?;
        Ok(Self { id, handle })
    }

    /// Identity of the dependent transaction.
    pub fn id(&self) -> LocalIdentifier {
        self.id
    }

    /// Whether the unit of work has finished running.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the unit of work and return its result.
    pub fn join(self) -> Result<()> {
        match self.handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::Internal(format!(
                "forked unit of work {} panicked",
                self.id
            ))),
        }
    }
}

impl fmt::Debug for DependentTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentTask")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// One logical transaction.
///
/// Created by the transaction manager; shared through `Arc` between the
/// activity stack and the interceptor. Dropping the last reference disposes.
///
/// A root wraps a committable [`PlatformTransaction`]; a dependent wraps a
/// clone of its parent's and keeps the parent alive. Completing a dependent
/// only releases the clone; the family's outcome is decided by the root.
///
/// # Lifecycle
///
/// 1. `Active`: work may enlist; forked tasks are registered here
/// 2. [`complete`](Self::complete) or [`rollback`](Self::rollback) decide the
///    outcome after joining dependents
/// 3. [`dispose`](Self::dispose) releases the transaction; the creator always
///    disposes, whatever happened before
///
/// Completion handlers see the platform status and run on the thread that
/// finished the family.
pub struct Transaction {
    id: LocalIdentifier,
    inner: PlatformTransaction,
    options: TransactionOptions,
    stack_depth: usize,
    parent: Option<Arc<Transaction>>,
    state: Mutex<TransactionState>,
    on_dispose: Mutex<Option<DisposeAction>>,
    dependents: Mutex<Vec<DependentTask>>,
}

impl Transaction {
    /// Wrap a committable root.
    pub fn new(
        inner: PlatformTransaction,
        stack_depth: usize,
        options: TransactionOptions,
        on_dispose: Option<DisposeAction>,
    ) -> Self {
        Self {
            id: inner.local_identifier(),
            inner,
            options,
            stack_depth,
            parent: None,
            state: Mutex::new(TransactionState::Active),
            on_dispose: Mutex::new(on_dispose),
            dependents: Mutex::new(Vec::new()),
        }
    }

    /// Wrap a dependent clone of `parent`.
    pub fn dependent(
        inner: PlatformTransaction,
        parent: Arc<Transaction>,
        options: TransactionOptions,
    ) -> Self {
        Self {
            id: inner.local_identifier(),
            inner,
            options,
            stack_depth: parent.stack_depth + 1,
            parent: Some(parent),
            state: Mutex::new(TransactionState::Active),
            on_dispose: Mutex::new(None),
            dependents: Mutex::new(Vec::new()),
        }
    }

    /// Stable identity.
    pub fn local_identifier(&self) -> LocalIdentifier {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Wrapped platform handle.
    pub fn inner(&self) -> &PlatformTransaction {
        &self.inner
    }

    /// Options the transaction was created with.
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Nesting depth at creation; roots start at 1.
    pub fn stack_depth(&self) -> usize {
        self.stack_depth
    }

    /// Transaction this one was cloned from.
    pub fn parent(&self) -> Option<&Arc<Transaction>> {
        self.parent.as_ref()
    }

    /// Whether this wraps a dependent clone.
    pub fn is_dependent(&self) -> bool {
        self.parent.is_some()
    }

    /// Make this transaction ambient on the current thread until the scope drops.
    pub fn scope(&self) -> TxScope {
        TxScope::new(&self.inner)
    }

    /// Run `handler` with the platform outcome once it is known.
    ///
    /// For dependent transactions the outcome is that of the whole family.
    pub fn on_completed<F>(&self, handler: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        self.inner.on_completed(handler);
    }

    /// Track a forked unit of work so completion waits for it.
    pub fn register_dependent(&self, task: DependentTask) {
        tracing::debug!(tx = %self.id, dependent = %task.id(), "registered dependent task");
        self.dependents.lock().push(task);
    }

    /// Number of forked units of work not yet joined.
    pub fn pending_dependents(&self) -> usize {
        self.dependents.lock().len()
    }

    fn join_dependents(&self) -> Vec<Error> {
        let tasks = std::mem::take(&mut *self.dependents.lock());
        tasks
            .into_iter()
            .filter_map(|task| {
                let id = task.id();
                task.join().err().map(|e| {
                    tracing::warn!(tx = %self.id, dependent = %id, error = %e, "dependent transaction failed");
                    e
                })
            })
            .collect()
    }

    fn transition(&self, next: TransactionState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
        }
    }

    /// Commit (root) or complete (dependent) the transaction.
    ///
    /// Valid only while `Active`. Forked units of work registered on this
    /// transaction are joined first; any failure among them rolls the
    /// transaction back and is returned as an aggregate.
    pub fn complete(&self) -> Result<()> {
        let state = self.state();
        if state != TransactionState::Active {
            return Err(Error::InvalidState {
                id: self.id,
                operation: "complete",
                state,
            });
        }

        let failures = self.join_dependents();
        if !failures.is_empty() {
            if let Err(e) = self.inner.rollback("one or more dependent transactions failed") {
                tracing::error!(tx = %self.id, error = %e, "rollback after dependent failure failed");
            }
            self.transition(TransactionState::Aborted);
            return Err(Error::DependentTransactionsFailed(failures));
        }

        let result = if self.is_dependent() {
            self.inner.complete_dependent()
        } else {
            self.inner.commit()
        };

        match result {
            Ok(()) => {
                self.transition(TransactionState::CommittedOrCompleted);
                tracing::debug!(tx = %self.id, "transaction completed");
                Ok(())
            }
            Err(e @ Error::TransactionInDoubt(_)) => {
                self.transition(TransactionState::InDoubt);
                Err(e)
            }
            Err(e) => {
                if e.is_aborted() {
                    self.transition(TransactionState::Aborted);
                }
                Err(e)
            }
        }
    }

    /// Roll back. Valid from any state except `Disposed`.
    pub fn rollback(&self) -> Result<()> {
        let state = self.state();
        if state == TransactionState::Disposed {
            return Err(Error::InvalidState {
                id: self.id,
                operation: "roll back",
                state,
            });
        }
        if state == TransactionState::Active || self.inner.status() == TransactionStatus::Active {
            self.inner.rollback("explicit rollback")?;
        }
        self.transition(TransactionState::Aborted);
        Ok(())
    }

    /// Dispose the transaction.
    ///
    /// Forked units of work registered on this transaction are joined first.
    /// Only then is an `Active` transaction rolled back (a dependent one is
    /// released without completion, dooming its family), so completion
    /// handlers never tear down state a running fork still uses. Repeated
    /// calls only log.
    pub fn dispose(&self) {
        self.dispose_inner(true);
    }

    fn dispose_inner(&self, explicit: bool) {
        let previous = {
            let mut state = self.state.lock();
            if *state == TransactionState::Disposed {
                drop(state);
                if explicit {
                    tracing::info!(tx = %self.id, "repeated call to dispose, ignoring");
                }
                return;
            }
            std::mem::replace(&mut *state, TransactionState::Disposed)
        };

        // Forked work still uses resources scoped to this transaction; they are
        // released by the rollback below.
        for e in self.join_dependents() {
            tracing::debug!(tx = %self.id, error = %e, "dependent failure observed at dispose");
        }

        if previous == TransactionState::Active {
            if self.is_dependent() {
                self.inner.abandon();
            } else if let Err(e) = self.inner.rollback("disposed without completion") {
                tracing::warn!(tx = %self.id, error = %e, "rollback on dispose failed");
            }
            tracing::debug!(tx = %self.id, "rolled back on dispose");
        }

        let action = self.on_dispose.lock().take();
        if let Some(action) = action {
            action();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        self.dispose_inner(false);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("depth", &self.stack_depth)
            .field("dependent", &self.is_dependent())
            .finish()
    }
}
