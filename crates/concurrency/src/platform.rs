//! Platform transaction primitive
//!
//! A small, in-process stand-in for an ambient transaction library. It owns
//! the parts of transaction semantics that the rest of the workspace treats as
//! given: commit/rollback outcomes, dependent clones, timeouts, volatile
//! enlistments, completion notification and the per-thread ambient binding.
//!
//! ## Families
//!
//! A committable root and all of its dependent clones form one family and
//! share one outcome:
//!
//! ```text
//! root (seq 1) ──dependent_clone──> clone (seq 2)
//!      │                              │
//!      │  commit() waits for every    │ complete_dependent()
//!      │  blocking clone, then        │ or rollback()/drop
//!      ▼  prepares enlistments        ▼
//!   Committed | Aborted | InDoubt  (fired once to every handler)
//! ```
//!
//! A clone released without completing dooms the family.

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use autotx_core::{Error, IsolationLevel, LocalIdentifier, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};

/// Outcome of a platform transaction family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Not yet decided
    Active,
    /// Committed
    Committed,
    /// Rolled back
    Aborted,
    /// A resource manager could not confirm the outcome
    InDoubt,
}

/// What a dependent clone means for the root's commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependentCloneOption {
    /// Root commit waits until the clone completes.
    BlockCommitUntilComplete,
    /// Root commit does not wait; an incomplete clone at commit time aborts.
    RollbackIfNotComplete,
}

/// Prepare-phase vote of an enlistment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Vote {
    /// Ready to commit
    Prepared,
    /// Refuse; the family aborts with this reason
    ForceRollback(String),
    /// Cannot tell; the family ends in doubt
    InDoubt,
}

/// Volatile resource manager taking part in a transaction family.
pub trait Enlistment: Send + Sync {
    /// Vote on the outcome.
    fn prepare(&self) -> Vote {
        Vote::Prepared
    }

    /// Make the work durable.
    fn commit(&self);

    /// Discard the work.
    fn rollback(&self);

    /// Outcome unknown.
    fn in_doubt(&self) {}
}

/// Snapshot of a transaction's identity and status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInformation {
    /// Identity of this handle (root or clone)
    pub local_identifier: LocalIdentifier,
    /// Wall-clock creation time of the family
    pub creation_time: DateTime<Utc>,
    /// Family outcome so far
    pub status: TransactionStatus,
}

type CompletionHandler = Box<dyn FnOnce(TransactionStatus) + Send>;

struct FamilyState {
    status: TransactionStatus,
    /// Blocking clones not yet completed or released
    outstanding: usize,
    /// Non-blocking clones not yet completed or released
    unfinished: usize,
    doomed: Option<String>,
    enlistments: Vec<Arc<dyn Enlistment>>,
    handlers: Vec<CompletionHandler>,
}

struct Family {
    root_id: LocalIdentifier,
    isolation_level: IsolationLevel,
    timeout: Duration,
    started: Instant,
    creation_time: DateTime<Utc>,
    next_sequence: AtomicU32,
    state: Mutex<FamilyState>,
    clones_done: Condvar,
}

impl Family {
    /// Record the outcome once and notify enlistments and handlers outside the lock.
    fn finish(&self, outcome: TransactionStatus) -> bool {
        let (enlistments, handlers) = {
            let mut state = self.state.lock();
            if state.status != TransactionStatus::Active {
                return false;
            }
            state.status = outcome;
            (
                std::mem::take(&mut state.enlistments),
                std::mem::take(&mut state.handlers),
            )
        };
        self.clones_done.notify_all();

        for enlistment in &enlistments {
            match outcome {
                TransactionStatus::Committed => enlistment.commit(),
                TransactionStatus::Aborted => enlistment.rollback(),
                TransactionStatus::InDoubt => enlistment.in_doubt(),
                TransactionStatus::Active => {}
            }
        }
        for handler in handlers {
            handler(outcome);
        }

        tracing::debug!(tx = %self.root_id, outcome = ?outcome, "platform transaction finished");
        true
    }

    fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }
}

struct CloneState {
    family: Arc<Family>,
    id: LocalIdentifier,
    blocking: bool,
    finished: AtomicBool,
}

impl CloneState {
    /// Stop counting this clone; returns false when it was already released.
    fn release(&self) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            return false;
        }
        {
            let mut state = self.family.state.lock();
            if self.blocking {
                state.outstanding = state.outstanding.saturating_sub(1);
            } else {
                state.unfinished = state.unfinished.saturating_sub(1);
            }
        }
        self.family.clones_done.notify_all();
        true
    }

    fn abandon(&self) {
        if !self.release() {
            return;
        }
        let mut state = self.family.state.lock();
        if state.status == TransactionStatus::Active && state.doomed.is_none() {
            state.doomed = Some(format!("dependent transaction {} was not completed", self.id));
        }
        drop(state);
        tracing::debug!(tx = %self.id, "dependent transaction released without completion");
    }
}

impl Drop for CloneState {
    fn drop(&mut self) {
        self.abandon();
    }
}

#[derive(Clone)]
enum Kind {
    Committable,
    Dependent(Arc<CloneState>),
}

/// Handle to a platform transaction: a committable root or a dependent clone.
///
/// Cloning the handle does not create a new transaction.
///
/// Every handle of a family shares the same outcome and the same
/// enlistments. Only the root can commit. Commit waits for
/// blocking clones, then asks every enlistment to prepare; any refusal aborts
/// the whole family. A rollback from any handle aborts the family as well.
///
/// The family outcome is final: once it is `Committed`, `Aborted` or
/// `InDoubt`, enlisting fails with [`Error::TransactionAborted`] and new
/// completion handlers fire immediately.
#[derive(Clone)]
pub struct PlatformTransaction {
    family: Arc<Family>,
    kind: Kind,
}

impl PlatformTransaction {
    /// Start a new committable root.
    pub fn committable(isolation_level: IsolationLevel, timeout: Duration) -> Self {
        let family = Family {
            root_id: LocalIdentifier::new_root(),
            isolation_level,
            timeout,
            started: Instant::now(),
            creation_time: Utc::now(),
            next_sequence: AtomicU32::new(2),
            state: Mutex::new(FamilyState {
                status: TransactionStatus::Active,
                outstanding: 0,
                unfinished: 0,
                doomed: None,
                enlistments: Vec::new(),
                handlers: Vec::new(),
            }),
            clones_done: Condvar::new(),
        };
        tracing::debug!(tx = %family.root_id, ?isolation_level, "platform transaction started");
        Self {
            family: Arc::new(family),
            kind: Kind::Committable,
        }
    }

    /// Identity of this handle.
    pub fn local_identifier(&self) -> LocalIdentifier {
        match &self.kind {
            Kind::Committable => self.family.root_id,
            Kind::Dependent(clone) => clone.id,
        }
    }

    /// Identity and status snapshot.
    pub fn information(&self) -> TransactionInformation {
        TransactionInformation {
            local_identifier: self.local_identifier(),
            creation_time: self.family.creation_time,
            status: self.family.status(),
        }
    }

    /// Family outcome so far.
    pub fn status(&self) -> TransactionStatus {
        self.family.status()
    }

    /// Requested isolation level.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.family.isolation_level
    }

    /// Whether this handle is a dependent clone.
    pub fn is_dependent(&self) -> bool {
        matches!(self.kind, Kind::Dependent(_))
    }

    /// Whether both handles belong to the same family.
    pub fn same_family(&self, other: &PlatformTransaction) -> bool {
        Arc::ptr_eq(&self.family, &other.family)
    }

    /// Create a dependent clone sharing this family's outcome.
    pub fn dependent_clone(&self, option: DependentCloneOption) -> Result<PlatformTransaction> {
        let blocking = option == DependentCloneOption::BlockCommitUntilComplete;
        {
            let mut state = self.family.state.lock();
            if state.status != TransactionStatus::Active {
                return Err(Error::aborted(format!(
                    "cannot clone transaction {} in status {:?}",
                    self.local_identifier(),
                    state.status
                )));
            }
            if blocking {
                state.outstanding += 1;
            } else {
                state.unfinished += 1;
            }
        }
        let sequence = self.family.next_sequence.fetch_add(1, Ordering::SeqCst);
        let id = self.family.root_id.clone_with_sequence(sequence);
        tracing::debug!(tx = %id, parent = %self.local_identifier(), ?option, "dependent transaction cloned");

        Ok(Self {
            family: Arc::clone(&self.family),
            kind: Kind::Dependent(Arc::new(CloneState {
                family: Arc::clone(&self.family),
                id,
                blocking,
                finished: AtomicBool::new(false),
            })),
        })
    }

    /// Signal that a dependent clone finished its work.
    pub fn complete_dependent(&self) -> Result<()> {
        let clone = match &self.kind {
            Kind::Dependent(clone) => clone,
            Kind::Committable => {
                return Err(Error::Internal(
                    "complete_dependent called on a committable transaction".into(),
                ))
            }
        };
        match self.family.status() {
            TransactionStatus::Active => {}
            TransactionStatus::Aborted => {
                return Err(Error::aborted(format!(
                    "transaction {} was aborted before the dependent completed",
                    clone.id
                )))
            }
            status => {
                return Err(Error::Internal(format!(
                    "dependent {} completed after its family finished as {:?}",
                    clone.id, status
                )))
            }
        }
        if !clone.release() {
            return Err(Error::Internal(format!(
                "dependent transaction {} was already released",
                clone.id
            )));
        }
        Ok(())
    }

    /// Release a dependent clone without completing it, dooming the family.
    ///
    /// No-op for committable roots and for clones already released.
    pub fn abandon(&self) {
        if let Kind::Dependent(clone) = &self.kind {
            clone.abandon();
        }
    }

    /// Commit the family. Only valid on the committable root.
    ///
    /// Waits for blocking clones until the timeout elapses, then runs the
    /// prepare phase of every enlistment.
    pub fn commit(&self) -> Result<()> {
        if self.is_dependent() {
            return Err(Error::Internal(format!(
                "dependent transaction {} cannot be committed",
                self.local_identifier()
            )));
        }

        let deadline = self.family.started + self.family.timeout;
        let (doomed, enlistments) = {
            let mut state = self.family.state.lock();
            while state.outstanding > 0 && state.status == TransactionStatus::Active {
                if self
                    .family
                    .clones_done
                    .wait_until(&mut state, deadline)
                    .timed_out()
                {
                    break;
                }
            }

            match state.status {
                TransactionStatus::Active => {}
                TransactionStatus::Aborted => {
                    let reason = state
                        .doomed
                        .clone()
                        .unwrap_or_else(|| "transaction was rolled back".to_string());
                    return Err(Error::aborted(reason));
                }
                status => {
                    return Err(Error::Internal(format!(
                        "transaction {} already finished as {:?}",
                        self.family.root_id, status
                    )))
                }
            }

            let doomed = if state.outstanding > 0 {
                Some(format!(
                    "timed out waiting for {} dependent transaction(s)",
                    state.outstanding
                ))
            } else if state.unfinished > 0 {
                Some(format!(
                    "{} dependent transaction(s) were not complete at commit",
                    state.unfinished
                ))
            } else if let Some(reason) = state.doomed.take() {
                Some(reason)
            } else if Instant::now() > deadline {
                Some(format!(
                    "transaction timeout of {:?} elapsed",
                    self.family.timeout
                ))
            } else {
                None
            };
            (doomed, state.enlistments.clone())
        };

        if let Some(reason) = doomed {
            self.family.finish(TransactionStatus::Aborted);
            return Err(Error::aborted(reason));
        }

        let mut in_doubt = false;
        for enlistment in &enlistments {
            match enlistment.prepare() {
                Vote::Prepared => {}
                Vote::ForceRollback(reason) => {
                    self.family.finish(TransactionStatus::Aborted);
                    return Err(Error::aborted(reason));
                }
                Vote::InDoubt => in_doubt = true,
            }
        }

        let outcome = if in_doubt {
            TransactionStatus::InDoubt
        } else {
            TransactionStatus::Committed
        };
        if !self.family.finish(outcome) {
            return Err(Error::aborted(format!(
                "transaction {} was completed concurrently",
                self.family.root_id
            )));
        }
        if in_doubt {
            return Err(Error::TransactionInDoubt(format!(
                "an enlisted resource could not confirm the outcome of {}",
                self.family.root_id
            )));
        }
        Ok(())
    }

    /// Abort the family.
    ///
    /// Rolling back a clone aborts its root too. Rolling back an already
    /// aborted family is a no-op.
    pub fn rollback(&self, reason: &str) -> Result<()> {
        if let Kind::Dependent(clone) = &self.kind {
            clone.release();
        }
        if self.family.finish(TransactionStatus::Aborted) {
            tracing::debug!(tx = %self.local_identifier(), reason, "platform transaction rolled back");
            return Ok(());
        }
        match self.family.status() {
            TransactionStatus::Aborted => Ok(()),
            status => Err(Error::Internal(format!(
                "cannot roll back transaction {} after it finished as {:?}",
                self.local_identifier(),
                status
            ))),
        }
    }

    /// Run `handler` once the family outcome is known.
    ///
    /// Fires immediately when the outcome is already known.
    pub fn on_completed<F>(&self, handler: F)
    where
        F: FnOnce(TransactionStatus) + Send + 'static,
    {
        let mut state = self.family.state.lock();
        if state.status == TransactionStatus::Active {
            state.handlers.push(Box::new(handler));
            return;
        }
        let status = state.status;
        drop(state);
        handler(status);
    }

    /// Enlist a volatile resource manager.
    pub fn enlist(&self, enlistment: Arc<dyn Enlistment>) -> Result<()> {
        let mut state = self.family.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(Error::aborted(format!(
                "cannot enlist in transaction {} with status {:?}",
                self.local_identifier(),
                state.status
            )));
        }
        state.enlistments.push(enlistment);
        Ok(())
    }
}

impl fmt::Debug for PlatformTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformTransaction")
            .field("id", &self.local_identifier())
            .field("dependent", &self.is_dependent())
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// Ambient binding
// ============================================================================

thread_local! {
    /// `None` entries are suppression markers.
    static AMBIENT: RefCell<Vec<Option<PlatformTransaction>>> = RefCell::new(Vec::new());
}

/// Platform transaction visible to code running on this thread.
pub fn current() -> Option<PlatformTransaction> {
    AMBIENT.with(|stack| stack.borrow().last().cloned().flatten())
}

pub(crate) fn push_ambient(transaction: Option<PlatformTransaction>) {
    AMBIENT.with(|stack| stack.borrow_mut().push(transaction));
}

pub(crate) fn pop_ambient() {
    AMBIENT.with(|stack| {
        stack.borrow_mut().pop();
    });
}
