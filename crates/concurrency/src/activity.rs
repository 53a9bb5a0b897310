//! Activities and activity managers
//!
//! An [`Activity`] is the stack of transactions (and suppression markers)
//! belonging to one logical flow. An [`ActivityManager`] decides what "one
//! logical flow" means:
//!
//! | Manager | Flow |
//! |---------|------|
//! | [`ThreadLocalActivityManager`] | the current OS thread |
//! | [`FlowLocalActivityManager`] | the current tokio task scope, falling back to the thread |
//!
//! Neither manager leaks an activity into independently scheduled work; a
//! forked unit of work gets its activity explicitly through a fork scope.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use autotx_core::LocalIdentifier;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::transaction::Transaction;

#[derive(Clone)]
enum Frame {
    Transaction(Arc<Transaction>),
    Suppressed,
}

/// Stack of transactions for one logical flow; the top is the current one.
pub struct Activity {
    id: Uuid,
    frames: Mutex<SmallVec<[Frame; 4]>>,
}

impl Activity {
    /// Empty activity.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            frames: Mutex::new(SmallVec::new()),
        }
    }

    /// Identity, for logging.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Push a transaction; it becomes current.
    pub fn push(&self, transaction: Arc<Transaction>) {
        self.frames.lock().push(Frame::Transaction(transaction));
    }

    /// Remove the topmost frame holding transaction `id`.
    pub fn pop(&self, id: LocalIdentifier) -> Option<Arc<Transaction>> {
        let mut frames = self.frames.lock();
        let position = frames.iter().rposition(|frame| match frame {
            Frame::Transaction(tx) => tx.local_identifier() == id,
            Frame::Suppressed => false,
        })?;
        if position + 1 != frames.len() {
            tracing::warn!(activity = %self.id, tx = %id, "transaction popped out of order");
        }
        match frames.remove(position) {
            Frame::Transaction(tx) => Some(tx),
            Frame::Suppressed => None,
        }
    }

    /// Hide every transaction below this point.
    pub fn push_suppression(&self) {
        self.frames.lock().push(Frame::Suppressed);
    }

    /// Remove the topmost suppression marker.
    pub fn pop_suppression(&self) {
        let mut frames = self.frames.lock();
        if let Some(position) = frames.iter().rposition(|f| matches!(f, Frame::Suppressed)) {
            frames.remove(position);
        }
    }

    /// Innermost transaction, unless suppressed.
    pub fn current_transaction(&self) -> Option<Arc<Transaction>> {
        match self.frames.lock().last() {
            Some(Frame::Transaction(tx)) => Some(Arc::clone(tx)),
            _ => None,
        }
    }

    /// Outermost visible transaction, followed up to its root when it is a
    /// dependent clone.
    pub fn top_transaction(&self) -> Option<Arc<Transaction>> {
        let frames = self.frames.lock();
        let visible_from = frames
            .iter()
            .rposition(|f| matches!(f, Frame::Suppressed))
            .map_or(0, |p| p + 1);
        let mut top = frames[visible_from..].iter().find_map(|frame| match frame {
            Frame::Transaction(tx) => Some(Arc::clone(tx)),
            Frame::Suppressed => None,
        })?;
        drop(frames);
        while let Some(parent) = top.parent().cloned() {
            top = parent;
        }
        Some(top)
    }

    /// Number of transactions on the stack, suppressed ones included.
    pub fn count(&self) -> usize {
        self.frames
            .lock()
            .iter()
            .filter(|f| matches!(f, Frame::Transaction(_)))
            .count()
    }

    /// Whether the innermost frame is a suppression marker.
    pub fn is_suppressed(&self) -> bool {
        matches!(self.frames.lock().last(), Some(Frame::Suppressed))
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity")
            .field("id", &self.id)
            .field("count", &self.count())
            .finish()
    }
}

/// Owner of the per-flow activity slot.
pub trait ActivityManager: Send + Sync {
    /// Activity installed for the current flow, if any.
    fn installed(&self) -> Option<Arc<Activity>>;

    /// Replace the current flow's activity, returning the previous one.
    fn install(&self, activity: Option<Arc<Activity>>) -> Option<Arc<Activity>>;

    /// Activity of the current flow, created on first access.
    fn current_activity(&self) -> Arc<Activity> {
        if let Some(activity) = self.installed() {
            return activity;
        }
        let activity = Arc::new(Activity::new());
        self.install(Some(Arc::clone(&activity)));
        activity
    }

    /// Start a fresh activity for the current flow.
    fn create_new_activity(&self) -> Arc<Activity> {
        let activity = Arc::new(Activity::new());
        self.install(Some(Arc::clone(&activity)));
        activity
    }
}

// ============================================================================
// Thread-local
// ============================================================================

static NEXT_MANAGER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ACTIVITIES: RefCell<FxHashMap<u64, Arc<Activity>>> = RefCell::new(FxHashMap::default());
}

/// Activity per OS thread, separate for every manager instance.
#[derive(Debug)]
pub struct ThreadLocalActivityManager {
    slot: u64,
}

impl ThreadLocalActivityManager {
    /// New manager with its own slot on every thread.
    pub fn new() -> Self {
        Self {
            slot: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

impl Default for ThreadLocalActivityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityManager for ThreadLocalActivityManager {
    fn installed(&self) -> Option<Arc<Activity>> {
        THREAD_ACTIVITIES.with(|slots| slots.borrow().get(&self.slot).cloned())
    }

    fn install(&self, activity: Option<Arc<Activity>>) -> Option<Arc<Activity>> {
        THREAD_ACTIVITIES.with(|slots| {
            let mut slots = slots.borrow_mut();
            match activity {
                Some(activity) => slots.insert(self.slot, activity),
                None => slots.remove(&self.slot),
            }
        })
    }
}

impl Drop for ThreadLocalActivityManager {
    fn drop(&mut self) {
        let _ = THREAD_ACTIVITIES.try_with(|slots| slots.borrow_mut().remove(&self.slot));
    }
}

// ============================================================================
// Flow-local
// ============================================================================

tokio::task_local! {
    static FLOW_ACTIVITY: RefCell<Option<Arc<Activity>>>;
}

/// Activity per asynchronous flow.
///
/// Inside [`FlowLocalActivityManager::scope`] the activity follows the future
/// across awaits and worker threads; tasks spawned from it start without one.
/// Outside any flow scope the manager behaves like a thread-local one.
#[derive(Debug, Default)]
pub struct FlowLocalActivityManager {
    fallback: ThreadLocalActivityManager,
}

impl FlowLocalActivityManager {
    /// New manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` as a new flow with an empty activity slot.
    pub async fn scope<F: Future>(future: F) -> F::Output {
        FLOW_ACTIVITY.scope(RefCell::new(None), future).await
    }

    /// Run `f` as a new synchronous flow with an empty activity slot.
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        FLOW_ACTIVITY.sync_scope(RefCell::new(None), f)
    }

    /// Whether the caller runs inside a flow scope.
    pub fn in_flow() -> bool {
        FLOW_ACTIVITY.try_with(|_| ()).is_ok()
    }
}

impl ActivityManager for FlowLocalActivityManager {
    fn installed(&self) -> Option<Arc<Activity>> {
        FLOW_ACTIVITY
            .try_with(|slot| slot.borrow().clone())
            .unwrap_or_else(|_| self.fallback.installed())
    }

    fn install(&self, activity: Option<Arc<Activity>>) -> Option<Arc<Activity>> {
        let in_flow = activity.clone();
        match FLOW_ACTIVITY.try_with(move |slot| slot.replace(in_flow)) {
            Ok(previous) => previous,
            Err(_) => self.fallback.install(activity),
        }
    }
}
