//! In-memory store backing both ORM abstractions.
//!
//! Writes outside a session transaction join the ambient platform transaction
//! when there is one: they are applied on commit and dropped on rollback. A
//! write inside an ambient transaction that already rolled back fails.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use autotx_concurrency::platform::{self, Enlistment};
use autotx_core::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use uuid::Uuid;

use crate::context::{DbContext, DbContextFactory};
use crate::session::{FlushMode, Session, SessionFactory, SessionTransaction};

/// Staged changes; `None` marks a removal.
type Changes = BTreeMap<String, Option<Value>>;

/// Key/value rows.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    rows: RwLock<BTreeMap<String, Value>>,
}

impl MemoryDatabase {
    /// Empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed value of `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.rows.read().get(key).cloned()
    }

    /// Number of committed rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether no rows are committed.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn apply(&self, changes: Changes) {
        let mut rows = self.rows.write();
        for (key, value) in changes {
            match value {
                Some(value) => rows.insert(key, value),
                None => rows.remove(&key),
            };
        }
    }

    /// Apply `changes` when the ambient transaction commits, or immediately
    /// when there is none.
    ///
    /// An ambient transaction that already finished refuses the write with
    /// [`Error::TransactionAborted`].
    fn write(self: &Arc<Self>, changes: Changes) -> Result<()> {
        match platform::current() {
            Some(transaction) => transaction.enlist(Arc::new(PendingWrite {
                db: Arc::clone(self),
                changes: Mutex::new(Some(changes)),
            })),
            None => {
                self.apply(changes);
                Ok(())
            }
        }
    }
}

struct PendingWrite {
    db: Arc<MemoryDatabase>,
    changes: Mutex<Option<Changes>>,
}

impl Enlistment for PendingWrite {
    fn commit(&self) {
        if let Some(changes) = self.changes.lock().take() {
            self.db.apply(changes);
        }
    }

    fn rollback(&self) {
        self.changes.lock().take();
    }
}

fn lookup(db: &MemoryDatabase, pending: &Changes, key: &str) -> Option<Value> {
    match pending.get(key) {
        Some(staged) => staged.clone(),
        None => db.get(key),
    }
}

// ============================================================================
// Sessions
// ============================================================================

struct SessionState {
    id: Uuid,
    db: Arc<MemoryDatabase>,
    pending: Mutex<Changes>,
    in_transaction: AtomicBool,
    flush_mode: Mutex<FlushMode>,
    open: AtomicBool,
}

impl SessionState {
    fn ensure_open(&self) -> Result<()> {
        if self.open.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Disposed(format!("session {}", self.id)))
        }
    }

    fn stage(&self, key: &str, value: Option<Value>) -> Result<()> {
        self.ensure_open()?;
        self.pending.lock().insert(key.to_owned(), value);
        if *self.flush_mode.lock() == FlushMode::Always {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        // Inside a session transaction changes wait for its commit.
        if self.in_transaction.load(Ordering::SeqCst) {
            return Ok(());
        }
        let changes = std::mem::take(&mut *self.pending.lock());
        if changes.is_empty() {
            return Ok(());
        }
        self.db.write(changes)
    }
}

/// Session over a [`MemoryDatabase`].
pub struct MemorySession {
    state: Arc<SessionState>,
}

impl Session for MemorySession {
    fn id(&self) -> Uuid {
        self.state.id
    }

    fn begin_transaction(&self) -> Result<Box<dyn SessionTransaction>> {
        self.state.ensure_open()?;
        if self.state.in_transaction.swap(true, Ordering::SeqCst) {
            return Err(Error::Internal(format!(
                "session {} already has an active transaction",
                self.state.id
            )));
        }
        Ok(Box::new(MemorySessionTransaction {
            state: Arc::clone(&self.state),
            active: true,
        }))
    }

    fn save(&self, key: &str, value: Value) -> Result<()> {
        self.state.stage(key, Some(value))
    }

    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.state.ensure_open()?;
        Ok(lookup(&self.state.db, &self.state.pending.lock(), key))
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.state.stage(key, None)
    }

    fn flush(&self) -> Result<()> {
        self.state.flush()
    }

    fn flush_mode(&self) -> FlushMode {
        *self.state.flush_mode.lock()
    }

    fn set_flush_mode(&self, mode: FlushMode) {
        *self.state.flush_mode.lock() = mode;
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.state.open.swap(false, Ordering::SeqCst) {
            self.state.pending.lock().clear();
            tracing::debug!(session = %self.state.id, "session closed");
        }
    }
}

impl fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySession")
            .field("id", &self.state.id)
            .field("open", &self.is_open())
            .finish()
    }
}

struct MemorySessionTransaction {
    state: Arc<SessionState>,
    active: bool,
}

impl MemorySessionTransaction {
    fn end(&mut self) -> Result<()> {
        if !self.active {
            return Err(Error::Internal("session transaction is no longer active".into()));
        }
        self.active = false;
        self.state.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl SessionTransaction for MemorySessionTransaction {
    fn is_active(&self) -> bool {
        self.active
    }

    fn commit(&mut self) -> Result<()> {
        self.end()?;
        let changes = std::mem::take(&mut *self.state.pending.lock());
        self.state.db.apply(changes);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.end()?;
        self.state.pending.lock().clear();
        Ok(())
    }
}

/// Opens [`MemorySession`]s.
#[derive(Debug)]
pub struct MemorySessionFactory {
    db: Arc<MemoryDatabase>,
    flush_mode: FlushMode,
    opened: AtomicUsize,
}

impl MemorySessionFactory {
    /// Factory over `db`.
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            db,
            flush_mode: FlushMode::default(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Flush mode of new sessions.
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// The backing database.
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl SessionFactory for MemorySessionFactory {
    fn open_session(&self) -> Result<Arc<dyn Session>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let state = SessionState {
            id: Uuid::new_v4(),
            db: Arc::clone(&self.db),
            pending: Mutex::new(Changes::new()),
            in_transaction: AtomicBool::new(false),
            flush_mode: Mutex::new(self.flush_mode),
            open: AtomicBool::new(true),
        };
        tracing::debug!(session = %state.id, "session opened");
        Ok(Arc::new(MemorySession {
            state: Arc::new(state),
        }))
    }
}

// ============================================================================
// Db contexts
// ============================================================================

/// Db context over a [`MemoryDatabase`].
pub struct MemoryDbContext {
    id: Uuid,
    db: Arc<MemoryDatabase>,
    tracked: Mutex<Changes>,
    disposed: AtomicBool,
}

impl MemoryDbContext {
    fn ensure_alive(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed(format!("db context {}", self.id)));
        }
        Ok(())
    }
}

impl DbContext for MemoryDbContext {
    fn id(&self) -> Uuid {
        self.id
    }

    fn add(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_alive()?;
        self.tracked.lock().insert(key.to_owned(), Some(value));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.ensure_alive()?;
        self.tracked.lock().insert(key.to_owned(), None);
        Ok(())
    }

    fn find(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_alive()?;
        Ok(lookup(&self.db, &self.tracked.lock(), key))
    }

    fn save_changes(&self) -> Result<usize> {
        self.ensure_alive()?;
        let changes = std::mem::take(&mut *self.tracked.lock());
        let written = changes.len();
        if written > 0 {
            self.db.write(changes)?;
        }
        Ok(written)
    }

    fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            self.tracked.lock().clear();
            tracing::debug!(context = %self.id, "db context disposed");
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for MemoryDbContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDbContext")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Creates [`MemoryDbContext`]s.
#[derive(Debug)]
pub struct MemoryDbContextFactory {
    db: Arc<MemoryDatabase>,
    created: AtomicUsize,
}

impl MemoryDbContextFactory {
    /// Factory over `db`.
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self {
            db,
            created: AtomicUsize::new(0),
        }
    }

    /// Contexts created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl DbContextFactory for MemoryDbContextFactory {
    fn create(&self) -> Result<Arc<dyn DbContext>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemoryDbContext {
            id: Uuid::new_v4(),
            db: Arc::clone(&self.db),
            tracked: Mutex::new(Changes::new()),
            disposed: AtomicBool::new(false),
        }))
    }
}
