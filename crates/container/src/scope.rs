//! Object storage buckets
//!
//! A [`Scope`] stores one instance per factory id and disposes everything it
//! holds, in reverse creation order, exactly once.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use autotx_core::{Error, Result};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Type-erased component instance. Always wraps an `Arc<S>`.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Cleanup for one stored instance.
pub type Disposer = Box<dyn FnOnce() + Send>;

struct Entry {
    instance: Instance,
    disposer: Option<Disposer>,
}

#[derive(Default)]
struct Items {
    entries: FxHashMap<u64, Entry>,
    order: Vec<u64>,
}

/// Named bucket of component instances.
pub struct Scope {
    name: String,
    items: Mutex<Items>,
    disposed: AtomicBool,
}

impl Scope {
    /// Empty scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(Items::default()),
            disposed: AtomicBool::new(false),
        }
    }

    /// Scope name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored instance for `id`.
    pub fn get(&self, id: u64) -> Option<Instance> {
        self.items
            .lock()
            .entries
            .get(&id)
            .map(|entry| Arc::clone(&entry.instance))
    }

    /// Stored instance for `id`, created with `create` when missing.
    ///
    /// `create` runs without the scope lock held so it may resolve other
    /// components from the same scope. If two callers race, the first insert
    /// wins and the loser's instance is disposed.
    pub fn get_or_add<F>(&self, id: u64, create: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<(Instance, Option<Disposer>)>,
    {
        if self.is_disposed() {
            return Err(Error::Disposed(format!("scope '{}'", self.name)));
        }
        if let Some(instance) = self.get(id) {
            return Ok(instance);
        }

        let (instance, disposer) = create()?;

        let mut items = self.items.lock();
        if let Some(existing) = items.entries.get(&id) {
            let existing = Arc::clone(&existing.instance);
            drop(items);
            if let Some(dispose) = disposer {
                dispose();
            }
            return Ok(existing);
        }
        if self.is_disposed() {
            drop(items);
            if let Some(dispose) = disposer {
                dispose();
            }
            return Err(Error::Disposed(format!("scope '{}'", self.name)));
        }
        items.entries.insert(
            id,
            Entry {
                instance: Arc::clone(&instance),
                disposer,
            },
        );
        items.order.push(id);
        Ok(instance)
    }

    /// Number of stored instances.
    pub fn len(&self) -> usize {
        self.items.lock().entries.len()
    }

    /// Whether the scope stores nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`Scope::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Dispose every stored instance, newest first.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut items = std::mem::take(&mut *self.items.lock());
        let count = items.order.len();
        for id in items.order.iter().rev() {
            if let Some(entry) = items.entries.remove(id) {
                if let Some(dispose) = entry.disposer {
                    dispose();
                }
            }
        }
        tracing::debug!(scope = %self.name, count, "scope disposed");
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
