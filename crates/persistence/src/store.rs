//! Transaction-keyed storage for units of work.

use std::fmt;

use autotx_core::{LocalIdentifier, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// One value per transaction identity.
///
/// Completion handlers may run on another thread than the one that stored
/// the value; keying by identity lets them find it regardless.
pub struct TransactionStore<T> {
    items: DashMap<LocalIdentifier, T>,
}

impl<T: Clone> TransactionStore<T> {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    /// Value stored for `id`.
    pub fn get(&self, id: LocalIdentifier) -> Option<T> {
        self.items.get(&id).map(|entry| entry.value().clone())
    }

    /// Value stored for `id`, creating it with `create` when absent.
    /// The flag is `true` when this call created it.
    pub fn get_or_try_insert_with<F>(&self, id: LocalIdentifier, create: F) -> Result<(T, bool)>
    where
        F: FnOnce() -> Result<T>,
    {
        match self.items.entry(id) {
            Entry::Occupied(entry) => Ok((entry.get().clone(), false)),
            Entry::Vacant(entry) => {
                let value = create()?;
                entry.insert(value.clone());
                Ok((value, true))
            }
        }
    }

    /// Remove and return the value for `id`.
    pub fn take(&self, id: LocalIdentifier) -> Option<T> {
        self.items.remove(&id).map(|(_, value)| value)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> Default for TransactionStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TransactionStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionStore")
            .field("items", &self.items.len())
            .finish()
    }
}
