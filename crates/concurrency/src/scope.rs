//! Ambient transaction scopes
//!
//! [`TxScope`] binds a platform transaction (or "no transaction") as the
//! ambient one on the current thread and restores the previous binding on
//! drop. Scopes nest and must be dropped in reverse order, which the borrow
//! discipline of guards gives for free.

use std::marker::PhantomData;

use crate::platform::{self, PlatformTransaction};

/// Guard keeping an ambient binding alive.
///
/// Not `Send`: the binding belongs to the thread that created it.
#[must_use = "the ambient binding ends when the scope is dropped"]
pub struct TxScope {
    _thread_bound: PhantomData<*const ()>,
}

impl TxScope {
    /// Make `transaction` ambient.
    pub fn new(transaction: &PlatformTransaction) -> Self {
        platform::push_ambient(Some(transaction.clone()));
        Self {
            _thread_bound: PhantomData,
        }
    }

    /// Hide any ambient transaction.
    pub fn suppress() -> Self {
        platform::push_ambient(None);
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for TxScope {
    fn drop(&mut self) {
        platform::pop_ambient();
    }
}
