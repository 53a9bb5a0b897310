//! Transaction vocabulary
//!
//! This module defines the values a transactional method declares and the
//! values a running transaction reports:
//! - [`TransactionMode`]: join, require a new one, or suppress
//! - [`TransactionAttribute`]: the per-method marker
//! - [`TransactionOptions`]: the marker with defaults filled in
//! - [`TransactionState`]: the monotonic state machine
//! - [`LocalIdentifier`]: identity of one transaction

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a transactional method relates to the ambient transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Join the ambient transaction, or start one if there is none.
    #[default]
    Requires,
    /// Always start a new root transaction.
    RequiresNew,
    /// Run with no ambient transaction visible.
    Suppress,
}

/// Isolation level requested from the platform transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Full serializability.
    #[default]
    Serializable,
    /// Repeatable reads, phantoms allowed.
    RepeatableRead,
    /// Only committed data is read.
    ReadCommitted,
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Snapshot isolation.
    Snapshot,
    /// Pending changes of more isolated transactions cannot be overwritten.
    Chaos,
    /// Left to the resource manager.
    Unspecified,
}

/// Method-level transaction marker.
///
/// Unset timeout and isolation fall back to the facility defaults when the
/// attribute is resolved into [`TransactionOptions`].
///
/// # Examples
///
/// ```
/// use autotx_core::{TransactionAttribute, TransactionMode};
///
/// let attr = TransactionAttribute::requires().forked();
/// assert_eq!(attr.mode, TransactionMode::Requires);
/// assert!(attr.fork);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransactionAttribute {
    /// Relation to the ambient transaction
    pub mode: TransactionMode,
    /// Run in a dependent transaction on a separate unit of work
    pub fork: bool,
    /// Isolation override
    pub isolation_level: Option<IsolationLevel>,
    /// Timeout override
    pub timeout: Option<Duration>,
}

impl TransactionAttribute {
    /// `Requires` with no fork.
    pub const fn requires() -> Self {
        Self::with_mode(TransactionMode::Requires)
    }

    /// `RequiresNew` with no fork.
    pub const fn requires_new() -> Self {
        Self::with_mode(TransactionMode::RequiresNew)
    }

    /// `Suppress`.
    pub const fn suppress() -> Self {
        Self::with_mode(TransactionMode::Suppress)
    }

    /// Attribute with the given mode.
    pub const fn with_mode(mode: TransactionMode) -> Self {
        Self {
            mode,
            fork: false,
            isolation_level: None,
            timeout: None,
        }
    }

    /// Mark the method as forking.
    pub const fn forked(mut self) -> Self {
        self.fork = true;
        self
    }

    /// Override the timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the isolation level.
    pub const fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = Some(level);
        self
    }

    /// Fill unset values from `defaults`.
    pub fn resolve(&self, defaults: &TransactionOptions) -> TransactionOptions {
        TransactionOptions {
            mode: self.mode,
            fork: self.fork,
            isolation_level: self.isolation_level.unwrap_or(defaults.isolation_level),
            timeout: self.timeout.unwrap_or(defaults.timeout),
        }
    }
}

/// Fully resolved options used to create a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Relation to the ambient transaction
    pub mode: TransactionMode,
    /// Run in a dependent transaction on a separate unit of work
    pub fork: bool,
    /// Isolation level
    pub isolation_level: IsolationLevel,
    /// Time allowed between creation and commit
    pub timeout: Duration,
}

impl TransactionOptions {
    /// Default timeout: one minute.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            mode: TransactionMode::Requires,
            fork: false,
            isolation_level: IsolationLevel::Serializable,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }
}

/// Transaction lifecycle.
///
/// ```text
/// Active -> { CommittedOrCompleted | Aborted | InDoubt } -> Disposed
/// ```
///
/// `Aborted` is also reachable from the other outcomes through an explicit
/// rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Open and accepting work
    Active,
    /// Committed (root) or completed (dependent)
    CommittedOrCompleted,
    /// Rolled back
    Aborted,
    /// Outcome unknown
    InDoubt,
    /// Terminal
    Disposed,
}

impl TransactionState {
    /// Whether the state machine permits moving from `self` to `next`.
    pub fn can_transition_to(self, next: TransactionState) -> bool {
        use TransactionState::*;
        match (self, next) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (_, Aborted) => true,
            (Active, CommittedOrCompleted) | (Active, InDoubt) => true,
            _ => false,
        }
    }

    /// Whether the transaction still accepts completion.
    pub fn is_active(self) -> bool {
        self == TransactionState::Active
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of a transaction.
///
/// Root transactions get a fresh UUID with sequence 1; dependent clones share
/// the root UUID and take the next sequence number, so every clone is
/// distinguishable while staying visibly related to its root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocalIdentifier {
    root: Uuid,
    sequence: u32,
}

impl LocalIdentifier {
    /// Identifier for a new root transaction.
    pub fn new_root() -> Self {
        Self {
            root: Uuid::new_v4(),
            sequence: 1,
        }
    }

    /// Identifier for a clone of this root.
    pub fn clone_with_sequence(&self, sequence: u32) -> Self {
        Self {
            root: self.root,
            sequence,
        }
    }

    /// UUID shared by a root and its clones.
    pub fn root(&self) -> Uuid {
        self.root
    }

    /// Position within the root's family; the root is 1.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Whether this identifies a root transaction.
    pub fn is_root(&self) -> bool {
        self.sequence == 1
    }
}

impl fmt::Display for LocalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.root, self.sequence)
    }
}
