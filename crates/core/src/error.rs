//! Unified error types for AutoTx.
//!
//! Every crate in the workspace returns [`Error`]. User code running inside a
//! transactional method reports failures through [`Error::Method`], which the
//! interception layer passes through untouched.

use std::fmt;

use thiserror::Error;

use crate::types::{LocalIdentifier, TransactionState};

/// All AutoTx errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A per-transaction component was resolved while no transaction was ambient.
    #[error("missing transaction: {0}")]
    MissingTransaction(String),

    /// Invalid facility or installer composition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The platform aborted the transaction while completing it.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Why the platform aborted
        reason: String,
        /// Underlying failure, if any
        #[source]
        source: Option<Box<Error>>,
    },

    /// A resource manager could not confirm the outcome.
    #[error("transaction in doubt: {0}")]
    TransactionInDoubt(String),

    /// One or more forked dependent transactions failed.
    #[error("{} dependent transaction(s) failed", .0.len())]
    DependentTransactionsFailed(Vec<Error>),

    /// A transaction was asked to do something its current state forbids.
    #[error("transaction {id} cannot {operation} while {state}")]
    InvalidState {
        /// Transaction identity
        id: LocalIdentifier,
        /// Attempted operation
        operation: &'static str,
        /// State at the time of the call
        state: TransactionState,
    },

    /// Use of a component after it was disposed.
    #[error("{0} has been disposed")]
    Disposed(String),

    /// The container could not produce a service.
    #[error("resolution failed: {0}")]
    Resolution(String),

    /// Failure raised by user code inside an intercepted method.
    #[error(transparent)]
    Method(Box<dyn std::error::Error + Send + Sync>),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for AutoTx operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a failure from user code.
    pub fn method<E>(error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Method(error.into())
    }

    /// Build an aborted-transaction error without an underlying cause.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Error::TransactionAborted {
            reason: reason.into(),
            source: None,
        }
    }

    /// Check if this is an aborted-transaction error.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::TransactionAborted { .. })
    }

    /// Check if this is a missing-transaction error.
    pub fn is_missing_transaction(&self) -> bool {
        matches!(self, Error::MissingTransaction(_))
    }

    /// Check if this is a configuration error.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Check if this error came from user code.
    pub fn is_method(&self) -> bool {
        matches!(self, Error::Method(_))
    }

    /// Individual failures carried by an aggregate, or an empty slice.
    pub fn dependent_failures(&self) -> &[Error] {
        match self {
            Error::DependentTransactionsFailed(errors) => errors,
            _ => &[],
        }
    }
}

/// Plain message error for user code that has no error type of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodFailure(pub String);

impl fmt::Display for MethodFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for MethodFailure {}

impl Error {
    /// Shorthand for `Error::method(MethodFailure(message))`.
    pub fn failed(message: impl Into<String>) -> Self {
        Error::method(MethodFailure(message.into()))
    }
}
