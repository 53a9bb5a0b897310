//! Core types for declarative transaction management
//!
//! This crate defines the vocabulary shared by every other AutoTx crate:
//! - [`Error`]: the error taxonomy and the crate-wide [`Result`] alias
//! - [`TransactionMode`], [`TransactionAttribute`], [`TransactionOptions`]: what a
//!   transactional method asks for
//! - [`TransactionState`]: the transaction state machine
//! - [`LocalIdentifier`]: stable identity of a transaction
//! - [`TypeInfo`], [`MethodDescriptor`], [`Reflect`]: the explicit reflection table
//!   consulted when deciding which methods get intercepted

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod descriptor;
pub mod error;
pub mod types;

pub use descriptor::{MethodDescriptor, Reflect, TypeDescriptor, TypeInfo};
pub use error::{Error, Result};
pub use types::{
    IsolationLevel, LocalIdentifier, TransactionAttribute, TransactionMode, TransactionOptions,
    TransactionState,
};
