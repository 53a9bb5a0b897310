//! Transaction coordination for AutoTx
//!
//! This crate implements the transaction lifecycle engine:
//! - [`platform`]: the platform transaction primitive (commit, dependent
//!   clones, enlistments, ambient binding)
//! - [`Transaction`]: state machine over one platform handle
//! - [`Activity`] / [`ActivityManager`]: per-flow transaction stacks
//! - [`TransactionManager`]: create / join / suppress / fork decisions
//! - [`TxScope`]: ambient binding guard

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod activity;
pub mod manager;
pub mod platform;
pub mod scope;
pub mod transaction;

pub use activity::{Activity, ActivityManager, FlowLocalActivityManager, ThreadLocalActivityManager};
pub use manager::{CreatedTransaction, ForkScope, SuppressionScope, TransactionManager};
pub use platform::{
    DependentCloneOption, Enlistment, PlatformTransaction, TransactionInformation,
    TransactionStatus, Vote,
};
pub use scope::TxScope;
pub use transaction::{DependentTask, Transaction};
