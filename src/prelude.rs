//! Convenient imports for AutoTx.
//!
//! ```ignore
//! use autotx::prelude::*;
//!
//! let container = Container::new();
//! container.add_auto_tx()?;
//! ```

// Container
pub use autotx_container::{invoke, Component, Container, Interceptor, Invocation, Reuse};

// Error handling
pub use autotx_core::{Error, Result};

// Method tables and transaction options
pub use autotx_core::{
    IsolationLevel, MethodDescriptor, Reflect, TransactionAttribute, TransactionMode, TransactionState,
};

// Transactions
pub use autotx_concurrency::{Transaction, TransactionManager, TransactionStatus};

// Facility
pub use autotx_facility::{
    AmbientTransactionOption, AutoTxContainerExt, AutoTxFacility, AutoTxOptions, AutoTxReuse,
    ParentServiceRequestInfo, ServiceRequestInfo,
};

// Persistence
pub use autotx_persistence::{
    DbContext, DbContextFacility, DbContextManager, PersistenceContainerExt, Session, SessionFacility,
    SessionManager,
};

pub use std::sync::Arc;
