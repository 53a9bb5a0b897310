//! # AutoTx
//!
//! Declarative transactions for container-resolved services.
//!
//! Methods marked transactional in a component's method table run inside an
//! ambient transaction created, joined, suppressed or forked by the
//! [`TransactionManager`]. Components can live for exactly one transaction,
//! and ORM units of work are shared along the call chain of a transaction.
//!
//! ## Quick Start
//!
//! ```ignore
//! use autotx::prelude::*;
//!
//! let container = Container::new();
//! container.add_auto_tx()?;
//!
//! container.register(
//!     Component::<dyn OrderService>::new(|_| Ok(Arc::new(Orders::default())))
//!         .implemented_by::<Orders>()
//!         .proxied_by::<OrderServiceProxy, _>(|target, interceptor| {
//!             Arc::new(OrderServiceProxy { target, interceptor })
//!         }),
//! )?;
//!
//! // `place` is marked transactional: it runs in a new transaction that
//! // commits when it returns Ok and rolls back otherwise.
//! container.resolve::<dyn OrderService>()?.place(order)?;
//! ```
//!
//! ## Crates
//!
//! - [`autotx_core`]: errors, transaction options and method tables
//! - [`autotx_concurrency`]: transactions, activities, the transaction manager
//! - [`autotx_container`]: the dependency injection container
//! - [`autotx_facility`]: interception, per-transaction lifetimes, the facility
//! - [`autotx_persistence`]: session and db-context units of work

#![warn(missing_docs)]

pub mod prelude;

pub use autotx_concurrency as concurrency;
pub use autotx_container as container;
pub use autotx_core as core;
pub use autotx_facility as facility;
pub use autotx_persistence as persistence;

pub use autotx_concurrency::{Transaction, TransactionManager};
pub use autotx_container::{Component, Container};
pub use autotx_core::{Error, Result, TransactionAttribute, TransactionMode};
pub use autotx_facility::{AutoTxContainerExt, AutoTxFacility, AutoTxOptions, AutoTxReuse};
