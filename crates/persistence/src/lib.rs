//! Unit-of-work integration for AutoTx
//!
//! Two ORM facilities share one model: inside a transaction every caller gets
//! the same unit of work, which is finished when the transaction completes.
//!
//! - [`SessionFacility`]: sessions wrapped in explicit or implicit units of work
//! - [`DbContextFacility`]: change-tracking db contexts
//! - [`FileConfigurationPersister`]: cached session configurations
//! - [`memory`]: an in-memory store implementing both abstractions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod context_facility;
pub mod installer;
pub mod lifestyle;
pub mod memory;
pub mod persister;
pub mod session;
pub mod session_facility;
pub mod session_manager;
pub mod store;
pub mod unit_of_work;

use autotx_container::Container;
use autotx_core::Result;

pub use context::{
    DbContext, DbContextFactory, DbContextManager, DbContextOptions, DbContextStore,
    TransactionCommitAction,
};
pub use context_facility::{
    DbContextFacility, CONTEXT_MANAGER_SUFFIX, CONTEXT_PER_TX_SUFFIX, CONTEXT_TRANSIENT_SUFFIX,
};
pub use installer::{DbContextInstaller, SessionInstaller};
pub use lifestyle::DefaultLifeStyleOption;
pub use persister::{ConfigurationPersister, FileConfigurationPersister};
pub use session::{FlushMode, Session, SessionConfiguration, SessionFactory, SessionTransaction};
pub use session_facility::{
    SessionFacility, CONFIGURATION_SUFFIX, SESSION_MANAGER_SUFFIX, SESSION_PER_TX_SUFFIX,
    SESSION_TRANSIENT_SUFFIX,
};
pub use session_manager::{SessionManager, SessionStore};
pub use store::TransactionStore;
pub use unit_of_work::{ExplicitUnitOfWork, ImplicitUnitOfWork, UnitOfWork};

/// Container conveniences for the persistence facilities.
pub trait PersistenceContainerExt {
    /// Add the session facility.
    fn add_sessions(&self, facility: SessionFacility) -> Result<()>;

    /// Add the db-context facility.
    fn add_db_contexts(&self, facility: DbContextFacility) -> Result<()>;
}

impl PersistenceContainerExt for Container {
    fn add_sessions(&self, facility: SessionFacility) -> Result<()> {
        facility.init(self)
    }

    fn add_db_contexts(&self, facility: DbContextFacility) -> Result<()> {
        facility.init(self)
    }
}
