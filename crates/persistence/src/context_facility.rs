//! Db-context facility
//!
//! Per [`DbContextInstaller`] (with `key` its key):
//!
//! | Service | Key | Reuse |
//! |---------|-----|-------|
//! | `dyn DbContextFactory` | `{key}` | singleton |
//! | `dyn DbContext` | `{key}-context` | per transaction |
//! | `dyn DbContext` | `{key}-context-transient` | transient |
//! | [`DbContextManager`] | `{key}-manager` | singleton |
//!
//! Per-transaction contexts are not shared with forks, each dependent
//! transaction gets its own.

use std::sync::Arc;

use autotx_concurrency::TransactionManager;
use autotx_container::{Component, Container, Reuse};
use autotx_core::Result;
use autotx_facility::{AutoTxContainerExt, AutoTxFacility};

use crate::context::{DbContext, DbContextFactory, DbContextManager, DbContextStore, TransactionCommitAction};
use crate::installer::{self, DbContextInstaller};
use crate::lifestyle::{lifestyles, DefaultLifeStyleOption, TransactionScoping};

/// Key suffix of per-transaction contexts.
pub const CONTEXT_PER_TX_SUFFIX: &str = "-context";
/// Key suffix of transient contexts.
pub const CONTEXT_TRANSIENT_SUFFIX: &str = "-context-transient";
/// Key suffix of context managers.
pub const CONTEXT_MANAGER_SUFFIX: &str = "-manager";

type Installed = (Arc<dyn DbContextInstaller>, Arc<dyn DbContextFactory>);

/// Shares db contexts across transactional call chains.
#[derive(Debug, Clone, Default)]
pub struct DbContextFacility {
    default_life_style: DefaultLifeStyleOption,
    commit_action: TransactionCommitAction,
}

impl DbContextFacility {
    /// Facility with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of the unnamed context registration.
    pub fn default_life_style(mut self, option: DefaultLifeStyleOption) -> Self {
        self.default_life_style = option;
        self
    }

    /// What managers do with a transaction's context once it completes.
    pub fn commit_action(mut self, action: TransactionCommitAction) -> Self {
        self.commit_action = action;
        self
    }

    /// Register db-context components for every installer in `container`.
    pub fn init(self, container: &Container) -> Result<()> {
        tracing::debug!("initializing DbContextFacility");

        let installers = container.resolve_many::<dyn DbContextInstaller>()?;
        installer::validate(
            "DbContextInstaller",
            installers.iter().map(|i| (i.is_default(), i.key())),
        )?;
        container.assert_has_facility::<AutoTxFacility>("DbContextFacility")?;

        let mut installed = installers
            .into_iter()
            .map(|installer| -> Result<Installed> {
                let factory = installer.build_factory(&installer.config())?;
                Ok((installer, factory))
            })
            .collect::<Result<Vec<_>>>()?;
        installed.sort_by_key(|(installer, _)| !installer.is_default());

        for (installer, factory) in &installed {
            self.register(container, installer.as_ref(), factory)?;
        }
        for (installer, factory) in &installed {
            installer.registered(factory);
        }

        container.use_instance(Arc::new(self))?;
        tracing::debug!("initialized DbContextFacility");
        Ok(())
    }

    fn register(
        &self,
        container: &Container,
        installer: &dyn DbContextInstaller,
        factory: &Arc<dyn DbContextFactory>,
    ) -> Result<()> {
        let key = installer.key().to_owned();
        container.register(Component::instance(Arc::clone(factory)).named(key.clone()))?;

        let lifestyles = lifestyles(
            self.default_life_style,
            CONTEXT_PER_TX_SUFFIX,
            CONTEXT_TRANSIENT_SUFFIX,
            TransactionScoping::Current,
        );
        for (suffix, reuse) in lifestyles.iter() {
            let factory = Arc::clone(factory);
            container.register(
                Component::<dyn DbContext>::new(move |_| factory.create())
                    .reuse(reuse.clone())
                    .named(format!("{}{}", key, suffix))
                    .disposed_with(|context| context.dispose()),
            )?;
        }

        let manager_factory = Arc::clone(factory);
        let commit_action = self.commit_action;
        container.register(
            Component::<DbContextManager>::new(move |request| {
                let factory = Arc::clone(&manager_factory);
                Ok(Arc::new(DbContextManager::new(
                    move || factory.create(),
                    request.resolve::<TransactionManager>()?,
                    Arc::new(DbContextStore::new()),
                    commit_action,
                )))
            })
            .reuse(Reuse::Singleton)
            .named(format!("{}{}", key, CONTEXT_MANAGER_SUFFIX)),
        )?;

        if installer.is_default() {
            container.use_instance(Arc::clone(factory))?;
            let context = format!("{}{}", key, lifestyles[0].0);
            container.register(Component::<dyn DbContext>::new(move |request| {
                request.resolve_named::<dyn DbContext>(&context)
            }))?;
            let manager = format!("{}{}", key, CONTEXT_MANAGER_SUFFIX);
            container.register(Component::<DbContextManager>::new(move |request| {
                request.resolve_named::<DbContextManager>(&manager)
            }))?;
        }
        tracing::debug!(key = %key, default = installer.is_default(), "registered db context factory");
        Ok(())
    }
}
