//! Session facility
//!
//! For every [`SessionInstaller`] registered in the container, `init`
//! registers (with `key` the installer's session factory key):
//!
//! | Service | Key | Reuse |
//! |---------|-----|-------|
//! | [`SessionConfiguration`] | `{key}-cfg` | singleton |
//! | `dyn SessionFactory` | `{key}` | singleton |
//! | `dyn Session` | `{key}-session` | per top transaction |
//! | `dyn Session` | `{key}-session-transient` | transient |
//! | [`SessionManager`] | `{key}-manager` | singleton |
//!
//! The default installer's configuration, factory, session and manager are
//! also registered unnamed; the unnamed session follows
//! [`DefaultLifeStyleOption`].

use std::sync::Arc;

use autotx_concurrency::TransactionManager;
use autotx_container::{Component, Container, Reuse};
use autotx_core::Result;
use autotx_facility::{AmbientTransactionOption, AutoTxContainerExt, AutoTxFacility, AutoTxOptions};

use crate::installer::{self, SessionInstaller};
use crate::lifestyle::{lifestyles, DefaultLifeStyleOption, TransactionScoping};
use crate::persister::{ConfigurationPersister, FileConfigurationPersister};
use crate::session::{FlushMode, Session, SessionConfiguration, SessionFactory};
use crate::session_manager::{SessionManager, SessionStore};

/// Key suffix of per-transaction sessions.
pub const SESSION_PER_TX_SUFFIX: &str = "-session";
/// Key suffix of transient sessions.
pub const SESSION_TRANSIENT_SUFFIX: &str = "-session-transient";
/// Key suffix of session managers.
pub const SESSION_MANAGER_SUFFIX: &str = "-manager";
/// Key suffix of configurations.
pub const CONFIGURATION_SUFFIX: &str = "-cfg";

struct Installed {
    installer: Arc<dyn SessionInstaller>,
    configuration: Arc<SessionConfiguration>,
    factory: Arc<dyn SessionFactory>,
}

/// Shares sessions across transactional call chains.
#[derive(Debug, Clone, Default)]
pub struct SessionFacility {
    default_life_style: DefaultLifeStyleOption,
    flush_mode: FlushMode,
    ambient_transaction: Option<AmbientTransactionOption>,
}

impl SessionFacility {
    /// Facility with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lifetime of the unnamed session registration.
    pub fn default_life_style(mut self, option: DefaultLifeStyleOption) -> Self {
        self.default_life_style = option;
        self
    }

    /// Flush mode of every opened session.
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Override the container's [`AutoTxOptions::ambient_transaction`].
    pub fn ambient_transaction(mut self, option: AmbientTransactionOption) -> Self {
        self.ambient_transaction = Some(option);
        self
    }

    /// Register session components for every installer in `container`.
    pub fn init(self, container: &Container) -> Result<()> {
        tracing::debug!("initializing SessionFacility");

        if !container.is_registered::<dyn ConfigurationPersister>() {
            let persister: Arc<dyn ConfigurationPersister> = Arc::new(FileConfigurationPersister::new());
            container.use_instance(persister)?;
        }

        let installers = container.resolve_many::<dyn SessionInstaller>()?;
        installer::validate(
            "SessionInstaller",
            installers
                .iter()
                .map(|i| (i.is_default(), i.session_factory_key())),
        )?;
        container.assert_has_facility::<AutoTxFacility>("SessionFacility")?;

        let ambient = match self.ambient_transaction {
            Some(option) => option,
            None => container.resolve::<AutoTxOptions>()?.ambient_transaction,
        };

        tracing::debug!("registering facility components");
        let mut installed = installers
            .into_iter()
            .map(|installer| -> Result<Installed> {
                let mut configuration = match installer.deserialize() {
                    Some(configuration) => configuration,
                    None => {
                        let configuration = installer.config();
                        installer.serialize(&configuration)?;
                        configuration
                    }
                };
                installer.after_deserialize(&mut configuration)?;
                let factory = installer.build_session_factory(&configuration)?;
                Ok(Installed {
                    installer,
                    configuration: Arc::new(configuration),
                    factory,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        installed.sort_by_key(|x| !x.installer.is_default());

        for x in &installed {
            self.register(container, x, ambient)?;
        }

        tracing::debug!("notifying the session installers that they have been configured");
        for x in &installed {
            x.installer.registered(&x.factory);
        }

        container.use_instance(Arc::new(self))?;
        tracing::debug!("initialized SessionFacility");
        Ok(())
    }

    fn register(&self, container: &Container, x: &Installed, ambient: AmbientTransactionOption) -> Result<()> {
        let key = x.installer.session_factory_key().to_owned();
        let is_default = x.installer.is_default();

        container.register(
            Component::instance(Arc::clone(&x.configuration)).named(format!("{}{}", key, CONFIGURATION_SUFFIX)),
        )?;
        container.register(Component::instance(Arc::clone(&x.factory)).named(key.clone()))?;

        let lifestyles = lifestyles(
            self.default_life_style,
            SESSION_PER_TX_SUFFIX,
            SESSION_TRANSIENT_SUFFIX,
            TransactionScoping::Top,
        );
        for (suffix, reuse) in lifestyles.iter() {
            let factory = Arc::clone(&x.factory);
            let flush_mode = self.flush_mode;
            container.register(
                Component::<dyn Session>::new(move |_| open(&factory, flush_mode))
                    .reuse(reuse.clone())
                    .named(format!("{}{}", key, suffix))
                    .disposed_with(|session| session.close()),
            )?;
        }

        let factory = Arc::clone(&x.factory);
        let flush_mode = self.flush_mode;
        container.register(
            Component::<SessionManager>::new(move |request| {
                let factory = Arc::clone(&factory);
                Ok(Arc::new(SessionManager::new(
                    move || open(&factory, flush_mode),
                    request.resolve::<TransactionManager>()?,
                    Arc::new(SessionStore::new()),
                    ambient,
                )))
            })
            .reuse(Reuse::Singleton)
            .named(format!("{}{}", key, SESSION_MANAGER_SUFFIX)),
        )?;

        if is_default {
            container.use_instance(Arc::clone(&x.configuration))?;
            container.use_instance(Arc::clone(&x.factory))?;

            let session = format!("{}{}", key, lifestyles[0].0);
            container.register(Component::<dyn Session>::new(move |request| {
                request.resolve_named::<dyn Session>(&session)
            }))?;
            let manager = format!("{}{}", key, SESSION_MANAGER_SUFFIX);
            container.register(Component::<SessionManager>::new(move |request| {
                request.resolve_named::<SessionManager>(&manager)
            }))?;
        }
        tracing::debug!(key = %key, default = is_default, "registered session factory");
        Ok(())
    }
}

fn open(factory: &Arc<dyn SessionFactory>, flush_mode: FlushMode) -> Result<Arc<dyn Session>> {
    let session = factory.open_session()?;
    session.set_flush_mode(flush_mode);
    Ok(session)
}
