//! The AutoTx facility
//!
//! `AutoTxFacility::init` wires the transaction engine into a container:
//!
//! | Component | Reuse |
//! |-----------|-------|
//! | [`AutoTxOptions`] | singleton, unless already registered |
//! | [`ProxyTypeStorage`] | singleton |
//! | [`ServiceRequestInfo`] / [`ParentServiceRequestInfo`] | transient, built from the request chain |
//! | [`TransactionMetaInfoStore`] | singleton |
//! | `dyn ActivityManager` | singleton, chosen by [`ActivityManagerKind`] |
//! | [`TransactionManager`] | singleton |
//! | [`PerTransactionScopeContext`] / [`PerTopTransactionScopeContext`] | singleton, disposed with the container |
//! | [`AutoTxFacility`] | marker, registered last |
//!
//! Every registration made before or after `init` goes through the
//! [`TransactionalComponentInspector`].

use std::sync::Arc;

use autotx_concurrency::{
    ActivityManager, FlowLocalActivityManager, ThreadLocalActivityManager, TransactionManager,
};
use autotx_container::{Component, Container, Reuse};
use autotx_core::{Error, Result, TypeInfo};

use crate::inspector::TransactionalComponentInspector;
use crate::lifestyle::{PerTopTransactionScopeContext, PerTransactionScopeContext};
use crate::meta::TransactionMetaInfoStore;
use crate::options::{ActivityManagerKind, AutoTxOptions};
use crate::proxy::{ParentServiceRequestInfo, ProxyTypeStorage, ServiceRequestInfo};
use crate::testing::ResolveScope;

/// Adds attribute-driven transactions to a container.
///
/// Add it once per container, usually before registering services; components
/// registered earlier are inspected when the facility is added. If any of them
/// cannot be intercepted, `init` fails and leaves the container unchanged.
#[derive(Debug, Clone, Default)]
pub struct AutoTxFacility {
    options: AutoTxOptions,
}

impl AutoTxFacility {
    /// Facility with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Facility with `options`. An [`AutoTxOptions`] instance already in the
    /// container takes precedence.
    pub fn with_options(options: AutoTxOptions) -> Self {
        Self { options }
    }

    /// Options this facility was created with.
    pub fn options(&self) -> &AutoTxOptions {
        &self.options
    }

    /// Register the transaction engine in `container` and start inspecting
    /// registrations.
    pub fn init(self, container: &Container) -> Result<()> {
        if container.is_registered::<AutoTxFacility>() {
            return Err(Error::Configuration(
                "the AutoTx facility has already been added to this container".into(),
            ));
        }
        tracing::debug!("initializing AutoTxFacility");

        let meta_store = Arc::new(TransactionMetaInfoStore::new());
        let proxy_storage = Arc::new(ProxyTypeStorage::new());
        let inspector = TransactionalComponentInspector::new(Arc::clone(&meta_store), Arc::clone(&proxy_storage));

        // Components registered earlier are checked before the container is touched.
        tracing::debug!(
            "inspecting previously registered components; this might fail if components are configured the wrong way"
        );
        let existing = container.registrations();
        for registration in &existing {
            inspector.check_model(container, registration)?;
        }

        let options = if container.is_registered::<AutoTxOptions>() {
            container.resolve::<AutoTxOptions>()?
        } else {
            let options = Arc::new(self.options.clone());
            container.use_instance(Arc::clone(&options))?;
            options
        };

        container.use_instance(proxy_storage)?;

        container.register(Component::<ServiceRequestInfo>::new(|request| {
            let dependent = request.parent().ok_or_else(|| {
                Error::Resolution("ServiceRequestInfo can only be injected into another component".into())
            })?;
            let storage = request.resolve::<ProxyTypeStorage>()?;
            Ok(Arc::new(ServiceRequestInfo::from_request(dependent, &storage)))
        }))?;
        container.register(Component::<ParentServiceRequestInfo>::new(|request| {
            let storage = request.resolve::<ProxyTypeStorage>()?;
            Ok(Arc::new(ParentServiceRequestInfo::from_request(request, &storage)))
        }))?;

        container.use_instance(meta_store)?;

        let activity_manager: Arc<dyn ActivityManager> = match options.activity_manager {
            ActivityManagerKind::ThreadLocal => Arc::new(ThreadLocalActivityManager::new()),
            ActivityManagerKind::FlowLocal => Arc::new(FlowLocalActivityManager::new()),
        };
        container.use_instance(activity_manager)?;

        let defaults = options.transaction_defaults();
        container.register(
            Component::<TransactionManager>::new(move |request| {
                let activity_manager = request.resolve::<dyn ActivityManager>()?;
                Ok(Arc::new(TransactionManager::new(activity_manager).with_defaults(defaults)))
            })
            .reuse(Reuse::Singleton),
        )?;

        container.register(
            Component::<PerTransactionScopeContext>::new(|request| {
                Ok(Arc::new(PerTransactionScopeContext::new(request.resolve()?)))
            })
            .reuse(Reuse::Singleton)
            .disposed_with(|context| context.dispose()),
        )?;
        container.register(
            Component::<PerTopTransactionScopeContext>::new(|request| {
                Ok(Arc::new(PerTopTransactionScopeContext::new(request.resolve()?)))
            })
            .reuse(Reuse::Singleton)
            .disposed_with(|context| context.dispose()),
        )?;

        for registration in &existing {
            inspector.process_model(container, registration)?;
        }
        container.on_registered(move |container, registration| {
            inspector.process_model(container, registration)
        });

        container.use_instance(Arc::new(self))?;
        tracing::debug!(
            activity_manager = ?options.activity_manager,
            ambient_transaction = ?options.ambient_transaction,
            "initialized AutoTxFacility"
        );
        Ok(())
    }
}

/// Container conveniences for the AutoTx facility.
pub trait AutoTxContainerExt {
    /// Add the AutoTx facility with default options.
    fn add_auto_tx(&self) -> Result<()>;

    /// Add the AutoTx facility with `options`.
    fn add_auto_tx_with(&self, options: AutoTxOptions) -> Result<()>;

    /// Fail with a configuration error unless facility `F` was added.
    /// `dependent` names whoever needs it.
    fn assert_has_facility<F: Send + Sync + 'static>(&self, dependent: &str) -> Result<()>;

    /// Resolve `S` for the lifetime of the returned guard.
    fn resolve_scope<S: ?Sized + Send + Sync + 'static>(&self) -> Result<ResolveScope<S>>;
}

impl AutoTxContainerExt for Container {
    fn add_auto_tx(&self) -> Result<()> {
        AutoTxFacility::new().init(self)
    }

    fn add_auto_tx_with(&self, options: AutoTxOptions) -> Result<()> {
        AutoTxFacility::with_options(options).init(self)
    }

    fn assert_has_facility<F: Send + Sync + 'static>(&self, dependent: &str) -> Result<()> {
        if self.is_registered::<F>() {
            return Ok(());
        }
        let facility = TypeInfo::of::<F>().short_name();
        Err(Error::Configuration(format!(
            "The {} is dependent on the '{}' facility. Please add the facility to the container before adding {}.",
            dependent, facility, dependent
        )))
    }

    fn resolve_scope<S: ?Sized + Send + Sync + 'static>(&self) -> Result<ResolveScope<S>> {
        ResolveScope::new(self)
    }
}
