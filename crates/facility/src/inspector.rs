//! Registration-time inspection of transactional components.
//!
//! For every registration with a declared implementation the inspector
//! validates that transactional methods can be intercepted, caches the
//! metadata, and attaches a [`TransactionInterceptor`] through the
//! component's proxy.

use std::sync::Arc;

use autotx_container::{Container, InterceptorFactory, Registration};
use autotx_core::{Error, Result, TypeDescriptor};

use crate::interceptor::TransactionInterceptor;
use crate::meta::{TransactionMetaInfoStore, TransactionalClassMetaInfo};
use crate::proxy::{ProxyTypeStorage, ServiceRequestInfo};

/// Hooks transactional components up to the transaction interceptor.
#[derive(Debug, Clone)]
pub struct TransactionalComponentInspector {
    meta_store: Arc<TransactionMetaInfoStore>,
    proxy_storage: Arc<ProxyTypeStorage>,
}

impl TransactionalComponentInspector {
    /// Inspector sharing the facility's caches.
    pub fn new(meta_store: Arc<TransactionMetaInfoStore>, proxy_storage: Arc<ProxyTypeStorage>) -> Self {
        Self {
            meta_store,
            proxy_storage,
        }
    }

    /// Check that `registration` can be intercepted without changing it.
    ///
    /// Returns the implementation descriptor and its metadata when the
    /// component is transactional.
    pub fn check_model(
        &self,
        container: &Container,
        registration: &Registration,
    ) -> Result<Option<(TypeDescriptor, Arc<TransactionalClassMetaInfo>)>> {
        let descriptor = match registration.implementation() {
            Some(descriptor) => descriptor,
            None => return Ok(None),
        };

        validate(&descriptor)?;

        let meta = match self.meta_store.get_meta_from_type(&descriptor) {
            Some(meta) => meta,
            None => return Ok(None),
        };

        if container.create_proxy(registration).is_none() {
            return Err(Error::Configuration(format!(
                "The type {} wants to use transaction interception, but no proxy was registered for {}",
                descriptor.type_info(),
                registration.service_type()
            )));
        }
        Ok(Some((descriptor, meta)))
    }

    /// Inspect one registration, attaching interception when its
    /// implementation has transactional methods.
    pub fn process_model(&self, container: &Container, registration: &Registration) -> Result<()> {
        let (descriptor, meta) = match self.check_model(container, registration)? {
            Some(checked) => checked,
            None => return Ok(()),
        };

        if let Some(proxy) = container.create_proxy(registration) {
            if !self.proxy_storage.try_add_mapping(proxy, descriptor.type_info()) {
                tracing::debug!(%proxy, "proxy type already mapped");
            }
        }

        let meta_store = Arc::clone(&self.meta_store);
        let proxy_storage = Arc::clone(&self.proxy_storage);
        let factory: InterceptorFactory = Arc::new(move |request| {
            let info = ServiceRequestInfo::from_request(request, &proxy_storage);
            Ok(Arc::new(TransactionInterceptor::new(request.container(), &meta_store, info)) as _)
        });
        container.intercept(registration, factory)?;

        tracing::info!(
            service = %registration.service_type(),
            implementation = %descriptor.type_info(),
            methods = ?meta.transactional_methods().collect::<Vec<_>>(),
            "transaction interception attached"
        );
        Ok(())
    }
}

/// Transactional methods must be overridable, or the proxy cannot reach them.
fn validate(descriptor: &TypeDescriptor) -> Result<()> {
    let sealed: Vec<&'static str> = descriptor
        .methods()
        .into_iter()
        .filter(|m| m.is_transactional() && !m.overridable)
        .map(|m| m.name)
        .collect();
    if sealed.is_empty() {
        return Ok(());
    }
    Err(Error::Configuration(format!(
        "The type {} wants to use transaction interception, however its transactional methods must be overridable \
         so the proxy can intercept them. Please correct the following methods: {}",
        descriptor.type_info(),
        sealed.join(", ")
    )))
}
