//! Proxy bookkeeping and request info injection
//!
//! Intercepted components resolve to proxy types. [`ProxyTypeStorage`] maps
//! each proxy type back to the implementation it wraps, so components that
//! ask "who am I injected into?" through [`ServiceRequestInfo`] or
//! [`ParentServiceRequestInfo`] see the real implementation.

use std::any::TypeId;
use std::fmt;

use autotx_container::Request;
use autotx_core::{TypeDescriptor, TypeInfo};
use dashmap::DashMap;

/// Proxy type to implementation type map.
#[derive(Default)]
pub struct ProxyTypeStorage {
    mappings: DashMap<TypeId, TypeInfo>,
}

impl ProxyTypeStorage {
    /// Empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `proxy` wraps `implementation`. Returns false when the
    /// proxy type was already mapped.
    pub fn try_add_mapping(&self, proxy: TypeInfo, implementation: TypeInfo) -> bool {
        let mut added = false;
        self.mappings.entry(proxy.id()).or_insert_with(|| {
            added = true;
            implementation
        });
        added
    }

    /// Whether `ty` is a known proxy type.
    pub fn is_proxy_type(&self, ty: TypeInfo) -> bool {
        self.mappings.contains_key(&ty.id())
    }

    /// Implementation behind `ty`, or `ty` itself when it is not a proxy.
    pub fn get_implementation_type(&self, ty: TypeInfo) -> TypeInfo {
        self.mappings.get(&ty.id()).map_or(ty, |entry| *entry.value())
    }

    /// Number of mapped proxies.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

impl fmt::Debug for ProxyTypeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyTypeStorage")
            .field("mappings", &self.len())
            .finish()
    }
}

/// Snapshot of one resolution request.
#[derive(Debug, Clone)]
pub struct ServiceRequestInfo {
    service: TypeInfo,
    key: Option<String>,
    request_implementation: Option<TypeInfo>,
    implementation: Option<TypeInfo>,
    descriptor: Option<TypeDescriptor>,
}

impl ServiceRequestInfo {
    /// Capture `request`, mapping proxy types through `storage`.
    pub fn from_request(request: &Request<'_>, storage: &ProxyTypeStorage) -> Self {
        let request_implementation = request.implementation_type();
        Self {
            service: request.service_type(),
            key: request.key().map(str::to_owned),
            request_implementation,
            implementation: request_implementation.map(|ty| storage.get_implementation_type(ty)),
            descriptor: request.implementation(),
        }
    }

    /// Requested service type.
    pub fn service_type(&self) -> TypeInfo {
        self.service
    }

    /// Registration key.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Type the request produced; a proxy type for intercepted components.
    pub fn request_implementation_type(&self) -> Option<TypeInfo> {
        self.request_implementation
    }

    /// Implementation type with proxies unwrapped.
    pub fn implementation_type(&self) -> Option<TypeInfo> {
        self.implementation
    }

    /// Implementation method table, when declared.
    pub fn implementation_descriptor(&self) -> Option<TypeDescriptor> {
        self.descriptor
    }
}

/// Request info of the component that depends on the component being built.
///
/// Inject it into a component `C`; it then describes whoever required `C`.
#[derive(Debug, Clone)]
pub struct ParentServiceRequestInfo {
    info: Option<ServiceRequestInfo>,
}

impl ParentServiceRequestInfo {
    /// Capture the grandparent of `request`, which is the request for this
    /// value itself.
    pub fn from_request(request: &Request<'_>, storage: &ProxyTypeStorage) -> Self {
        let info = request
            .parent()
            .and_then(|dependent| dependent.parent())
            .map(|requester| ServiceRequestInfo::from_request(requester, storage));
        Self { info }
    }

    /// The captured request, `None` when the dependent was resolved directly.
    pub fn request_info(&self) -> Option<&ServiceRequestInfo> {
        self.info.as_ref()
    }

    /// Implementation type of the requester with proxies unwrapped.
    pub fn implementation_type(&self) -> Option<TypeInfo> {
        self.info.as_ref().and_then(|info| info.implementation_type())
    }
}
