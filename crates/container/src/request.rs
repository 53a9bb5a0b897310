//! Resolution requests
//!
//! Every resolution builds a [`Request`] that links to the request of the
//! component that asked for it, so factories can see who they are being
//! injected into.

use std::fmt;
use std::sync::Arc;

use autotx_core::{Result, TypeDescriptor, TypeInfo};

use crate::container::Container;
use crate::registration::Registration;

/// One step of a resolution chain.
pub struct Request<'a> {
    pub(crate) container: &'a Container,
    pub(crate) registration: &'a Registration,
    pub(crate) parent: Option<&'a Request<'a>>,
    pub(crate) depth: usize,
}

impl<'a> Request<'a> {
    /// Container performing the resolution.
    pub fn container(&self) -> &'a Container {
        self.container
    }

    /// Registration being resolved.
    pub fn registration(&self) -> &'a Registration {
        self.registration
    }

    /// Service type being resolved.
    pub fn service_type(&self) -> TypeInfo {
        self.registration.service_type()
    }

    /// Declared implementation.
    pub fn implementation(&self) -> Option<TypeDescriptor> {
        self.registration.implementation()
    }

    /// Type the resolution produces; the proxy type for intercepted components.
    pub fn implementation_type(&self) -> Option<TypeInfo> {
        self.registration.effective_implementation_type()
    }

    /// Registration key.
    pub fn key(&self) -> Option<&'a str> {
        self.registration.key()
    }

    /// Request of the component this one is injected into.
    pub fn parent(&self) -> Option<&'a Request<'a>> {
        self.parent
    }

    /// Number of ancestors.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Resolve a dependency of the component being built.
    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        self.container.resolve_as_dependency(None, Some(self))
    }

    /// Resolve a keyed dependency of the component being built.
    pub fn resolve_named<S: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<S>> {
        self.container.resolve_as_dependency(Some(key), Some(self))
    }

    /// Resolve every registration of `S` as dependencies.
    pub fn resolve_many<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<S>>> {
        self.container.resolve_many_as_dependency(Some(self))
    }
}

impl fmt::Debug for Request<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("service", &self.service_type())
            .field("key", &self.key())
            .field("depth", &self.depth)
            .finish()
    }
}
