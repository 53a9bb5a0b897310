//! Test helpers.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use autotx_container::Container;
use autotx_core::{Result, TypeInfo};

/// Holds a resolved service for the lifetime of the guard.
///
/// The container does not track individual resolutions, so releasing the
/// service means dropping the guard's handle. A transient instance is freed
/// once no other handle remains; singleton and per-transaction instances stay
/// owned by their scope and are disposed with it.
///
/// ```ignore
/// let scope = container.resolve_scope::<dyn OrderService>()?;
/// scope.place(order)?;
/// ```
pub struct ResolveScope<S: ?Sized> {
    service: Arc<S>,
    container: Container,
}

impl<S: ?Sized + Send + Sync + 'static> ResolveScope<S> {
    /// Resolve `S` from `container`.
    pub fn new(container: &Container) -> Result<Self> {
        tracing::debug!(service = %TypeInfo::of::<S>(), "creating resolve scope");
        Ok(Self {
            service: container.resolve::<S>()?,
            container: container.clone(),
        })
    }

    /// The resolved service.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// Container the service came from.
    pub fn container(&self) -> &Container {
        &self.container
    }
}

impl<S: ?Sized> Deref for ResolveScope<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.service
    }
}

impl<S: ?Sized> Drop for ResolveScope<S> {
    fn drop(&mut self) {
        tracing::debug!(service = std::any::type_name::<S>(), "disposing resolve scope, releasing service");
    }
}

impl<S: ?Sized> fmt::Debug for ResolveScope<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveScope")
            .field("service", &std::any::type_name::<S>())
            .finish()
    }
}
