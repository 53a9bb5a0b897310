//! Component registrations
//!
//! [`Component`] is the builder callers use; [`Registration`] is what the
//! container stores. Interception is attached to a registration after the
//! fact (see [`Container::intercept`](crate::Container::intercept)), so it
//! lives behind a lock.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use autotx_core::{Error, Reflect, Result, TypeDescriptor, TypeInfo};
use parking_lot::RwLock;

use crate::intercept::Interceptor;
use crate::request::Request;
use crate::reuse::Reuse;
use crate::scope::{Disposer, Instance};

type Factory = Box<dyn Fn(&Request<'_>) -> Result<Instance> + Send + Sync>;
type ProxyFactory = Box<dyn Fn(Instance, Arc<dyn Interceptor>) -> Result<Instance> + Send + Sync>;
type DisposerFactory = Box<dyn Fn(&Instance) -> Option<Disposer> + Send + Sync>;

/// Builds the interceptor for one resolution of an intercepted component.
pub type InterceptorFactory =
    Arc<dyn Fn(&Request<'_>) -> Result<Arc<dyn Interceptor>> + Send + Sync>;

pub(crate) fn downcast<S: ?Sized + Send + Sync + 'static>(instance: &Instance) -> Result<Arc<S>> {
    (**instance)
        .downcast_ref::<Arc<S>>()
        .cloned()
        .ok_or_else(|| {
            Error::Internal(format!(
                "stored instance is not a {}",
                std::any::type_name::<S>()
            ))
        })
}

/// Registration builder for service `S`.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use autotx_container::{Component, Container, Reuse};
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// struct FixedClock;
///
/// impl Clock for FixedClock {
///     fn now(&self) -> u64 {
///         7
///     }
/// }
///
/// let container = Container::new();
/// container
///     .register(Component::<dyn Clock>::new(|_| Ok(Arc::new(FixedClock))).reuse(Reuse::Singleton))
///     .unwrap();
/// assert_eq!(container.resolve::<dyn Clock>().unwrap().now(), 7);
/// ```
pub struct Component<S: ?Sized> {
    factory: Factory,
    reuse: Reuse,
    key: Option<String>,
    implementation: Option<TypeDescriptor>,
    proxy: Option<(TypeInfo, ProxyFactory)>,
    disposer: Option<DisposerFactory>,
    _service: PhantomData<fn() -> Arc<S>>,
}

impl<S: ?Sized + Send + Sync + 'static> Component<S> {
    /// Component produced by `factory`.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&Request<'_>) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(move |request| factory(request).map(|s| Arc::new(s) as Instance)),
            reuse: Reuse::Transient,
            key: None,
            implementation: None,
            proxy: None,
            disposer: None,
            _service: PhantomData,
        }
    }

    /// Singleton component wrapping an existing instance.
    pub fn instance(instance: Arc<S>) -> Self {
        Self::new(move |_| Ok(Arc::clone(&instance))).reuse(Reuse::Singleton)
    }

    /// Set the reuse policy.
    pub fn reuse(mut self, reuse: Reuse) -> Self {
        self.reuse = reuse;
        self
    }

    /// Register under `key`.
    pub fn named(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Record the implementation type so its method table can be inspected.
    pub fn implemented_by<I: Reflect>(mut self) -> Self {
        self.implementation = Some(TypeDescriptor::of::<I>());
        self
    }

    /// Provide the proxy used when the component gets intercepted.
    ///
    /// `P` names the proxy type for diagnostics and proxy-to-implementation
    /// mapping; `hook` builds it around the target.
    pub fn proxied_by<P, F>(mut self, hook: F) -> Self
    where
        P: 'static,
        F: Fn(Arc<S>, Arc<dyn Interceptor>) -> Arc<S> + Send + Sync + 'static,
    {
        let factory: ProxyFactory = Box::new(move |target, interceptor| {
            let target = downcast::<S>(&target)?;
            Ok(Arc::new(hook(target, interceptor)) as Instance)
        });
        self.proxy = Some((TypeInfo::of::<P>(), factory));
        self
    }

    /// Run `dispose` when a cached instance leaves its scope.
    pub fn disposed_with<F>(mut self, dispose: F) -> Self
    where
        F: Fn(&S) + Send + Sync + 'static,
    {
        let dispose = Arc::new(dispose);
        self.disposer = Some(Box::new(move |instance| {
            let service = downcast::<S>(instance).ok()?;
            let dispose = Arc::clone(&dispose);
            Some(Box::new(move || dispose(&service)) as Disposer)
        }));
        self
    }

    pub(crate) fn into_registration(self, factory_id: u64) -> Registration {
        Registration {
            factory_id,
            service: TypeInfo::of::<S>(),
            implementation: self.implementation,
            key: self.key,
            reuse: self.reuse,
            factory: self.factory,
            proxy: self.proxy,
            disposer: self.disposer,
            interceptor: RwLock::new(None),
        }
    }
}

/// A stored component registration.
pub struct Registration {
    factory_id: u64,
    service: TypeInfo,
    implementation: Option<TypeDescriptor>,
    key: Option<String>,
    reuse: Reuse,
    factory: Factory,
    proxy: Option<(TypeInfo, ProxyFactory)>,
    disposer: Option<DisposerFactory>,
    interceptor: RwLock<Option<InterceptorFactory>>,
}

impl Registration {
    /// Unique id, also the cache key inside scopes.
    pub fn factory_id(&self) -> u64 {
        self.factory_id
    }

    /// Service type.
    pub fn service_type(&self) -> TypeInfo {
        self.service
    }

    /// Implementation type and method table, when declared.
    pub fn implementation(&self) -> Option<TypeDescriptor> {
        self.implementation
    }

    /// Registration key.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Reuse policy.
    pub fn reuse(&self) -> &Reuse {
        &self.reuse
    }

    /// Proxy type, when a proxy hook was provided.
    pub fn proxy_type(&self) -> Option<TypeInfo> {
        self.proxy.as_ref().map(|(info, _)| *info)
    }

    /// Whether an interceptor is attached.
    pub fn is_intercepted(&self) -> bool {
        self.interceptor.read().is_some()
    }

    /// Type that resolutions actually produce: the proxy when intercepted,
    /// otherwise the implementation.
    pub fn effective_implementation_type(&self) -> Option<TypeInfo> {
        if self.is_intercepted() {
            if let Some(proxy) = self.proxy_type() {
                return Some(proxy);
            }
        }
        self.implementation.map(|descriptor| descriptor.type_info())
    }

    pub(crate) fn set_interceptor(&self, factory: InterceptorFactory) {
        *self.interceptor.write() = Some(factory);
    }

    /// Build a fresh instance, wrapped in its proxy when intercepted.
    pub(crate) fn build(&self, request: &Request<'_>) -> Result<(Instance, Option<Disposer>)> {
        let target = (self.factory)(request)?;
        let disposer = self.disposer.as_ref().and_then(|make| make(&target));

        let interceptor = self.interceptor.read().clone();
        let instance = match (interceptor, &self.proxy) {
            (Some(make_interceptor), Some((_, proxy))) => proxy(target, make_interceptor(request)?)?,
            _ => target,
        };
        Ok((instance, disposer))
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("factory_id", &self.factory_id)
            .field("service", &self.service)
            .field("implementation", &self.implementation.map(|d| d.type_info()))
            .field("key", &self.key)
            .field("reuse", &self.reuse)
            .field("intercepted", &self.is_intercepted())
            .finish()
    }
}
