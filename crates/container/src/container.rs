//! The container
//!
//! Registration, resolution and the hooks the transaction facility needs:
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`Container::register`] | add a component; runs registration hooks |
//! | [`Container::resolve`] / [`resolve_named`](Container::resolve_named) / [`resolve_many`](Container::resolve_many) | produce instances |
//! | [`Container::on_registered`] | observe every later registration |
//! | [`Container::create_proxy`] / [`Container::intercept`] | wrap a component's instances with an interceptor |
//! | [`Container::dispose`] | dispose singletons |
//!
//! The first unnamed registration of a service is its default.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use autotx_core::{Error, Result, TypeInfo};
use parking_lot::RwLock;

use crate::registration::{downcast, Component, InterceptorFactory, Registration};
use crate::request::Request;
use crate::reuse::Reuse;
use crate::scope::{Instance, Scope};

/// Resolution chains deeper than this are treated as cycles.
pub const MAX_RESOLUTION_DEPTH: usize = 64;

type RegistrationHook = Arc<dyn Fn(&Container, &Arc<Registration>) -> Result<()> + Send + Sync>;

struct Inner {
    registrations: RwLock<Vec<Arc<Registration>>>,
    hooks: RwLock<Vec<RegistrationHook>>,
    singletons: Scope,
    next_factory_id: AtomicU64,
    disposed: AtomicBool,
}

/// Dependency injection container. Cheap to clone; clones share state.
///
/// Services are keyed by type and optional name. The first unnamed
/// registration of a type is its default. Registration hooks installed with
/// [`on_registered`](Self::on_registered) run for every later registration,
/// and a failing hook withdraws the registration it rejected.
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

/// Non-owning handle to a [`Container`].
#[derive(Clone)]
pub struct WeakContainer {
    inner: Weak<Inner>,
}

impl WeakContainer {
    /// The container, if still alive.
    pub fn upgrade(&self) -> Option<Container> {
        self.inner.upgrade().map(|inner| Container { inner })
    }
}

impl fmt::Debug for WeakContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakContainer")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl Container {
    /// Empty container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                registrations: RwLock::new(Vec::new()),
                hooks: RwLock::new(Vec::new()),
                singletons: Scope::new("singletons"),
                next_factory_id: AtomicU64::new(1),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(Error::Disposed("container".into()));
        }
        Ok(())
    }

    /// Add a component.
    ///
    /// Registration hooks run afterwards; if one fails the registration is
    /// withdrawn and the error returned.
    pub fn register<S>(&self, component: Component<S>) -> Result<Arc<Registration>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.ensure_alive()?;
        let id = self.inner.next_factory_id.fetch_add(1, Ordering::SeqCst);
        let registration = Arc::new(component.into_registration(id));
        self.inner.registrations.write().push(Arc::clone(&registration));
        tracing::debug!(
            service = %registration.service_type(),
            key = ?registration.key(),
            reuse = registration.reuse().name(),
            "registered component"
        );

        let hooks = self.inner.hooks.read().clone();
        for hook in hooks {
            if let Err(e) = hook(self, &registration) {
                self.inner
                    .registrations
                    .write()
                    .retain(|r| r.factory_id() != id);
                return Err(e);
            }
        }
        Ok(registration)
    }

    /// Register an existing instance as a singleton.
    pub fn use_instance<S>(&self, instance: Arc<S>) -> Result<Arc<Registration>>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        self.register(Component::instance(instance))
    }

    /// Run `hook` for every registration added from now on.
    pub fn on_registered<F>(&self, hook: F)
    where
        F: Fn(&Container, &Arc<Registration>) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.hooks.write().push(Arc::new(hook));
    }

    /// All registrations, in registration order.
    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        self.inner.registrations.read().clone()
    }

    fn registrations_of(&self, service: TypeInfo) -> Vec<Arc<Registration>> {
        self.inner
            .registrations
            .read()
            .iter()
            .filter(|r| r.service_type() == service)
            .cloned()
            .collect()
    }

    fn find(&self, service: TypeInfo, key: Option<&str>) -> Option<Arc<Registration>> {
        self.inner
            .registrations
            .read()
            .iter()
            .find(|r| r.service_type() == service && r.key() == key)
            .cloned()
    }

    /// Whether `S` has a default registration.
    pub fn is_registered<S: ?Sized + 'static>(&self) -> bool {
        self.find(TypeInfo::of::<S>(), None).is_some()
    }

    /// Whether `S` is registered under `key`.
    pub fn is_registered_named<S: ?Sized + 'static>(&self, key: &str) -> bool {
        self.find(TypeInfo::of::<S>(), Some(key)).is_some()
    }

    /// Resolve the default registration of `S`.
    pub fn resolve<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<S>> {
        self.resolve_as_dependency(None, None)
    }

    /// Resolve `S` registered under `key`.
    pub fn resolve_named<S: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<S>> {
        self.resolve_as_dependency(Some(key), None)
    }

    /// Resolve every registration of `S`, keyed ones included.
    pub fn resolve_many<S: ?Sized + Send + Sync + 'static>(&self) -> Result<Vec<Arc<S>>> {
        self.resolve_many_as_dependency(None)
    }

    pub(crate) fn resolve_as_dependency<S: ?Sized + Send + Sync + 'static>(
        &self,
        key: Option<&str>,
        parent: Option<&Request<'_>>,
    ) -> Result<Arc<S>> {
        let service = TypeInfo::of::<S>();
        let registration = self.find(service, key).ok_or_else(|| match key {
            Some(key) => Error::Resolution(format!("no registration of {} under key '{}'", service, key)),
            None => Error::Resolution(format!("no default registration of {}", service)),
        })?;
        let instance = self.resolve_registration(&registration, parent)?;
        downcast::<S>(&instance)
    }

    pub(crate) fn resolve_many_as_dependency<S: ?Sized + Send + Sync + 'static>(
        &self,
        parent: Option<&Request<'_>>,
    ) -> Result<Vec<Arc<S>>> {
        self.registrations_of(TypeInfo::of::<S>())
            .iter()
            .map(|registration| {
                let instance = self.resolve_registration(registration, parent)?;
                downcast::<S>(&instance)
            })
            .collect()
    }

    fn resolve_registration(
        &self,
        registration: &Registration,
        parent: Option<&Request<'_>>,
    ) -> Result<Instance> {
        self.ensure_alive()?;
        let depth = parent.map_or(0, |p| p.depth + 1);
        if depth > MAX_RESOLUTION_DEPTH {
            return Err(Error::Resolution(format!(
                "resolving {} exceeded depth {}; dependency cycle?",
                registration.service_type(),
                MAX_RESOLUTION_DEPTH
            )));
        }
        let request = Request {
            container: self,
            registration,
            parent,
            depth,
        };
        tracing::trace!(service = %registration.service_type(), depth, "resolving");

        match registration.reuse() {
            Reuse::Transient => registration.build(&request).map(|(instance, _)| instance),
            Reuse::Singleton => self
                .inner
                .singletons
                .get_or_add(registration.factory_id(), || registration.build(&request)),
            Reuse::Scoped(provider) => {
                let scope = provider.current_scope(&request)?;
                scope.get_or_add(registration.factory_id(), || registration.build(&request))
            }
        }
    }

    /// Proxy type for `registration`, if it can be proxied.
    pub fn create_proxy(&self, registration: &Registration) -> Option<TypeInfo> {
        registration.proxy_type()
    }

    /// Wrap future instances of `registration` with interceptors built by
    /// `factory`. Instances keep the registration's reuse policy.
    pub fn intercept(&self, registration: &Registration, factory: InterceptorFactory) -> Result<()> {
        if registration.proxy_type().is_none() {
            return Err(Error::Configuration(format!(
                "{} cannot be intercepted: no proxy was provided at registration",
                registration.service_type()
            )));
        }
        registration.set_interceptor(factory);
        tracing::debug!(service = %registration.service_type(), "interceptor attached");
        Ok(())
    }

    /// Dispose singletons and refuse further use. Idempotent.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.singletons.dispose();
        tracing::debug!("container disposed");
    }

    /// Whether [`Container::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("registrations", &self.inner.registrations.read().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
