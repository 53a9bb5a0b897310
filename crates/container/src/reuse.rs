//! Reuse policies
//!
//! A [`Reuse`] decides where a resolved instance is cached:
//! nowhere (transient), in the container's singleton scope, or in whatever
//! scope a [`ScopeProvider`] reports as current.

use std::fmt;
use std::sync::Arc;

use autotx_core::Result;

use crate::request::Request;
use crate::scope::Scope;

/// Supplies the scope instances are cached in for scoped reuse.
pub trait ScopeProvider: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Scope for the component being resolved.
    fn current_scope(&self, request: &Request<'_>) -> Result<Arc<Scope>>;
}

/// Instance caching policy.
#[derive(Clone, Default)]
pub enum Reuse {
    /// A new instance per resolution.
    #[default]
    Transient,
    /// One instance per container.
    Singleton,
    /// One instance per provider-supplied scope.
    Scoped(Arc<dyn ScopeProvider>),
}

impl Reuse {
    /// Scoped reuse over `provider`.
    pub fn scoped(provider: impl ScopeProvider + 'static) -> Self {
        Reuse::Scoped(Arc::new(provider))
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        match self {
            Reuse::Transient => "transient",
            Reuse::Singleton => "singleton",
            Reuse::Scoped(provider) => provider.name(),
        }
    }
}

impl fmt::Debug for Reuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reuse({})", self.name())
    }
}
