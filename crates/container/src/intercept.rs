//! Interception
//!
//! Proxies are ordinary structs implementing the service trait. Each method
//! packages the call to the wrapped target as an [`Invocation`] and hands it
//! to an [`Interceptor`] through [`invoke`]:
//!
//! ```
//! use std::sync::Arc;
//! use autotx_container::{invoke, Interceptor, Invocation};
//! use autotx_core::Result;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: String) -> Result<String>;
//! }
//!
//! struct GreeterProxy {
//!     target: Arc<dyn Greeter>,
//!     interceptor: Arc<dyn Interceptor>,
//! }
//!
//! impl Greeter for GreeterProxy {
//!     fn greet(&self, name: String) -> Result<String> {
//!         let target = Arc::clone(&self.target);
//!         invoke(&*self.interceptor, "greet", move || target.greet(name))
//!     }
//! }
//! ```

use std::fmt;
use std::sync::Arc;

use autotx_core::Result;
use parking_lot::Mutex;

type Proceed = Box<dyn FnOnce() -> Result<()> + Send>;

/// One intercepted call.
///
/// The interceptor may run [`Invocation::proceed`] on another thread.
pub struct Invocation {
    method: &'static str,
    proceed: Proceed,
}

impl Invocation {
    /// Invocation of `method` running `proceed`.
    pub fn new<F>(method: &'static str, proceed: F) -> Self
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        Self {
            method,
            proceed: Box::new(proceed),
        }
    }

    /// Name of the invoked method.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Call the wrapped target.
    pub fn proceed(self) -> Result<()> {
        (self.proceed)()
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method)
            .finish()
    }
}

/// Cross-cutting behavior wrapped around proxied calls.
pub trait Interceptor: Send + Sync {
    /// Handle one call. Must call `proceed` at most once.
    fn intercept(&self, invocation: Invocation) -> Result<()>;
}

/// Route a call through `interceptor` and return its value.
///
/// When the interceptor does not run the call before returning (for example
/// because it forked it onto another thread), `R::default()` is returned.
pub fn invoke<R, F>(interceptor: &dyn Interceptor, method: &'static str, call: F) -> Result<R>
where
    R: Default + Send + 'static,
    F: FnOnce() -> Result<R> + Send + 'static,
{
    let slot: Arc<Mutex<Option<R>>> = Arc::new(Mutex::new(None));
    let output = Arc::clone(&slot);
    interceptor.intercept(Invocation::new(method, move || {
        let value = call()?;
        *output.lock() = Some(value);
        Ok(())
    }))?;
    let value = slot.lock().take();
    Ok(value.unwrap_or_default())
}
