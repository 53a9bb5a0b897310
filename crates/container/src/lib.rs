//! Dependency injection container for AutoTx
//!
//! A deliberately small container exposing exactly what the transaction
//! facility relies on:
//! - [`Container`]: register / resolve / resolve-many / is-registered
//! - [`Reuse`] and [`ScopeProvider`]: transient, singleton and scoped lifetimes
//! - [`Scope`]: instance buckets with ordered disposal
//! - [`Request`]: the resolution chain handed to factories
//! - [`Interceptor`], [`Invocation`], [`invoke`]: proxy-based interception

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod intercept;
pub mod registration;
pub mod request;
pub mod reuse;
pub mod scope;

pub use container::{Container, WeakContainer, MAX_RESOLUTION_DEPTH};
pub use intercept::{invoke, Interceptor, Invocation};
pub use registration::{Component, InterceptorFactory, Registration};
pub use request::Request;
pub use reuse::{Reuse, ScopeProvider};
pub use scope::{Disposer, Instance, Scope};
