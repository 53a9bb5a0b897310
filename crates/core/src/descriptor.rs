//! Explicit reflection table
//!
//! Rust has no runtime reflection, so implementation types describe their
//! methods once through [`Reflect`]. The table is what the facility inspects to
//! decide which services are intercepted and how:
//!
//! | Type | Role |
//! |------|------|
//! | [`TypeInfo`] | `TypeId` plus a readable name |
//! | [`MethodDescriptor`] | one method: name, overridable flag, transaction marker |
//! | [`TypeDescriptor`] | a type together with its method table |

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::types::TransactionAttribute;

/// Runtime identity of a type.
#[derive(Clone, Copy)]
pub struct TypeInfo {
    id: TypeId,
    name: &'static str,
}

impl TypeInfo {
    /// Identity of `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The `TypeId`.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(idx) => &self.name[idx + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeInfo {}

impl Hash for TypeInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One entry of a type's method table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Method name, as passed by proxies when invoking
    pub name: &'static str,
    /// Whether a proxy can interpose on the method
    pub overridable: bool,
    /// Transaction marker, if any
    pub transaction: Option<TransactionAttribute>,
}

impl MethodDescriptor {
    /// A method reachable through the service trait.
    pub const fn overridable(name: &'static str) -> Self {
        Self {
            name,
            overridable: true,
            transaction: None,
        }
    }

    /// An inherent method a proxy cannot interpose on.
    pub const fn sealed(name: &'static str) -> Self {
        Self {
            name,
            overridable: false,
            transaction: None,
        }
    }

    /// Attach a transaction marker.
    pub const fn transactional(mut self, attribute: TransactionAttribute) -> Self {
        self.transaction = Some(attribute);
        self
    }

    /// Whether the method carries a transaction marker.
    pub fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }
}

/// Implemented by component types that expose a method table.
///
/// # Examples
///
/// ```
/// use autotx_core::{MethodDescriptor, Reflect, TransactionAttribute};
///
/// struct OrderService;
///
/// impl Reflect for OrderService {
///     fn methods() -> Vec<MethodDescriptor> {
///         vec![
///             MethodDescriptor::overridable("place")
///                 .transactional(TransactionAttribute::requires()),
///             MethodDescriptor::overridable("list"),
///         ]
///     }
/// }
///
/// assert_eq!(OrderService::methods().len(), 2);
/// ```
pub trait Reflect: 'static {
    /// Method table of the implementing type.
    fn methods() -> Vec<MethodDescriptor>;
}

/// A type together with a way to produce its method table.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    type_info: TypeInfo,
    methods: fn() -> Vec<MethodDescriptor>,
}

impl TypeDescriptor {
    /// Descriptor of a reflectable type.
    pub fn of<T: Reflect>() -> Self {
        Self {
            type_info: TypeInfo::of::<T>(),
            methods: T::methods,
        }
    }

    /// Identity of the described type.
    pub fn type_info(&self) -> TypeInfo {
        self.type_info
    }

    /// Build the method table.
    pub fn methods(&self) -> Vec<MethodDescriptor> {
        (self.methods)()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type", &self.type_info)
            .finish()
    }
}
