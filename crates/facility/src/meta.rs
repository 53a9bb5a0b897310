//! Transaction metadata cache
//!
//! [`TransactionMetaInfoStore`] reads an implementation type's method table
//! once and caches which methods are transactional.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use autotx_core::{TransactionAttribute, TypeDescriptor, TypeInfo};
use dashmap::DashMap;

/// Transactional methods of one implementation type.
#[derive(Debug, Clone)]
pub struct TransactionalClassMetaInfo {
    implementation: TypeInfo,
    methods: Vec<(&'static str, TransactionAttribute)>,
    non_overridable: Vec<&'static str>,
}

impl TransactionalClassMetaInfo {
    fn from_descriptor(descriptor: &TypeDescriptor) -> Self {
        let mut methods: Vec<(&'static str, TransactionAttribute)> = Vec::new();
        let mut non_overridable = Vec::new();
        for method in descriptor.methods() {
            let Some(attribute) = method.transaction else {
                continue;
            };
            if !method.overridable {
                non_overridable.push(method.name);
            }
            if !methods.iter().any(|(name, _)| *name == method.name) {
                methods.push((method.name, attribute));
            }
        }
        Self {
            implementation: descriptor.type_info(),
            methods,
            non_overridable,
        }
    }

    /// Implementation type described.
    pub fn implementation(&self) -> TypeInfo {
        self.implementation
    }

    /// Names of transactional methods, in declaration order.
    pub fn transactional_methods(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.methods.iter().map(|(name, _)| *name)
    }

    /// Attribute of `method`, if it is transactional.
    pub fn as_transactional(&self, method: &str) -> Option<&TransactionAttribute> {
        self.methods
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, attribute)| attribute)
    }

    /// Transactional methods a proxy cannot interpose on.
    pub fn non_overridable_methods(&self) -> &[&'static str] {
        &self.non_overridable
    }
}

/// Cache of [`TransactionalClassMetaInfo`] per implementation type.
#[derive(Default)]
pub struct TransactionMetaInfoStore {
    cache: DashMap<TypeId, Option<Arc<TransactionalClassMetaInfo>>>,
}

impl TransactionMetaInfoStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata for the described type, or `None` when it has no
    /// transactional methods. Computed on first request.
    pub fn get_meta_from_type(
        &self,
        descriptor: &TypeDescriptor,
    ) -> Option<Arc<TransactionalClassMetaInfo>> {
        self.cache
            .entry(descriptor.type_info().id())
            .or_insert_with(|| {
                let meta = TransactionalClassMetaInfo::from_descriptor(descriptor);
                tracing::debug!(
                    implementation = %meta.implementation(),
                    methods = meta.methods.len(),
                    "inspected type for transactional methods"
                );
                if meta.methods.is_empty() {
                    None
                } else {
                    Some(Arc::new(meta))
                }
            })
            .clone()
    }

    /// Cached metadata, without inspecting.
    pub fn get_cached(&self, implementation: TypeInfo) -> Option<Arc<TransactionalClassMetaInfo>> {
        self.cache
            .get(&implementation.id())
            .and_then(|entry| entry.value().clone())
    }

    /// Number of inspected types.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no type was inspected yet.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl fmt::Debug for TransactionMetaInfoStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionMetaInfoStore")
            .field("types", &self.len())
            .finish()
    }
}
