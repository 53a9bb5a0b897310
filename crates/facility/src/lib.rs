//! AutoTx facility
//!
//! Attribute-driven transactions for container-resolved components:
//! - [`AutoTxFacility`]: registers the engine and inspects registrations
//! - [`TransactionInterceptor`]: drives transactions around transactional methods
//! - [`TransactionMetaInfoStore`]: cached per-type transaction metadata
//! - [`PerTransactionScopeContext`] / [`PerTopTransactionScopeContext`]: lifetimes bound to a transaction
//! - [`AutoTxReuse`]: reuse policies backed by those contexts
//! - [`ServiceRequestInfo`] / [`ParentServiceRequestInfo`]: resolution chain injection

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod facility;
pub mod inspector;
pub mod interceptor;
pub mod lifestyle;
pub mod meta;
pub mod options;
pub mod proxy;
pub mod testing;

pub use facility::{AutoTxContainerExt, AutoTxFacility};
pub use inspector::TransactionalComponentInspector;
pub use interceptor::TransactionInterceptor;
pub use lifestyle::{
    AutoTxReuse, PerTopTransactionReuse, PerTopTransactionScopeContext, PerTransactionReuse,
    PerTransactionScopeContext, PerTransactionScopeContextBase, TransactionSemantic,
    PER_TOP_TRANSACTION_SCOPE_NAME, PER_TRANSACTION_SCOPE_NAME,
};
pub use meta::{TransactionMetaInfoStore, TransactionalClassMetaInfo};
pub use options::{ActivityManagerKind, AmbientTransactionOption, AutoTxOptions};
pub use proxy::{ParentServiceRequestInfo, ProxyTypeStorage, ServiceRequestInfo};
pub use testing::ResolveScope;
