//! Transaction interceptor
//!
//! Attached to every intercepted component. Per call:
//!
//! 1. Look the method up in the cached metadata; non-transactional methods
//!    pass straight through.
//! 2. Resolve the [`TransactionManager`] and ask it for a transaction.
//! 3. Dispatch:
//!
//! | Outcome | Handling |
//! |---------|----------|
//! | none, mode `Suppress` | run inside a suppression scope |
//! | joined | run directly, the caller owns the transaction |
//! | new, no fork | synchronized case: ambient scope, complete if still active, always dispose |
//! | new, fork | fork case: run on a dependent task enlisted with the manager |
//!
//! Errors from the method are never converted, only logged.

use std::fmt;
use std::sync::Arc;

use autotx_concurrency::{CreatedTransaction, DependentTask, Transaction, TransactionManager};
use autotx_container::{Container, Interceptor, Invocation, WeakContainer};
use autotx_core::{Error, Result, TransactionMode, TransactionState};

use crate::meta::{TransactionMetaInfoStore, TransactionalClassMetaInfo};
use crate::proxy::ServiceRequestInfo;

/// Disposes the transaction on every exit path, unwinding included.
struct DisposeOnExit<'a>(&'a Transaction);

impl Drop for DisposeOnExit<'_> {
    fn drop(&mut self) {
        tracing::debug!(tx = %self.0.local_identifier(), "disposing transaction - synchronized case");
        self.0.dispose();
    }
}

/// Interceptor driving transactions around transactional methods.
pub struct TransactionInterceptor {
    container: WeakContainer,
    meta: Option<Arc<TransactionalClassMetaInfo>>,
    service: ServiceRequestInfo,
}

impl TransactionInterceptor {
    /// Interceptor for the component described by `service`.
    pub fn new(container: &Container, store: &TransactionMetaInfoStore, service: ServiceRequestInfo) -> Self {
        let meta = service
            .implementation_descriptor()
            .and_then(|descriptor| store.get_meta_from_type(&descriptor));
        tracing::debug!(service = %service.service_type(), transactional = meta.is_some(), "created transaction interceptor");
        Self {
            container: container.downgrade(),
            meta,
            service,
        }
    }

    /// The intercepted component.
    pub fn service(&self) -> &ServiceRequestInfo {
        &self.service
    }

    fn synchronized_case(&self, transaction: &Transaction, invocation: Invocation) -> Result<()> {
        let id = transaction.local_identifier();
        let method = invocation.method();
        let _dispose = DisposeOnExit(transaction);
        let _ambient = transaction.scope();

        let result = invocation.proceed().and_then(|()| {
            let state = transaction.state();
            if state == TransactionState::Active {
                transaction.complete()
            } else {
                tracing::warn!(
                    tx = %id,
                    %state,
                    "transaction was in state {}, so it cannot be completed; the method might have completed or rolled it back itself",
                    state
                );
                Ok(())
            }
        });

        if let Err(e) = &result {
            match e {
                e if e.is_aborted() => {
                    tracing::warn!(tx = %id, method, error = %e, "transaction aborted - synchronized case")
                }
                Error::DependentTransactionsFailed(failures) => tracing::warn!(
                    tx = %id,
                    method,
                    failed = failures.len(),
                    "one or more dependent transactions failed, returning the failures"
                ),
                Error::TransactionInDoubt(_) | Error::Internal(_) => {
                    tracing::error!(tx = %id, method, error = %e, "internal error in transaction system - synchronized case")
                }
                _ => tracing::error!(
                    tx = %id,
                    method,
                    error = %e,
                    "caught error, transaction will roll back - synchronized case"
                ),
            }
        }
        result
    }

    fn fork_case(
        &self,
        manager: &TransactionManager,
        created: CreatedTransaction,
        invocation: Invocation,
    ) -> Result<()> {
        let id = created.transaction().local_identifier();
        tracing::debug!(tx = %id, method = invocation.method(), "fork case");

        let task = DependentTask::spawn(id, move || {
            let _fork = created.fork_scope();
            let dependent = created.transaction();
            let _ambient = dependent.scope();

            tracing::debug!(tx = %id, "calling proceed on forked transaction");
            invocation.proceed().and_then(|()| dependent.complete()).map_err(|e| {
                if e.is_aborted() {
                    tracing::warn!(tx = %id, error = %e, "transaction aborted");
                    Error::TransactionAborted {
                        reason: "parallel/forked transaction aborted; see source for details".into(),
                        source: Some(Box::new(e)),
                    }
                } else {
                    tracing::debug!(tx = %id, error = %e, "forked unit of work failed, dependent left incomplete");
                    e
                }
            })
        })?;
        manager.enlist_dependent_task(task);
        Ok(())
    }
}

impl Interceptor for TransactionInterceptor {
    fn intercept(&self, invocation: Invocation) -> Result<()> {
        let attribute = match self
            .meta
            .as_ref()
            .and_then(|meta| meta.as_transactional(invocation.method()))
        {
            Some(attribute) => *attribute,
            None => return invocation.proceed(),
        };

        let container = self
            .container
            .upgrade()
            .ok_or_else(|| Error::Disposed("container".into()))?;
        // Released when this call returns.
        let manager = container.resolve::<TransactionManager>()?;

        match manager.create_transaction(&attribute)? {
            None if attribute.mode == TransactionMode::Suppress => {
                tracing::debug!(method = invocation.method(), "suppressing ambient transaction");
                let _suppressed = manager.suppress();
                invocation.proceed()
            }
            None => invocation.proceed(),
            Some(created) if created.is_joined() => invocation.proceed(),
            Some(created) if created.should_fork() => self.fork_case(&manager, created, invocation),
            Some(created) => {
                let transaction = Arc::clone(created.transaction());
                drop(created);
                self.synchronized_case(&transaction, invocation)
            }
        }
    }
}

impl fmt::Debug for TransactionInterceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionInterceptor")
            .field("service", &self.service.service_type())
            .field("transactional", &self.meta.is_some())
            .finish()
    }
}
