//! Per-transaction and per-top-transaction lifetimes.

use std::sync::Arc;

use autotx::container::Reuse;
use autotx::facility::{AutoTxReuse, PerTopTransactionScopeContext, PerTransactionScopeContext};
use parking_lot::Mutex;

use crate::*;

fn container_with_unit_of_work() -> Container {
    let container = create_container();
    register_probe(&container, "uow", AutoTxReuse::per_transaction());
    container
}

fn unit_of_work(container: &Container) -> Arc<Probe> {
    container.resolve_named::<Probe>("uow").unwrap()
}

#[test]
fn test_same_instance_within_transaction_and_new_one_after() {
    let container = container_with_unit_of_work();
    let worker = worker(&container);
    let first: Arc<Mutex<Vec<Arc<Probe>>>> = Arc::new(Mutex::new(Vec::new()));

    // A.Method -> A.Inner, both resolving the unit of work.
    let c = container.clone();
    let w = Arc::clone(&worker);
    let slot = Arc::clone(&first);
    worker
        .requires(check(move || {
            slot.lock().push(unit_of_work(&c));
            let inner_container = c.clone();
            let inner_slot = Arc::clone(&slot);
            w.requires(check(move || {
                inner_slot.lock().push(unit_of_work(&inner_container));
                Ok(())
            }))
        }))
        .unwrap();

    let first = std::mem::take(&mut *first.lock());
    assert_eq!(first.len(), 2);
    assert!(Arc::ptr_eq(&first[0], &first[1]));
    assert!(first[0].is_disposed());

    let second: Arc<Mutex<Option<Arc<Probe>>>> = Arc::new(Mutex::new(None));
    let c = container.clone();
    let slot = Arc::clone(&second);
    worker
        .requires(check(move || {
            *slot.lock() = Some(unit_of_work(&c));
            Ok(())
        }))
        .unwrap();
    let second = second.lock().take().unwrap();
    assert_ne!(second.id, first[0].id);
}

#[test]
fn test_resolution_outside_transaction_is_missing_transaction() {
    let container = container_with_unit_of_work();
    let err = container.resolve_named::<Probe>("uow").unwrap_err();
    assert!(err.is_missing_transaction(), "{}", err);
    assert!(err.to_string().contains("transaction"));
}

#[test]
fn test_failed_transaction_still_disposes_scope() {
    let container = container_with_unit_of_work();
    let worker = worker(&container);
    let seen: Arc<Mutex<Option<Arc<Probe>>>> = Arc::new(Mutex::new(None));

    let c = container.clone();
    let slot = Arc::clone(&seen);
    let result = worker.requires(check(move || {
        *slot.lock() = Some(unit_of_work(&c));
        Err(autotx::Error::failed("boom"))
    }));
    assert!(result.is_err());

    let probe = seen.lock().take().unwrap();
    assert!(probe.is_disposed());
    let context = container.resolve::<PerTransactionScopeContext>().unwrap();
    assert_eq!(context.open_scopes(), 0);
}

#[test]
fn test_requires_new_gets_own_instance_but_shares_top() {
    let container = container_with_unit_of_work();
    register_probe(&container, "top", AutoTxReuse::per_top_transaction());
    let worker = worker(&container);
    let seen: Arc<Mutex<Vec<(Arc<Probe>, Arc<Probe>)>>> = Arc::new(Mutex::new(Vec::new()));

    let observe = |c: &Container| {
        (
            unit_of_work(c),
            c.resolve_named::<Probe>("top").unwrap(),
        )
    };

    let c = container.clone();
    let w = Arc::clone(&worker);
    let slot = Arc::clone(&seen);
    worker
        .requires(check(move || {
            slot.lock().push(observe(&c));
            let inner_container = c.clone();
            let inner_slot = Arc::clone(&slot);
            w.requires_new(check(move || {
                inner_slot.lock().push(observe(&inner_container));
                Ok(())
            }))
        }))
        .unwrap();

    let seen = seen.lock();
    assert!(!Arc::ptr_eq(&seen[0].0, &seen[1].0));
    // The new root sits above the outer one on the same stack.
    assert!(Arc::ptr_eq(&seen[0].1, &seen[1].1));
}

#[test]
fn test_transient_component_is_never_shared() {
    let container = create_container();
    register_probe(&container, "transient", Reuse::Transient);
    let worker = worker(&container);

    let c = container.clone();
    worker
        .requires(check(move || {
            let a = c.resolve_named::<Probe>("transient").unwrap();
            let b = c.resolve_named::<Probe>("transient").unwrap();
            assert_ne!(a.id, b.id);
            Ok(())
        }))
        .unwrap();
}

#[test]
fn test_container_dispose_tears_down_contexts() {
    let container = container_with_unit_of_work();
    let per_tx = container.resolve::<PerTransactionScopeContext>().unwrap();
    let per_top = container.resolve::<PerTopTransactionScopeContext>().unwrap();
    assert!(!per_tx.is_disposed());

    container.dispose();
    assert!(per_tx.is_disposed());
    assert!(per_top.is_disposed());

    // Repeated disposal only logs.
    per_tx.dispose();
    assert!(per_tx.is_disposed());
}
