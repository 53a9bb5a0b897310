//! Join, requires-new, completion and rollback of synchronized calls.

use std::sync::Arc;

use autotx::concurrency::TransactionStatus;
use autotx::core::{Error, TransactionState};
use parking_lot::Mutex;

use crate::*;

#[test]
fn test_nested_requires_joins_outer_transaction() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let outer_manager = Arc::clone(&manager);
    let inner_worker = Arc::clone(&worker);
    worker
        .requires(check(move || {
            let outer = outer_manager.current_transaction().unwrap().local_identifier();
            let inner_manager = Arc::clone(&outer_manager);
            inner_worker.requires(check(move || {
                assert_eq!(
                    inner_manager.current_transaction().unwrap().local_identifier(),
                    outer
                );
                assert_eq!(inner_manager.count(), 1);
                Ok(())
            }))?;
            assert_eq!(outer_manager.count(), 1);
            Ok(())
        }))
        .unwrap();
    assert_eq!(manager.count(), 0);
    assert!(manager.current_transaction().is_none());
}

#[test]
fn test_requires_new_creates_new_root() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let outer_manager = Arc::clone(&manager);
    let inner_worker = Arc::clone(&worker);
    worker
        .requires(check(move || {
            let outer = outer_manager.current_transaction().unwrap().local_identifier();
            let inner_manager = Arc::clone(&outer_manager);
            inner_worker.requires_new(check(move || {
                let inner = inner_manager.current_transaction().unwrap().local_identifier();
                assert_ne!(inner, outer);
                assert_eq!(inner_manager.count(), 2);
                assert_eq!(
                    inner_manager.current_top_transaction().unwrap().local_identifier(),
                    outer
                );
                Ok(())
            }))?;
            assert_eq!(
                outer_manager.current_transaction().unwrap().local_identifier(),
                outer
            );
            Ok(())
        }))
        .unwrap();
}

fn capture_outcome(manager: &Arc<TransactionManager>, outcome: &Arc<Mutex<Option<TransactionStatus>>>) {
    let tx = manager.current_transaction().unwrap();
    let outcome = Arc::clone(outcome);
    tx.on_completed(move |status| *outcome.lock() = Some(status));
}

#[test]
fn test_successful_call_commits() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);
    let outcome = Arc::new(Mutex::new(None));

    let inner = Arc::clone(&manager);
    let captured = Arc::clone(&outcome);
    worker
        .requires(check(move || {
            capture_outcome(&inner, &captured);
            Ok(())
        }))
        .unwrap();
    assert_eq!(*outcome.lock(), Some(TransactionStatus::Committed));
}

#[test]
fn test_failing_call_rolls_back_and_error_is_unchanged() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);
    let outcome = Arc::new(Mutex::new(None));

    let inner = Arc::clone(&manager);
    let captured = Arc::clone(&outcome);
    let err = worker
        .requires(check(move || {
            capture_outcome(&inner, &captured);
            Err(Error::failed("saving entity failed"))
        }))
        .unwrap_err();

    assert!(err.is_method());
    assert_eq!(err.to_string(), "saving entity failed");
    assert_eq!(*outcome.lock(), Some(TransactionStatus::Aborted));
    assert_eq!(manager.count(), 0);
}

#[test]
fn test_method_completing_its_own_transaction_is_not_completed_twice() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);
    let seen = Arc::new(Mutex::new(None));

    let inner = Arc::clone(&manager);
    let captured = Arc::clone(&seen);
    worker
        .requires(check(move || {
            let tx = inner.current_transaction().unwrap();
            tx.complete()?;
            *captured.lock() = Some(Arc::clone(&tx));
            Ok(())
        }))
        .unwrap();

    let tx = seen.lock().take().unwrap();
    assert_eq!(tx.state(), TransactionState::Disposed);
}

#[test]
fn test_method_rolling_back_its_transaction_returns_ok() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);
    let outcome = Arc::new(Mutex::new(None));

    let inner = Arc::clone(&manager);
    let captured = Arc::clone(&outcome);
    worker
        .requires(check(move || {
            capture_outcome(&inner, &captured);
            inner.current_transaction().unwrap().rollback()
        }))
        .unwrap();
    assert_eq!(*outcome.lock(), Some(TransactionStatus::Aborted));
}

#[test]
fn test_untracked_method_passes_through() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let inner = Arc::clone(&manager);
    worker
        .untracked(check(move || {
            assert!(inner.current_transaction().is_none());
            Ok(())
        }))
        .unwrap();
}

#[test]
fn test_untracked_method_inside_transaction_keeps_it() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let outer_manager = Arc::clone(&manager);
    let inner_worker = Arc::clone(&worker);
    worker
        .requires(check(move || {
            let outer = outer_manager.current_transaction().unwrap().local_identifier();
            let inner_manager = Arc::clone(&outer_manager);
            inner_worker.untracked(check(move || {
                assert_eq!(
                    inner_manager.current_transaction().unwrap().local_identifier(),
                    outer
                );
                Ok(())
            }))
        }))
        .unwrap();
}
