//! Suppress mode hides the ambient transaction.

use std::sync::Arc;

use autotx::concurrency::platform;

use crate::*;

#[test]
fn test_suppressed_method_sees_no_transaction() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let inner_manager = Arc::clone(&manager);
    let inner_worker = Arc::clone(&worker);
    worker
        .requires(check(move || {
            assert!(inner_manager.current_transaction().is_some());
            assert!(platform::current().is_some());

            let suppressed_manager = Arc::clone(&inner_manager);
            inner_worker.suppressed(check(move || {
                assert!(suppressed_manager.current_transaction().is_none());
                assert!(suppressed_manager.current_top_transaction().is_none());
                assert!(platform::current().is_none());
                Ok(())
            }))?;

            // Visible again once the suppressed call returned.
            assert!(inner_manager.current_transaction().is_some());
            assert!(platform::current().is_some());
            Ok(())
        }))
        .unwrap();
}

#[test]
fn test_suppressed_without_ambient_runs_plainly() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let inner = Arc::clone(&manager);
    worker
        .suppressed(check(move || {
            assert!(inner.current_transaction().is_none());
            Ok(())
        }))
        .unwrap();
    assert_eq!(manager.count(), 0);
}

#[test]
fn test_transactional_call_inside_suppression_starts_new_root() {
    let container = create_container();
    let manager = manager(&container);
    let worker = worker(&container);

    let outer_manager = Arc::clone(&manager);
    let outer_worker = Arc::clone(&worker);
    worker
        .requires(check(move || {
            let outer = outer_manager.current_transaction().unwrap().local_identifier();
            let suppressed_manager = Arc::clone(&outer_manager);
            let suppressed_worker = Arc::clone(&outer_worker);
            outer_worker.suppressed(check(move || {
                let nested_manager = Arc::clone(&suppressed_manager);
                suppressed_worker.requires(check(move || {
                    let nested = nested_manager.current_transaction().unwrap();
                    assert_ne!(nested.local_identifier(), outer);
                    assert!(nested.local_identifier().is_root());
                    Ok(())
                }))
            }))
        }))
        .unwrap();
}
