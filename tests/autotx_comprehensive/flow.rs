//! Flow-local activity tracking.

use autotx::concurrency::FlowLocalActivityManager;
use autotx::facility::{ActivityManagerKind, AutoTxOptions};

use crate::*;

fn flow_container() -> Container {
    init_tracing();
    let container = Container::new();
    container
        .add_auto_tx_with(AutoTxOptions::default().activity_manager(ActivityManagerKind::FlowLocal))
        .unwrap();
    register_worker(&container).unwrap();
    container
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_flows_see_their_own_transaction() {
    let container = flow_container();
    let tm = manager(&container);

    let flows: Vec<_> = (0..4)
        .map(|_| {
            let tm = Arc::clone(&tm);
            tokio::spawn(FlowLocalActivityManager::scope(async move {
                let created = tm
                    .create_transaction(&TransactionAttribute::requires())
                    .unwrap()
                    .unwrap();
                assert!(!created.is_joined());
                let id = created.transaction().local_identifier();

                tokio::task::yield_now().await;

                // Possibly resumed on another worker thread.
                let current = tm.current_transaction().unwrap();
                assert_eq!(current.local_identifier(), id);
                assert_eq!(tm.count(), 1);

                created.transaction().complete().unwrap();
                created.transaction().dispose();
                assert!(tm.current_transaction().is_none());
                id
            }))
        })
        .collect();

    let mut ids = Vec::new();
    for flow in flows {
        ids.push(flow.await.unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);
}

#[test]
fn test_intercepted_call_inside_sync_flow() {
    let container = flow_container();
    let tm = manager(&container);
    let worker = worker(&container);

    FlowLocalActivityManager::sync_scope(|| {
        let observed = Arc::clone(&tm);
        worker
            .requires(check(move || {
                assert!(FlowLocalActivityManager::in_flow());
                assert!(observed.current_transaction().is_some());
                Ok(())
            }))
            .unwrap();
        assert!(tm.current_transaction().is_none());
    });
}

#[test]
fn test_outside_flow_falls_back_to_thread() {
    let container = flow_container();
    let tm = manager(&container);
    assert!(!FlowLocalActivityManager::in_flow());

    let observed = Arc::clone(&tm);
    worker(&container)
        .requires(check(move || {
            assert_eq!(observed.count(), 1);
            Ok(())
        }))
        .unwrap();
    assert_eq!(tm.count(), 0);
}
