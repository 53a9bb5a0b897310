//! Registration-time inspection.

use autotx::container::Reuse;
use autotx::core::TypeInfo;

use crate::*;

/// Transactional methods a proxy cannot reach.
pub struct SealedWorker;

impl Reflect for SealedWorker {
    fn methods() -> Vec<MethodDescriptor> {
        vec![
            MethodDescriptor::sealed("save").transactional(TransactionAttribute::requires()),
            MethodDescriptor::sealed("load"),
            MethodDescriptor::sealed("purge").transactional(TransactionAttribute::requires_new()),
        ]
    }
}

/// Nothing transactional.
pub struct PlainWorker;

impl Reflect for PlainWorker {
    fn methods() -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::overridable("requires"), MethodDescriptor::sealed("helper")]
    }
}

fn sealed_component() -> Component<dyn Worker> {
    Component::<dyn Worker>::new(|_| Ok(Arc::new(WorkerImpl::default()) as Arc<dyn Worker>))
        .named("sealed")
        .implemented_by::<SealedWorker>()
        .proxied_by::<WorkerProxy, _>(|target, interceptor| {
            Arc::new(WorkerProxy { target, interceptor }) as Arc<dyn Worker>
        })
}

#[test]
fn test_sealed_methods_rejected_after_facility() {
    let container = create_container();
    let err = container.register(sealed_component()).unwrap_err();

    assert!(err.is_configuration());
    let message = err.to_string();
    assert!(message.contains("save, purge"), "{}", message);
    assert!(!message.contains("load"), "{}", message);
    assert!(message.contains(TypeInfo::of::<SealedWorker>().name()), "{}", message);

    // The failed registration is withdrawn.
    assert!(!container.is_registered_named::<dyn Worker>("sealed"));
}

#[test]
fn test_sealed_methods_rejected_when_facility_added_later() {
    init_tracing();
    let container = Container::new();
    container.register(sealed_component()).unwrap();

    let before = container.registrations().len();

    let err = container.add_auto_tx().unwrap_err();
    assert!(err.is_configuration(), "{}", err);

    // Nothing of the engine was registered.
    assert_eq!(container.registrations().len(), before);
    assert!(!container.is_registered::<TransactionManager>());
    assert!(!container.is_registered::<autotx::facility::AutoTxOptions>());
    assert!(!container.is_registered::<autotx::facility::AutoTxFacility>());
}

#[test]
fn test_components_registered_before_facility_are_intercepted() {
    init_tracing();
    let container = Container::new();
    register_worker(&container).unwrap();
    container.add_auto_tx().unwrap();

    let registration = container
        .registrations()
        .into_iter()
        .find(|r| r.service_type() == TypeInfo::of::<dyn Worker>() && r.key().is_none())
        .unwrap();
    assert!(registration.is_intercepted());

    let tm = manager(&container);
    let observed = Arc::clone(&tm);
    worker(&container)
        .requires(check(move || {
            assert!(observed.current_transaction().is_some());
            Ok(())
        }))
        .unwrap();
}

#[test]
fn test_transactional_component_without_proxy_rejected() {
    let container = create_container();
    let err = container
        .register(
            Component::<dyn Worker>::new(|_| Ok(Arc::new(WorkerImpl::default()) as Arc<dyn Worker>))
                .named("unproxied")
                .implemented_by::<WorkerImpl>(),
        )
        .unwrap_err();
    assert!(err.is_configuration());
    assert!(err.to_string().contains("no proxy"), "{}", err);
    assert!(!container.is_registered_named::<dyn Worker>("unproxied"));
}

#[test]
fn test_non_transactional_component_left_alone() {
    let container = create_container();
    let registration = container
        .register(
            Component::<dyn Worker>::new(|_| Ok(Arc::new(WorkerImpl::default()) as Arc<dyn Worker>))
                .named("plain")
                .implemented_by::<PlainWorker>()
                .reuse(Reuse::Singleton),
        )
        .unwrap();
    assert!(!registration.is_intercepted());

    let tm = manager(&container);
    let observed = Arc::clone(&tm);
    container
        .resolve_named::<dyn Worker>("plain")
        .unwrap()
        .requires(check(move || {
            assert!(observed.current_transaction().is_none());
            Ok(())
        }))
        .unwrap();
}

#[test]
fn test_components_without_implementation_skipped() {
    let container = create_container();
    let registration = container
        .register(Component::<String>::new(|_| Ok(Arc::new("value".to_string()))))
        .unwrap();
    assert!(!registration.is_intercepted());
    assert_eq!(*container.resolve::<String>().unwrap(), "value");
}
