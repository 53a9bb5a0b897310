//! Request information injected into components.

use autotx::core::TypeInfo;
use autotx::facility::ParentServiceRequestInfo;

use crate::*;

#[test]
fn test_request_info_sees_through_proxy() {
    let container = create_container();
    let probed = container.resolve_named::<dyn Worker>("probed").unwrap();
    let info = probed.request_info().unwrap();

    assert_eq!(info.service_type(), TypeInfo::of::<dyn Worker>());
    assert_eq!(info.key(), Some("probed"));
    assert_eq!(info.request_implementation_type(), Some(TypeInfo::of::<WorkerProxy>()));
    assert_eq!(info.implementation_type(), Some(TypeInfo::of::<WorkerImpl>()));
    assert_eq!(
        info.implementation_descriptor().map(|d| d.type_info()),
        Some(TypeInfo::of::<WorkerImpl>())
    );
}

#[test]
fn test_request_info_needs_a_dependent() {
    let container = create_container();
    let err = container.resolve::<ServiceRequestInfo>().unwrap_err();
    assert!(err.to_string().contains("another component"), "{}", err);
}

/// Logger that records who it was injected into.
pub struct Logger {
    owner: Option<TypeInfo>,
}

/// Component depending on [`Logger`].
pub struct Consumer {
    logger: Arc<Logger>,
}

impl Reflect for Consumer {
    fn methods() -> Vec<MethodDescriptor> {
        vec![MethodDescriptor::overridable("run")]
    }
}

#[test]
fn test_parent_request_info_names_the_consumer() {
    let container = create_container();
    container
        .register(Component::<Logger>::new(|request| {
            let parent = request.resolve::<ParentServiceRequestInfo>()?;
            Ok(Arc::new(Logger {
                owner: parent.implementation_type(),
            }))
        }))
        .unwrap();
    container
        .register(
            Component::<Consumer>::new(|request| {
                Ok(Arc::new(Consumer {
                    logger: request.resolve()?,
                }))
            })
            .implemented_by::<Consumer>(),
        )
        .unwrap();

    let consumer = container.resolve::<Consumer>().unwrap();
    assert_eq!(consumer.logger.owner, Some(TypeInfo::of::<Consumer>()));

    // Resolved directly, nobody required the logger.
    let logger = container.resolve::<Logger>().unwrap();
    assert_eq!(logger.owner, None);
}
