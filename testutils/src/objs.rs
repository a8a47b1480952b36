use kube::discovery::ApiResource;
use kz_core::kanno;
use kz_core::prelude::*;
use rstest::fixture;
use serde_json::json;

use crate::constants::*;

/// A parent Deployment that has fully reconciled: its controller has
/// reported observedGeneration == generation and recorded itself in the
/// controllers annotation.
#[fixture]
pub fn test_parent() -> DynamicObject {
    let mut obj = DynamicObject::new(TEST_DEPLOYMENT, &ApiResource::from_gvk(&DEPL_GVK))
        .within(TEST_NAMESPACE)
        .data(json!({
            "spec": {"replicas": 3},
            "status": {"observedGeneration": TEST_PARENT_GENERATION},
        }));
    obj.metadata.uid = Some(TEST_PARENT_UID.into());
    obj.metadata.generation = Some(TEST_PARENT_GENERATION);
    obj.metadata.annotations = kanno!(CONTROLLERS_KEY => TEST_CONTROLLER_HASH);
    obj
}

/// A child ReplicaSet controlled by test_parent, last written by the
/// parent's controller.
#[fixture]
pub fn test_child() -> DynamicObject {
    let mut obj = DynamicObject::new(TEST_REPLICASET, &ApiResource::from_gvk(&RS_GVK))
        .within(TEST_NAMESPACE)
        .data(json!({"spec": {"replicas": 1}}));
    obj.metadata.uid = Some(TEST_CHILD_UID.into());
    obj.metadata.generation = Some(TEST_CHILD_GENERATION);
    obj.metadata.annotations = kanno!(UPDATERS_KEY => TEST_CONTROLLER_HASH);
    obj.metadata.owner_references = Some(vec![metav1::OwnerReference {
        api_version: "apps/v1".into(),
        kind: "Deployment".into(),
        name: TEST_DEPLOYMENT.into(),
        uid: TEST_PARENT_UID.into(),
        controller: Some(true),
        ..Default::default()
    }]);
    obj
}

/// A namespace object for selector-based mode override tests.
#[fixture]
pub fn test_namespace_obj() -> corev1::Namespace {
    corev1::Namespace {
        metadata: metav1::ObjectMeta {
            name: Some(TEST_NAMESPACE.into()),
            labels: kz_core::klabel!("env" => "prod"),
            ..Default::default()
        },
        ..Default::default()
    }
}
