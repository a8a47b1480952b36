use k8s_openapi::api::authentication::v1::UserInfo;
use kube::api::{
    DynamicObject,
    TypeMeta,
};
use kube::core::admission::{
    AdmissionRequest,
    AdmissionReview,
    Operation,
};
use kube::core::{
    GroupVersionKind,
    GroupVersionResource,
};

use crate::constants::*;

/// An admission request for the test child, in the shape the apiserver would
/// send it.  Tests mutate the returned struct for the less common shapes
/// (status subresource, DELETE, anonymous users, ...).
pub fn build_admission_request(
    operation: Operation,
    user: &str,
    object: Option<DynamicObject>,
    old_object: Option<DynamicObject>,
) -> AdmissionRequest<DynamicObject> {
    let gvk = GroupVersionKind::gvk("apps", "v1", "ReplicaSet");
    let gvr = GroupVersionResource::gvr("apps", "v1", "replicasets");
    AdmissionRequest {
        types: TypeMeta {
            api_version: "admission.k8s.io/v1".into(),
            kind: "AdmissionReview".into(),
        },
        uid: TEST_REQUEST_UID.into(),
        kind: gvk,
        resource: gvr,
        sub_resource: None,
        request_kind: None,
        request_resource: None,
        request_sub_resource: None,
        name: TEST_REPLICASET.into(),
        namespace: Some(TEST_NAMESPACE.into()),
        operation,
        user_info: UserInfo {
            username: Some(user.into()),
            uid: Some(format!("uid-{user}")),
            groups: Some(vec!["system:authenticated".into()]),
            ..Default::default()
        },
        object,
        old_object,
        dry_run: false,
        options: None,
    }
}

pub fn into_review(req: AdmissionRequest<DynamicObject>) -> AdmissionReview<DynamicObject> {
    AdmissionReview {
        types: req.types.clone(),
        request: Some(req),
        response: None,
    }
}
