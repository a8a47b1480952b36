use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use kz_core::actor::ActorSet;
use kz_core::k8s::ApiSet;
use kz_core::prelude::*;

use super::*;
use crate::callback::CallbackSender;
use crate::config::WebhookConfig;
use crate::drift::DriftResult;

pub fn build_webhook_context(client: kube::Client, config: WebhookConfig) -> WebhookContext {
    let callbacks = Arc::new(CallbackSender::new(&config.backends).unwrap());
    WebhookContext {
        config: Arc::new(config),
        client: client.clone(),
        apiset: Arc::new(Mutex::new(ApiSet::new(client))),
        callbacks,
    }
}

/// A drift result as detect_drift would produce for the standard test
/// parent/child pair, without needing an apiserver.
pub fn drift_result_for(parent: &DynamicObject, drift_detected: bool) -> DriftResult {
    let state = ParentState::from_obj(parent).unwrap();
    let lifecycle = classify_lifecycle(&state);
    DriftResult {
        drift_detected,
        lifecycle: Some(lifecycle),
        parent: Some(state),
        identity: ControllerIdentity::Controller,
        reason: if drift_detected {
            DriftReason::ControllerOnSettledParent(lifecycle)
        } else {
            DriftReason::ExpectedLifecycle(lifecycle)
        },
        allowed_hint: !drift_detected,
    }
}

pub fn child_ref() -> ObjectRef {
    ObjectRef {
        api_version: "apps/v1".into(),
        kind: "ReplicaSet".into(),
        namespace: Some(TEST_NAMESPACE.into()),
        name: TEST_REPLICASET.into(),
        uid: Some(TEST_CHILD_UID.into()),
    }
}

pub fn annotations_from_patch(obj: &DynamicObject, resp: &kube::core::admission::AdmissionResponse) -> BTreeMap<String, String> {
    let mut value = serde_json::to_value(obj).unwrap();
    if let Some(raw) = &resp.patch {
        let patch: json_patch_ext::prelude::Patch = serde_json::from_slice(raw).unwrap();
        for op in patch.0 {
            json_patch_ext::patch_ext(&mut value, op).unwrap();
        }
    }
    serde_json::from_value(value["metadata"]["annotations"].clone()).unwrap_or_default()
}

pub fn updaters_of(annotations: &BTreeMap<String, String>) -> ActorSet {
    ActorSet::from_annotations(annotations, UPDATERS_KEY)
}
