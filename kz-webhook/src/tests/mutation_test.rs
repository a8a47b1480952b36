use std::time::Duration;

use assertables::*;
use clockabilly::mock::MockUtcClock;
use httpmock::Method::{
    PATCH,
    POST,
};
use kube::core::admission::{
    AdmissionResponse,
    AdmissionReview,
    Operation,
};
use rocket::serde::json::Json;
use serde_json::json;
use tokio::time::sleep;

use kz_core::kanno_insert;
use kz_core::prelude::*;
use kz_core::trace::Trace;

use super::helpers::*;
use super::*;
use crate::config::{
    BackendConfig,
    WebhookConfig,
};

// long enough for spawned fire-and-forget tasks to land on the mock servers
const ASYNC_SETTLE_MILLIS: u64 = 250;

fn enforce_config() -> WebhookConfig {
    let mut config = WebhookConfig::default();
    config.drift_detection.default_mode = Mode::Enforce;
    config
}

fn updated_child(child: &DynamicObject, replicas: i64) -> DynamicObject {
    let mut new = child.clone();
    new.data["spec"]["replicas"] = json!(replicas);
    new
}

async fn run_update(
    ctx: &WebhookContext,
    user: &str,
    old: &DynamicObject,
    new: &DynamicObject,
) -> AdmissionResponse {
    let req = build_admission_request(Operation::Update, user, Some(new.clone()), Some(old.clone()));
    admit(ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(1234567890))
        .await
        .unwrap()
}

#[rstest(tokio::test)]
async fn test_handler_invalid_review() {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, WebhookConfig::default());
    let adm_rev = AdmissionReview {
        types: Default::default(),
        request: None,
        response: None,
    };
    let resp = handler(rocket::State::from(&ctx), Json(adm_rev)).await;
    assert!(!resp.0.response.unwrap().allowed);
}

#[rstest(tokio::test)]
async fn test_connect_is_a_noop(test_child: DynamicObject) {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, WebhookConfig::default());

    let req = build_admission_request(Operation::Connect, TEST_USER, Some(test_child), None);
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();

    assert!(resp.allowed);
    assert_none!(resp.patch);
}

// scenario: the controller changes a child while the parent is stable, in
// log mode: allowed, but loudly
#[rstest(tokio::test)]
async fn test_drift_allowed_in_log_mode(test_parent: DynamicObject, test_child: DynamicObject) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, WebhookConfig::default());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;

    assert!(resp.allowed);
    let warnings = resp.warnings.unwrap();
    assert_eq!(warnings.len(), 1);
    assert_contains!(warnings[0], "drift");
    assert_contains!(warnings[0], "would be blocked in enforce mode");
}

// same scenario in enforce mode: denied
#[rstest(tokio::test)]
async fn test_drift_denied_in_enforce_mode(test_parent: DynamicObject, test_child: DynamicObject) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;

    assert!(!resp.allowed);
    assert_contains!(resp.result.message, "no approval");
    assert_none!(resp.patch);
}

// an approved drift goes through and consumes the once-approval
#[rstest(tokio::test)]
async fn test_approved_drift_consumes_approval(mut test_parent: DynamicObject, test_child: DynamicObject) {
    kanno_insert!(
        test_parent,
        APPROVALS_KEY => json!([{
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "name": TEST_REPLICASET,
            "generation": TEST_PARENT_GENERATION,
            "mode": "once",
        }]),
        PHASE_KEY => PHASE_INITIALIZED,
    );

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.handle(|when, then| {
        when.method(PATCH)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"));
        then.json_body(json!({"metadata": {"name": TEST_DEPLOYMENT}}));
    });
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(resp.allowed);
    assert_none!(resp.warnings);

    // the approvals prune-back runs off the admission path
    sleep(Duration::from_millis(ASYNC_SETTLE_MILLIS)).await;
    fake_apiserver.assert();
}

// freeze wins over any approval
#[rstest(tokio::test)]
async fn test_freeze_beats_approval(mut test_parent: DynamicObject, test_child: DynamicObject) {
    kanno_insert!(
        test_parent,
        APPROVALS_KEY => json!([{
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "name": TEST_REPLICASET,
            "mode": "always",
        }]),
        FREEZE_KEY => json!({"user": "the-freezer", "message": "release freeze"}),
        PHASE_KEY => PHASE_INITIALIZED,
    );

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;

    assert!(!resp.allowed);
    assert_contains!(resp.result.message, "frozen");
    assert_contains!(resp.result.message, "release freeze");
    assert_not_contains!(resp.result.message, "the-freezer");
}

// a freeze no longer applies once the parent is going away
#[rstest(tokio::test)]
async fn test_freeze_ignored_during_deletion(mut test_parent: DynamicObject, test_child: DynamicObject) {
    kanno_insert!(test_parent, FREEZE_KEY => "true");
    test_parent.metadata.deletion_timestamp = Some(metav1::Time(clockabilly::Utc::now()));

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(resp.allowed);
}

// scenario: somebody who isn't the controller changes the child; not drift,
// but the causal chain starts over with them at the origin
#[rstest(tokio::test)]
async fn test_user_change_starts_new_origin(test_parent: DynamicObject, test_child: DynamicObject) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let new = updated_child(&test_child, 3);
    let resp = run_update(&ctx, TEST_USER, &test_child, &new).await;

    assert!(resp.allowed);
    assert_none!(resp.warnings);

    let annotations = annotations_from_patch(&new, &resp);
    let trace = Trace::parse(annotations.get(TRACE_KEY).unwrap()).unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace.origin().unwrap().user, TEST_USER);

    // the updaters set grows, it never resets
    let updaters = updaters_of(&annotations);
    assert_eq!(updaters.to_string(), format!("{TEST_CONTROLLER_HASH},{TEST_USER_HASH}"));
}

// the controller reconciling a moving parent extends the parent's chain
#[rstest(tokio::test)]
async fn test_controller_extends_parent_trace(mut test_parent: DynamicObject, test_child: DynamicObject) {
    let parent_trace = json!([{
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "name": TEST_DEPLOYMENT,
        "generation": TEST_PARENT_GENERATION,
        "user": TEST_USER,
        "requestUid": "req-origin",
        "timestamp": 1234560000,
    }]);
    kanno_insert!(test_parent, TRACE_KEY => parent_trace);
    test_parent.data["status"]["observedGeneration"] = json!(TEST_PARENT_GENERATION - 1);

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let new = updated_child(&test_child, 3);
    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &new).await;
    assert!(resp.allowed);

    let annotations = annotations_from_patch(&new, &resp);
    let trace = Trace::parse(annotations.get(TRACE_KEY).unwrap()).unwrap();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace.origin().unwrap().user, TEST_USER);
    assert_eq!(trace.origin().unwrap().kind, "Deployment");
    assert_eq!(trace.last_hop().unwrap().user, TEST_CONTROLLER);
    assert_eq!(trace.last_hop().unwrap().kind, "ReplicaSet");
    assert_eq!(trace.last_hop().unwrap().request_uid, TEST_REQUEST_UID);
}

// repeated reconciliations keep the same origin
#[rstest(tokio::test)]
async fn test_origin_is_stable_across_updates(mut test_parent: DynamicObject, test_child: DynamicObject) {
    let parent_trace = json!([{
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "name": TEST_DEPLOYMENT,
        "user": TEST_USER,
        "requestUid": "req-origin",
        "timestamp": 1234560000,
    }]);
    kanno_insert!(test_parent, TRACE_KEY => parent_trace);
    test_parent.data["status"]["observedGeneration"] = json!(TEST_PARENT_GENERATION - 1);

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    let mut old = test_child.clone();
    let mut origin = None;
    for replicas in 2..5 {
        let new = updated_child(&old, replicas);
        let resp = run_update(&ctx, TEST_CONTROLLER, &old, &new).await;
        assert!(resp.allowed);

        let annotations = annotations_from_patch(&new, &resp);
        let trace = Trace::parse(annotations.get(TRACE_KEY).unwrap()).unwrap();
        match &origin {
            None => origin = Some(trace.origin().unwrap().clone()),
            Some(o) => assert_eq!(trace.origin().unwrap(), o),
        }

        old = new;
        *old.annotations_mut() = annotations;
    }
}

// metadata-only updates leave every reserved annotation alone, even if the
// client tampered with them
#[rstest(tokio::test)]
async fn test_no_spec_change_preserves_annotations(test_child: DynamicObject) {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, enforce_config());

    let mut new = test_child.clone();
    kanno_insert!(new, UPDATERS_KEY => "feeee", "unrelated.io/foo" => "bar");

    let resp = run_update(&ctx, TEST_USER, &test_child, &new).await;
    assert!(resp.allowed);
    assert_none!(resp.warnings);

    let annotations = annotations_from_patch(&new, &resp);
    assert_eq!(annotations.get(UPDATERS_KEY).map(String::as_str), Some(TEST_CONTROLLER_HASH));
    assert_eq!(annotations.get("unrelated.io/foo").map(String::as_str), Some("bar"));
}

// status subresource updates record the actor as a controller and nothing else
#[rstest(tokio::test)]
async fn test_status_update_records_controller(test_child: DynamicObject) {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, enforce_config());

    let mut new = test_child.clone();
    new.data["status"] = json!({"readyReplicas": 1});

    let mut req = build_admission_request(Operation::Update, TEST_OTHER_USER, Some(new.clone()), Some(test_child.clone()));
    req.sub_resource = Some("status".into());
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();

    assert!(resp.allowed);
    let annotations = annotations_from_patch(&new, &resp);
    assert_eq!(annotations.get(CONTROLLERS_KEY).map(String::as_str), Some(TEST_OTHER_USER_HASH));
    assert_eq!(annotations.get(UPDATERS_KEY).map(String::as_str), Some(TEST_CONTROLLER_HASH));
    assert_none!(annotations.get(TRACE_KEY));
}

// reserved annotations on a CREATE are suspect and get recomputed
#[rstest(tokio::test)]
async fn test_create_strips_inherited_annotations(mut test_parent: DynamicObject, mut test_child: DynamicObject) {
    test_parent.data["status"]["observedGeneration"] = json!(TEST_PARENT_GENERATION - 1);

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();
    let ctx = build_webhook_context(client, enforce_config());

    // the controller copied causality metadata over from the parent
    kanno_insert!(
        test_child,
        CONTROLLERS_KEY => TEST_CONTROLLER_HASH,
        PHASE_KEY => PHASE_INITIALIZED,
        APPROVALS_KEY => "[]",
    );

    let req = build_admission_request(Operation::Create, TEST_CONTROLLER, Some(test_child.clone()), None);
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();
    assert!(resp.allowed);

    let annotations = annotations_from_patch(&test_child, &resp);
    assert_eq!(annotations.get(UPDATERS_KEY).map(String::as_str), Some(TEST_CONTROLLER_HASH));
    assert_none!(annotations.get(CONTROLLERS_KEY));
    assert_none!(annotations.get(PHASE_KEY));
    assert_none!(annotations.get(APPROVALS_KEY));

    let trace = Trace::parse(annotations.get(TRACE_KEY).unwrap()).unwrap();
    assert_eq!(trace.len(), 1);
}

// dry runs get the full verdict and patch, but leave nothing behind: no
// callbacks, no phase latch, no approval pruning
#[rstest(tokio::test)]
async fn test_dry_run_skips_side_effects(mut test_parent: DynamicObject, test_child: DynamicObject) {
    // a drifting update that would normally latch the parent's phase,
    // consume the once-approval, and emit a Resolved callback
    kanno_insert!(
        test_parent,
        APPROVALS_KEY => json!([{
            "apiVersion": "apps/v1",
            "kind": "ReplicaSet",
            "name": TEST_REPLICASET,
            "generation": TEST_PARENT_GENERATION,
            "mode": "once",
        }]),
    );

    let backend = httpmock::MockServer::start();
    let report_mock = backend.mock(|when, then| {
        when.method(POST).path("/drift");
        then.json_body(json!({"acknowledged": true}));
    });

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    // any write to the parent (latch or prune) would land here
    fake_apiserver.handle(|when, then| {
        when.method(PATCH)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"));
        then.json_body(json!({"metadata": {"name": TEST_DEPLOYMENT}}));
    });
    fake_apiserver.build();

    let mut config = enforce_config();
    config.backends = vec![BackendConfig {
        url: backend.url("/drift"),
        ca_file: None,
        timeout: 2,
        retry_count: 0,
        retry_interval: 1,
    }];
    let ctx = build_webhook_context(client, config);

    let new = updated_child(&test_child, 3);
    let mut req = build_admission_request(Operation::Update, TEST_CONTROLLER, Some(new.clone()), Some(test_child.clone()));
    req.dry_run = true;
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();

    // the verdict and patch are computed as usual
    assert!(resp.allowed);
    assert_some!(resp.patch);

    sleep(Duration::from_millis(ASYNC_SETTLE_MILLIS)).await;
    fake_apiserver.assert_hits(2, 0);
    assert_eq!(report_mock.hits(), 0);
}

// deletes are observed but never patched
#[rstest(tokio::test)]
async fn test_delete_emits_no_patch(test_child: DynamicObject) {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, enforce_config());

    let req = build_admission_request(Operation::Delete, TEST_USER, None, Some(test_child));
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();

    assert!(resp.allowed);
    assert_none!(resp.patch);
}

// a root object never drifts, whoever touches it
#[rstest(tokio::test)]
async fn test_root_object_never_drifts(test_parent: DynamicObject) {
    let (_, client) = make_fake_apiserver();
    let ctx = build_webhook_context(client, enforce_config());

    let mut new = test_parent.clone();
    new.data["spec"]["replicas"] = json!(42);

    let mut req = build_admission_request(Operation::Update, TEST_USER, Some(new.clone()), Some(test_parent.clone()));
    req.name = TEST_DEPLOYMENT.into();
    let resp = admit(&ctx, AdmissionResponse::from(&req), &req, MockUtcClock::boxed(0)).await.unwrap();

    assert!(resp.allowed);
    assert_none!(resp.warnings);
}

// the first time a parent is seen fully reconciled, the webhook latches the
// initialized phase onto it out-of-band
#[rstest(tokio::test)]
async fn test_stable_parent_phase_is_latched(test_parent: DynamicObject, test_child: DynamicObject) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.handle(|when, then| {
        when.method(PATCH)
            .path(format!("/apis/apps/v1/namespaces/{TEST_NAMESPACE}/deployments/{TEST_DEPLOYMENT}"))
            .json_body_includes(format!(r#"{{"metadata": {{"annotations": {{"{PHASE_KEY}": "{PHASE_INITIALIZED}"}}}}}}"#));
        then.json_body(json!({"metadata": {"name": TEST_DEPLOYMENT}}));
    });
    fake_apiserver.build();
    let ctx = build_webhook_context(client, WebhookConfig::default());

    // alice's update isn't drift, but the parent was observed stable
    let resp = run_update(&ctx, TEST_USER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(resp.allowed);

    sleep(Duration::from_millis(ASYNC_SETTLE_MILLIS)).await;
    fake_apiserver.assert();
}

// the namespace's mode annotation applies when the object has none of its own
#[rstest(tokio::test)]
async fn test_namespace_mode_annotation(test_parent: DynamicObject, test_child: DynamicObject) {
    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.handle_namespace_get(json!({MODE_KEY: "enforce"}));
    fake_apiserver.build();

    // config says log, the namespace says enforce
    let ctx = build_webhook_context(client, WebhookConfig::default());

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(!resp.allowed);
}

#[rstest(tokio::test)]
async fn test_detected_callback_is_emitted(test_parent: DynamicObject, test_child: DynamicObject) {
    let backend = httpmock::MockServer::start();
    let report_mock = backend.mock(|when, then| {
        when.method(POST).path("/drift");
        then.json_body(json!({"acknowledged": true}));
    });

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();

    let mut config = WebhookConfig::default();
    config.backends = vec![BackendConfig {
        url: backend.url("/drift"),
        ca_file: None,
        timeout: 2,
        retry_count: 0,
        retry_interval: 1,
    }];
    let ctx = build_webhook_context(client, config);

    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(resp.allowed);

    sleep(Duration::from_millis(ASYNC_SETTLE_MILLIS)).await;
    report_mock.assert();
}

#[rstest(tokio::test)]
async fn test_snooze_suppresses_callbacks(mut test_parent: DynamicObject, test_child: DynamicObject) {
    kanno_insert!(test_parent, SNOOZE_KEY => "2100-01-01T00:00:00Z");

    let backend = httpmock::MockServer::start();
    let report_mock = backend.mock(|when, then| {
        when.method(POST).path("/drift");
        then.json_body(json!({"acknowledged": true}));
    });

    let (mut fake_apiserver, client) = make_fake_apiserver();
    fake_apiserver.handle_apps_discovery().handle_obj_get(&test_parent);
    fake_apiserver.build();

    let mut config = WebhookConfig::default();
    config.backends = vec![BackendConfig {
        url: backend.url("/drift"),
        ca_file: None,
        timeout: 2,
        retry_count: 0,
        retry_interval: 1,
    }];
    let ctx = build_webhook_context(client, config);

    // verdict is unchanged by the snooze (log mode: allowed with warning)
    let resp = run_update(&ctx, TEST_CONTROLLER, &test_child, &updated_child(&test_child, 3)).await;
    assert!(resp.allowed);
    assert_some!(resp.warnings);

    sleep(Duration::from_millis(ASYNC_SETTLE_MILLIS)).await;
    assert_eq!(report_mock.hits(), 0);
}
