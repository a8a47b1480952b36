use std::collections::BTreeMap;
use std::sync::Arc;

use clockabilly::{
    Clockable,
    UtcClock,
};
use kube::api::{
    Patch,
    PatchParams,
};
use kube::core::admission::{
    AdmissionRequest,
    AdmissionResponse,
    AdmissionReview,
    Operation,
};
use rocket::serde::json::Json;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::*;

use kz_core::actor::{
    ActorSet,
    actor_id,
    hash_actor,
};
use kz_core::controls::is_snoozed;
use kz_core::k8s::ApiSet;
use kz_core::prelude::*;
use kz_core::report::{
    ChildReport,
    DriftPhase,
    DriftReport,
    DriftReportSpec,
    ParentReport,
    RequestContext,
    report_id,
};
use kz_core::trace::{
    Hop,
    Trace,
    extract_trace_labels,
};

use crate::WebhookContext;
use crate::annotations::{
    ChangeKind,
    ComputedCausality,
    annotation_patch,
    compute_annotations,
    strip_reserved,
};
use crate::drift::{
    ControllerIdentity,
    detect_drift,
};
use crate::mode::resolve_mode;
use crate::parent::{
    LifecyclePhase,
    ParentState,
    record_initialized,
};
use crate::policy::{
    Verdict,
    evaluate_policy,
};

#[rocket::post("/", data = "<body>")]
#[instrument(parent=None, skip_all)]
pub async fn handler(
    ctx: &rocket::State<WebhookContext>,
    body: Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.into_inner().try_into() {
        Ok(r) => r,
        Err(err) => {
            error!("could not parse admission request: {err:?}");
            let resp = AdmissionResponse::invalid(err);
            return Json(resp.into_review());
        },
    };

    let resp = admit(ctx, AdmissionResponse::from(&req), &req, UtcClock::boxed())
        .await
        .unwrap_or_else(|err| {
            // The webhook must never become the failure mode of the control
            // plane: anything that isn't a policy denial turns into an allow
            error!("error processing admission request, allowing through: {err:?}");
            AdmissionResponse::from(&req)
        });

    Json(resp.into_review())
}

pub async fn admit(
    ctx: &WebhookContext,
    resp: AdmissionResponse,
    req: &AdmissionRequest<DynamicObject>,
    clock: Box<dyn Clockable + Send>,
) -> anyhow::Result<AdmissionResponse> {
    if !matches!(req.operation, Operation::Create | Operation::Update | Operation::Delete) {
        return Ok(resp);
    }

    let user = actor_id(&req.user_info, &req.uid);
    let user_hash = hash_actor(&user);

    // Status writes never touch the causal chain; the actor just joins the
    // controllers set
    if req.sub_resource.as_deref() == Some("status") && req.operation == Operation::Update {
        let (Some(obj), Some(old)) = (&req.object, &req.old_object) else {
            return Ok(resp);
        };
        let desired = compute_annotations(ChangeKind::StatusUpdate, old.annotations(), obj.annotations(), None, &user_hash);
        return with_annotation_patch(resp, obj, &desired);
    }

    if req.operation == Operation::Delete {
        if let Some(old) = &req.old_object {
            let updaters = ActorSet::from_annotations(old.annotations(), UPDATERS_KEY).with(&user_hash);
            let chain_len = Trace::from_annotations(old.annotations()).map(|t| t.len()).unwrap_or(0);
            info!(
                "{} deleted by {user} (updaters {updaters}, causal chain length {chain_len})",
                old.namespaced_name(),
            );
        }
        // there's no object left to patch
        return Ok(resp);
    }

    let Some(obj) = &req.object else {
        return Ok(resp);
    };

    let old_annotations: BTreeMap<String, String> =
        req.old_object.as_ref().map(|o| o.annotations().clone()).unwrap_or_default();

    if req.operation == Operation::Update
        && let Some(old) = &req.old_object
        && obj.spec() == old.spec()
    {
        // Metadata-only change: hands off the causal chain entirely
        let desired =
            compute_annotations(ChangeKind::NoSpecChange, &old_annotations, obj.annotations(), None, &user_hash);
        return with_annotation_patch(resp, obj, &desired);
    }

    // From here on we have a CREATE or a real spec change
    let child_updaters = ActorSet::from_annotations(&old_annotations, UPDATERS_KEY);
    let child_ref = child_ref_for(req, obj);

    let drift = {
        let mut apiset = ctx.apiset.lock().await;
        detect_drift(&mut apiset, obj, &user_hash, &child_updaters).await
    };
    debug!("drift verdict for {child_ref}: {} ({})", drift.drift_detected, drift.reason);

    if !req.dry_run
        && let Some(parent) = &drift.parent
        && drift.lifecycle == Some(LifecyclePhase::Stable)
        && !parent.is_initialized
    {
        tokio::spawn(record_initialized(ctx.apiset.clone(), parent.clone()));
    }

    let namespace_obj = match req.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => fetch_namespace(ctx.client.clone(), ns).await,
        _ => None,
    };
    let mode = resolve_mode(
        obj,
        namespace_obj.as_ref(),
        &req.resource.group,
        &req.resource.resource,
        &req.kind.kind,
        &ctx.config.drift_detection,
    );

    let outcome = evaluate_policy(&drift, &child_ref, mode);
    if let Verdict::Deny(message) = outcome.verdict {
        info!("denying {} of {child_ref} by {user}: {message}", operation_name(&req.operation));
        return Ok(resp.deny(message));
    }

    if !req.dry_run {
        if let (Some(phase), Some(parent)) = (outcome.callback_phase, &drift.parent) {
            if is_snoozed(&parent.annotations, clock.now()) {
                info!("drift callbacks for children of {} are snoozed", parent.ref_);
            } else {
                ctx.callbacks.send(build_report(phase, &drift, parent, &child_ref, req, &user));
            }
        }

        if let (Some(pruned), Some(parent)) = (&outcome.pruned_approvals, &drift.parent) {
            tokio::spawn(write_pruned_approvals(ctx.apiset.clone(), parent.clone(), pruned.clone()));
        }
    }

    // Trace propagation: a controller acting on a reconciling parent extends
    // the parent's causal chain; everything else starts a new one
    let hop = Hop::for_object(
        &child_ref,
        obj.metadata.generation,
        &user,
        &req.uid,
        clock.now_ts(),
        extract_trace_labels(obj.annotations()),
    );
    let is_controller = drift.identity == ControllerIdentity::Controller;
    let trace = if is_controller && drift.lifecycle == Some(LifecyclePhase::Reconciling) {
        parent_trace(drift.parent.as_ref()).append(hop)
    } else {
        Trace::new_origin(hop)
    };

    let computed = ComputedCausality {
        trace: trace.serialize()?,
        updaters: child_updaters.with(&user_hash).to_string(),
    };

    let change_kind = if is_controller { ChangeKind::ControllerUpdate } else { ChangeKind::NewOrigin };
    let desired = if req.operation == Operation::Create {
        // Incoming reserved annotations on a CREATE are always suspect
        // (typically inherited from the parent); recompute from nothing
        let stripped = strip_reserved(obj.annotations());
        compute_annotations(change_kind, &BTreeMap::new(), &stripped, Some(&computed), &user_hash)
    } else {
        compute_annotations(change_kind, &old_annotations, obj.annotations(), Some(&computed), &user_hash)
    };

    let mut resp = with_annotation_patch(resp, obj, &desired)?;
    if let Verdict::AllowWithWarning(warning) = outcome.verdict {
        warn!("{warning}");
        resp.warnings = Some(vec![warning]);
    }
    Ok(resp)
}

fn with_annotation_patch(
    resp: AdmissionResponse,
    obj: &DynamicObject,
    desired: &BTreeMap<String, String>,
) -> anyhow::Result<AdmissionResponse> {
    let patch = annotation_patch(obj.metadata.annotations.as_ref(), desired);
    if patch.0.is_empty() {
        return Ok(resp);
    }
    Ok(resp.with_patch(patch)?)
}

// The request is the source of truth for the child's identity; the embedded
// object only fills in what the request can't know (e.g. uid on CREATE is
// often unset in both)
fn child_ref_for(req: &AdmissionRequest<DynamicObject>, obj: &DynamicObject) -> ObjectRef {
    let api_version = if req.kind.group.is_empty() {
        req.kind.version.clone()
    } else {
        format!("{}/{}", req.kind.group, req.kind.version)
    };
    ObjectRef {
        api_version,
        kind: req.kind.kind.clone(),
        namespace: req.namespace.clone().filter(|ns| !ns.is_empty()),
        name: if req.name.is_empty() { obj.name_any() } else { req.name.clone() },
        uid: obj.uid(),
    }
}

fn parent_trace(parent: Option<&ParentState>) -> Trace {
    let Some(parent) = parent else {
        return Trace::default();
    };
    Trace::from_annotations(&parent.annotations).unwrap_or_else(|err| {
        warn!("unreadable trace on {}, starting fresh: {err}", parent.ref_);
        Trace::default()
    })
}

async fn fetch_namespace(client: kube::Client, name: &str) -> Option<corev1::Namespace> {
    let api: kube::Api<corev1::Namespace> = kube::Api::all(client);
    match api.get(name).await {
        Ok(ns) => Some(ns),
        Err(err) => {
            // mode resolution degrades gracefully without the namespace
            debug!("could not fetch namespace {name}: {err}");
            None
        },
    }
}

fn operation_name(op: &Operation) -> &'static str {
    match op {
        Operation::Create => "CREATE",
        Operation::Update => "UPDATE",
        Operation::Delete => "DELETE",
        Operation::Connect => "CONNECT",
    }
}

fn extract_field_manager(req: &AdmissionRequest<DynamicObject>) -> Option<String> {
    req.options.as_ref()?.0.get("fieldManager")?.as_str().map(|s| s.into())
}

fn build_report(
    phase: DriftPhase,
    drift: &crate::drift::DriftResult,
    parent: &ParentState,
    child_ref: &ObjectRef,
    req: &AdmissionRequest<DynamicObject>,
    user: &str,
) -> DriftReport {
    let old_spec = req.old_object.as_ref().and_then(|o| o.spec());
    let new_spec = req.object.as_ref().and_then(|o| o.spec());
    let spec_diff = serde_json::to_vec(&json!({"old": old_spec, "new": new_spec})).unwrap_or_default();

    DriftReport {
        spec: DriftReportSpec {
            id: report_id(phase, &parent.ref_, child_ref, Some(&spec_diff)),
            phase,
            parent: ParentReport {
                ref_: parent.ref_.clone(),
                lifecycle: drift.lifecycle.map(|l| l.to_string()).unwrap_or_default(),
                generation: parent.generation,
                observed_generation: parent.observed_generation,
            },
            child: ChildReport {
                ref_: child_ref.clone(),
                generation: req.object.as_ref().and_then(|o| o.metadata.generation),
            },
            request: RequestContext {
                user: user.into(),
                groups: req.user_info.groups.clone().unwrap_or_default(),
                uid: req.user_info.uid.clone(),
                operation: operation_name(&req.operation).into(),
                dry_run: req.dry_run,
                field_manager: extract_field_manager(req),
            },
            old_object: req.old_object.as_ref().and_then(|o| serde_json::to_value(o).ok()),
            new_object: req.object.as_ref().and_then(|o| serde_json::to_value(o).ok()),
        },
    }
}

async fn write_pruned_approvals(apiset: Arc<Mutex<ApiSet>>, parent: ParentState, pruned: String) {
    let patch = json!({"metadata": {"annotations": {APPROVALS_KEY: pruned}}});
    let res = async {
        let mut apiset = apiset.lock().await;
        let ns = parent.ref_.namespace.clone().unwrap_or_default();
        let api = apiset.api_for(&parent.gvk, &ns).await?;
        api.patch(&parent.ref_.name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        anyhow::Ok(())
    }
    .await;

    // Collisions with the parent's own reconciler are expected; the next
    // approved admission will prune again
    if let Err(err) = res {
        info!("could not write pruned approvals on {}: {err}", parent.ref_);
    }
}
