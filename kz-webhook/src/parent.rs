use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use kube::api::{
    Patch,
    PatchParams,
};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::*;

use kz_core::actor::ActorSet;
use kz_core::k8s::{
    ApiSet,
    GVK,
    StatusCondition,
    controlling_owner,
};
use kz_core::prelude::*;

const READY_CONDITION: &str = "Ready";
const CONDITION_TRUE: &str = "True";

/// Where a parent is in its reconciliation cycle.  Drift is only possible
/// against a settled parent; every other phase means change is expected.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecyclePhase {
    Initializing,
    Initialized,
    Reconciling,
    Stable,
    Deleting,
}

impl LifecyclePhase {
    /// A settled parent isn't asking for anything new from its children.
    pub fn is_settled(&self) -> bool {
        matches!(self, LifecyclePhase::Stable | LifecyclePhase::Initialized)
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            LifecyclePhase::Initializing => "initializing",
            LifecyclePhase::Initialized => "initialized",
            LifecyclePhase::Reconciling => "reconciling",
            LifecyclePhase::Stable => "stable",
            LifecyclePhase::Deleting => "deleting",
        };
        write!(f, "{s}")
    }
}

/// Everything the drift detector and policy evaluator need to know about a
/// parent, extracted from a single read of the object.
#[derive(Clone, Debug)]
pub struct ParentState {
    pub ref_: ObjectRef,
    pub gvk: GVK,
    pub generation: i64,

    /// None when the parent's controller has never reported one; 0 and
    /// "unset" are different signals.
    pub observed_generation: Option<i64>,

    pub conditions: Vec<StatusCondition>,
    pub is_initialized: bool,
    pub is_deleting: bool,
    pub controllers: ActorSet,
    pub annotations: BTreeMap<String, String>,
}

impl ParentState {
    pub fn from_obj(obj: &DynamicObject) -> anyhow::Result<ParentState> {
        let annotations = obj.annotations().clone();
        Ok(ParentState {
            ref_: ObjectRef::from_dynamic_obj(obj)?,
            gvk: GVK::from_dynamic_obj(obj)?,
            generation: obj.current_generation(),
            observed_generation: obj.observed_generation(),
            conditions: obj.conditions(),
            is_initialized: annotations.get(PHASE_KEY).is_some_and(|v| v == PHASE_INITIALIZED),
            is_deleting: obj.metadata.deletion_timestamp.is_some(),
            controllers: ActorSet::from_annotations(&annotations, CONTROLLERS_KEY),
            annotations,
        })
    }
}

/// Find and fetch the controlling parent of the given object, if it has one.
/// A fetch failure propagates; the caller decides how conservative to be.
pub async fn resolve_parent(apiset: &mut ApiSet, child: &DynamicObject) -> anyhow::Result<Option<ParentState>> {
    let Some(owner) = controlling_owner(child) else {
        return Ok(None);
    };

    let gvk = GVK::from_owner_ref(&owner)?;
    let ns = child.namespace().unwrap_or_default();
    let api = apiset.api_for(&gvk, &ns).await?;
    let obj = api.get(&owner.name).await?;

    Ok(Some(ParentState::from_obj(&obj)?))
}

/// Classify a parent's reconciliation state.
///
/// The observedGeneration comparison outranks the latched phase annotation:
/// a parent that reports its progress can always be seen rolling forward,
/// and the latch exists only so parents that go quiet (or whose status gets
/// stomped by another actor) can't regress to looking uninitialized.
pub fn classify_lifecycle(parent: &ParentState) -> LifecyclePhase {
    if parent.is_deleting {
        return LifecyclePhase::Deleting;
    }

    if let Some(observed) = parent.observed_generation {
        return if observed < parent.generation {
            LifecyclePhase::Reconciling
        } else if observed == parent.generation {
            LifecyclePhase::Stable
        } else {
            // observed > generation shouldn't happen; assume we know nothing
            LifecyclePhase::Initializing
        };
    }

    if parent.is_initialized {
        return LifecyclePhase::Initialized;
    }

    // No observedGeneration reported at all; a Ready condition observed at
    // the current generation is the only remaining evidence of stability
    if parent
        .conditions
        .iter()
        .any(|c| {
            c.type_ == READY_CONDITION
                && c.status == CONDITION_TRUE
                && c.observed_generation.is_none_or(|g| g == parent.generation)
        })
    {
        return LifecyclePhase::Stable;
    }

    LifecyclePhase::Initializing
}

/// Latch the "has been stable once" bit onto the parent.  Fire-and-forget:
/// one attempt, losing the race to a concurrent writer only delays the latch
/// until the next admission event.
pub async fn record_initialized(apiset: Arc<Mutex<ApiSet>>, parent: ParentState) {
    let patch = json!({"metadata": {"annotations": {PHASE_KEY: PHASE_INITIALIZED}}});
    let res = async {
        let mut apiset = apiset.lock().await;
        let ns = parent.ref_.namespace.clone().unwrap_or_default();
        let api = apiset.api_for(&parent.gvk, &ns).await?;
        api.patch(&parent.ref_.name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
        anyhow::Ok(())
    }
    .await;

    match res {
        Ok(_) => debug!("latched initialized phase on {}", parent.ref_),
        Err(err) => info!("could not latch initialized phase on {}: {err}", parent.ref_),
    }
}
