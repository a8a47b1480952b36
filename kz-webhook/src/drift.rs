use std::fmt;

use tracing::*;

use kz_core::actor::ActorSet;
use kz_core::k8s::ApiSet;
use kz_core::prelude::*;

use crate::parent::{
    LifecyclePhase,
    ParentState,
    classify_lifecycle,
    resolve_parent,
};

/// Whether the acting user is "the" controller for the mutated object's
/// parent, as far as the recorded actor sets can tell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ControllerIdentity {
    Controller,
    NotController,
    Indeterminate,
}

/// Decide whether `user_hash` is the controller, given the hashes recorded
/// on the child (its spec-writers) and on the parent (its status-writers).
///
/// The first writer of a child defines its controller by convention; once
/// more than one writer has touched it, the parent's controllers set is the
/// tiebreaker: the controller is whoever both wrote this child and has been
/// seen reporting the parent's status.
pub fn identify_controller(
    parent_controllers: &ActorSet,
    child_updaters: &ActorSet,
    user_hash: &str,
) -> ControllerIdentity {
    if child_updaters.is_empty() {
        return ControllerIdentity::Controller;
    }

    if child_updaters.len() == 1 {
        return if child_updaters.contains(user_hash) {
            ControllerIdentity::Controller
        } else {
            ControllerIdentity::NotController
        };
    }

    if !parent_controllers.is_empty() {
        return if child_updaters.intersection(parent_controllers).contains(user_hash) {
            ControllerIdentity::Controller
        } else {
            ControllerIdentity::NotController
        };
    }

    ControllerIdentity::Indeterminate
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DriftReason {
    NoParent,
    ParentUnavailable,
    ExpectedLifecycle(LifecyclePhase),
    NewOrigin,
    IndeterminateController,
    ControllerOnSettledParent(LifecyclePhase),
}

impl fmt::Display for DriftReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DriftReason::NoParent => write!(f, "object has no controlling parent"),
            DriftReason::ParentUnavailable => write!(f, "parent state could not be determined"),
            DriftReason::ExpectedLifecycle(phase) => write!(f, "parent is {phase}; changes are expected"),
            DriftReason::NewOrigin => write!(f, "actor is not the controller; this starts a new causal chain"),
            DriftReason::IndeterminateController => write!(f, "cannot determine the controller for this object"),
            DriftReason::ControllerOnSettledParent(phase) => {
                write!(f, "controller is mutating a child while its parent is {phase}")
            },
        }
    }
}

/// The drift verdict plus everything downstream stages need: the parent
/// state for policy evaluation and the controller identity for trace
/// propagation.  `allowed_hint` is advisory; the policy evaluator owns the
/// admission verdict.
#[derive(Debug)]
pub struct DriftResult {
    pub drift_detected: bool,
    pub lifecycle: Option<LifecyclePhase>,
    pub parent: Option<ParentState>,
    pub identity: ControllerIdentity,
    pub reason: DriftReason,
    pub allowed_hint: bool,
}

impl DriftResult {
    fn no_drift(reason: DriftReason, lifecycle: Option<LifecyclePhase>, parent: Option<ParentState>, identity: ControllerIdentity) -> DriftResult {
        DriftResult {
            drift_detected: false,
            lifecycle,
            parent,
            identity,
            reason,
            allowed_hint: true,
        }
    }
}

/// The core causal judgment: is this mutation the controller reconciling its
/// parent's current desired state, or an out-of-band correction nobody asked
/// for?  Never inspects the content of the change, only who is making it and
/// where the parent is in its lifecycle.
pub async fn detect_drift(
    apiset: &mut ApiSet,
    child: &DynamicObject,
    user_hash: &str,
    child_updaters: &ActorSet,
) -> DriftResult {
    let parent = match resolve_parent(apiset, child).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            // Root objects can't drift: without a parent there's no desired
            // state to drift from.  The actor also can't be "the parent's
            // controller", so annotation updates follow the new-origin path.
            return DriftResult::no_drift(DriftReason::NoParent, None, None, ControllerIdentity::NotController);
        },
        Err(err) => {
            // Inability to determine drift is never a reason to deny
            warn!("could not resolve parent for {}: {err:?}", child.namespaced_name());
            return DriftResult::no_drift(
                DriftReason::ParentUnavailable,
                None,
                None,
                ControllerIdentity::Indeterminate,
            );
        },
    };

    let lifecycle = classify_lifecycle(&parent);
    let identity = identify_controller(&parent.controllers, child_updaters, user_hash);

    if !lifecycle.is_settled() {
        return DriftResult::no_drift(
            DriftReason::ExpectedLifecycle(lifecycle),
            Some(lifecycle),
            Some(parent),
            identity,
        );
    }

    match identity {
        ControllerIdentity::NotController => {
            DriftResult::no_drift(DriftReason::NewOrigin, Some(lifecycle), Some(parent), identity)
        },
        ControllerIdentity::Indeterminate => {
            DriftResult::no_drift(DriftReason::IndeterminateController, Some(lifecycle), Some(parent), identity)
        },
        ControllerIdentity::Controller => DriftResult {
            drift_detected: true,
            lifecycle: Some(lifecycle),
            parent: Some(parent),
            identity,
            reason: DriftReason::ControllerOnSettledParent(lifecycle),
            allowed_hint: false,
        },
    }
}
