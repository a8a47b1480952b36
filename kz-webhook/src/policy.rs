use tracing::*;

use kz_core::controls::{
    ControlDecision,
    Freeze,
    evaluate_controls,
    parse_approvals,
    parse_freeze,
    prune,
};
use kz_core::prelude::*;
use kz_core::report::DriftPhase;

use crate::drift::DriftResult;
use crate::mode::Mode;
use crate::parent::LifecyclePhase;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Allow,
    AllowWithWarning(String),
    Deny(String),
}

/// What the policy layer decided, plus the side effects the pipeline should
/// kick off if the admission goes through.
#[derive(Clone, Debug)]
pub struct PolicyOutcome {
    pub verdict: Verdict,
    pub callback_phase: Option<DriftPhase>,

    /// Re-serialized approvals annotation to write back to the parent, set
    /// only when pruning changed the list.
    pub pruned_approvals: Option<String>,
}

impl PolicyOutcome {
    fn allow() -> PolicyOutcome {
        PolicyOutcome {
            verdict: Verdict::Allow,
            callback_phase: None,
            pruned_approvals: None,
        }
    }

    fn deny(message: String) -> PolicyOutcome {
        PolicyOutcome {
            verdict: Verdict::Deny(message),
            callback_phase: None,
            pruned_approvals: None,
        }
    }
}

/// Turn a drift verdict into an admission decision, honoring freezes,
/// rejections, and approvals recorded on the parent.
pub fn evaluate_policy(drift: &DriftResult, child_ref: &ObjectRef, mode: Mode) -> PolicyOutcome {
    // A freeze blocks every child mutation, drift or not, approved or not.
    // The one exception is a parent already being torn down: blocking the
    // children of a deleting parent would wedge finalization.
    if let Some(parent) = &drift.parent
        && drift.lifecycle != Some(LifecyclePhase::Deleting)
        && let Freeze::Active(info) = parse_freeze(&parent.annotations)
    {
        // The freeze's user is deliberately withheld from the message
        let mut message = format!("parent {} is frozen; mutations to its children are blocked", parent.ref_);
        if let Some(m) = &info.message {
            message += &format!(" ({m})");
        }
        return PolicyOutcome::deny(message);
    }

    if !drift.drift_detected {
        return PolicyOutcome::allow();
    }
    let Some(parent) = &drift.parent else {
        // drift without parent state can't happen; don't make it worse
        return PolicyOutcome::allow();
    };

    match evaluate_controls(&parent.annotations, child_ref, Some(&parent.ref_), parent.generation) {
        ControlDecision::Rejected { reason } => {
            let message = format!("drift on {child_ref} is rejected: {reason}");
            PolicyOutcome {
                verdict: deny_or_warn(mode, message),
                callback_phase: None,
                pruned_approvals: None,
            }
        },

        ControlDecision::Approved { matched } => {
            info!("drift on {child_ref} approved by {matched:?}");
            let res = prune(parse_approvals(&parent.annotations), Some(&matched), parent.generation);
            PolicyOutcome {
                verdict: Verdict::Allow,
                callback_phase: Some(DriftPhase::Resolved),
                pruned_approvals: res
                    .changed
                    .then(|| serde_json::to_string(&res.kept).unwrap_or_else(|_| "[]".into())),
            }
        },

        ControlDecision::Unmatched => {
            let message = format!("drift detected: {}, and no approval matches {child_ref}", drift.reason);
            PolicyOutcome {
                verdict: deny_or_warn(mode, message),
                callback_phase: Some(DriftPhase::Detected),
                pruned_approvals: None,
            }
        },
    }
}

fn deny_or_warn(mode: Mode, message: String) -> Verdict {
    match mode {
        Mode::Enforce => Verdict::Deny(message),
        Mode::Log => Verdict::AllowWithWarning(format!("{WARNING_PREFIX} {message}; would be blocked in enforce mode")),
    }
}
