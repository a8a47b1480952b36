use std::collections::BTreeMap;

use json_patch_ext::prelude::*;
use serde_json::{
    Value,
    json,
};

use kz_core::actor::ActorSet;
use kz_core::prelude::*;

// The user-owned reserved keys, exactly the ones a controller-driven update
// must not be allowed to stomp
const USER_KEYS: &[&str] = &[APPROVALS_KEY, REJECTIONS_KEY, FREEZE_KEY, SNOOZE_KEY, MODE_KEY];

/// How the pipeline classified the mutation; picks which reserved keys are
/// recomputed, which are carried over from the old object, and which are
/// dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChangeKind {
    /// Status subresource write: the actor joins the controllers set,
    /// everything else is untouched.
    StatusUpdate,
    /// Metadata-only change: every reserved key survives verbatim.
    NoSpecChange,
    /// Spec change by the parent's controller: the causal chain continues.
    ControllerUpdate,
    /// Spec change by anyone else: a fresh causal origin.
    NewOrigin,
}

/// The trace and updaters values the pipeline computed for this mutation.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ComputedCausality {
    pub trace: String,
    pub updaters: String,
}

/// Compute the full post-mutation annotation map.  Pure: all inputs come in,
/// the desired map comes out, and the patch is derived separately.
///
/// Non-reserved annotations always pass through from the incoming object
/// untouched.
pub fn compute_annotations(
    kind: ChangeKind,
    old: &BTreeMap<String, String>,
    incoming: &BTreeMap<String, String>,
    computed: Option<&ComputedCausality>,
    user_hash: &str,
) -> BTreeMap<String, String> {
    let mut desired: BTreeMap<String, String> =
        incoming.iter().filter(|(k, _)| !is_reserved_key(k)).map(|(k, v)| (k.clone(), v.clone())).collect();

    match kind {
        ChangeKind::NoSpecChange | ChangeKind::StatusUpdate => {
            for (k, v) in old.iter().filter(|(k, _)| is_reserved_key(k)) {
                desired.insert(k.clone(), v.clone());
            }
            if kind == ChangeKind::StatusUpdate {
                let controllers = ActorSet::from_annotations(old, CONTROLLERS_KEY).with(user_hash);
                desired.insert(CONTROLLERS_KEY.into(), controllers.to_string());
            }
        },

        ChangeKind::ControllerUpdate => {
            if let Some(c) = computed {
                desired.insert(TRACE_KEY.into(), c.trace.clone());
                desired.insert(UPDATERS_KEY.into(), c.updaters.clone());
            }

            // This child may itself be a parent: its own controllers set and
            // latched phase describe its children's causality, not this
            // mutation, so they ride along
            for key in [CONTROLLERS_KEY, PHASE_KEY] {
                if let Some(v) = old.get(key) {
                    desired.insert(key.into(), v.clone());
                }
            }

            for (k, v) in old.iter().filter(|(k, _)| is_user_key(k)) {
                desired.insert(k.clone(), v.clone());
            }
        },

        ChangeKind::NewOrigin => {
            if let Some(c) = computed {
                desired.insert(TRACE_KEY.into(), c.trace.clone());
                desired.insert(UPDATERS_KEY.into(), c.updaters.clone());
            }

            // A new causal origin invalidates the old chain's metadata; the
            // actor's own incoming values for the user-owned keys stand
            for (k, v) in incoming.iter().filter(|(k, _)| is_user_key(k)) {
                desired.insert(k.clone(), v.clone());
            }
        },
    }

    desired
}

fn is_user_key(key: &str) -> bool {
    USER_KEYS.contains(&key) || (key.starts_with(TRACE_LABEL_PREFIX) && key.len() > TRACE_LABEL_PREFIX.len())
}

/// Emit the JSON-Patch ops that take the incoming object's annotations to
/// the desired map: replace where a key exists with a different value, add
/// where it's missing, remove reserved keys that shouldn't survive.  Pass
/// `incoming = None` when the object has no annotations map at all.
pub fn annotation_patch(incoming: Option<&BTreeMap<String, String>>, desired: &BTreeMap<String, String>) -> Patch {
    let mut ops = vec![];

    let Some(incoming) = incoming else {
        if !desired.is_empty() {
            ops.push(add_operation(format_ptr!("/metadata/annotations"), json!(desired)));
        }
        return Patch(ops);
    };

    for (k, v) in desired {
        match incoming.get(k) {
            Some(cur) if cur == v => (),
            Some(_) => {
                ops.push(replace_operation(
                    format_ptr!("/metadata/annotations/{}", escape(k)),
                    Value::String(v.clone()),
                ));
            },
            None => {
                ops.push(add_operation(format_ptr!("/metadata/annotations/{}", escape(k)), Value::String(v.clone())));
            },
        }
    }

    // Only reserved keys are ever removed; unknown annotations aren't ours
    // to clean up
    for k in incoming.keys().filter(|k| is_reserved_key(k) && !desired.contains_key(*k)) {
        ops.push(remove_operation(format_ptr!("/metadata/annotations/{}", escape(k))));
    }

    Patch(ops)
}

/// Strip every reserved key from an incoming annotation map.  CREATEs get
/// this treatment unconditionally: whatever the client sent was copied from
/// somewhere else, and the pipeline recomputes what actually applies.
pub fn strip_reserved(annotations: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    annotations.iter().filter(|(k, _)| !is_reserved_key(k)).map(|(k, v)| (k.clone(), v.clone())).collect()
}
