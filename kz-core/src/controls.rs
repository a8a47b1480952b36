use std::collections::BTreeMap;
use std::ops::Not;

use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::*;

use crate::constants::*;
use crate::k8s::ObjectRef;

/// How long an approval stays valid.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    /// Valid for a single matching mutation at the recorded generation.
    Once,
    /// Valid for any number of mutations while the parent stays at the
    /// recorded generation.
    Generation,
    /// Never expires.
    Always,
}

/// A user-authored grant on a parent allowing drift on matching children.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub api_version: String,
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    pub mode: ApprovalMode,

    /// When set, the approval also covers objects whose controlling owner is
    /// the named target, not just the target itself.
    #[serde(default, skip_serializing_if = "<&bool>::not")]
    pub children: bool,
}

impl Approval {
    fn matches_ref(&self, r: &ObjectRef) -> bool {
        self.api_version == r.api_version && self.kind == r.kind && (self.name.is_empty() || self.name == r.name)
    }

    pub fn matches(&self, child: &ObjectRef, owner: Option<&ObjectRef>) -> bool {
        if self.matches_ref(child) {
            return true;
        }
        self.children && !self.name.is_empty() && owner.is_some_and(|o| self.matches_ref(o))
    }

    pub fn is_valid(&self, parent_generation: i64) -> bool {
        match self.mode {
            ApprovalMode::Always => true,
            ApprovalMode::Once | ApprovalMode::Generation => self.generation == Some(parent_generation),
        }
    }
}

/// A user-authored block on a parent denying drift on matching children.
/// Rejections always win over approvals.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Rejection {
    pub api_version: String,
    pub kind: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub reason: String,
}

impl Rejection {
    pub fn matches(&self, child: &ObjectRef) -> bool {
        self.api_version == child.api_version && self.kind == child.kind && (self.name.is_empty() || self.name == child.name)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ControlDecision {
    Rejected { reason: String },
    Approved { matched: Approval },
    Unmatched,
}

/// Scan rejections first, then approvals; the first match of each kind wins.
pub fn evaluate_controls(
    annotations: &BTreeMap<String, String>,
    child: &ObjectRef,
    owner: Option<&ObjectRef>,
    parent_generation: i64,
) -> ControlDecision {
    for rejection in parse_rejections(annotations) {
        if rejection.matches(child) {
            return ControlDecision::Rejected { reason: rejection.reason };
        }
    }

    for approval in parse_approvals(annotations) {
        if approval.matches(child, owner) && approval.is_valid(parent_generation) {
            return ControlDecision::Approved { matched: approval };
        }
    }

    ControlDecision::Unmatched
}

/// Invalid approval JSON means no approvals; a typo must never grant
/// anything.
pub fn parse_approvals(annotations: &BTreeMap<String, String>) -> Vec<Approval> {
    let Some(raw) = annotations.get(APPROVALS_KEY) else {
        return vec![];
    };
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!("ignoring malformed approvals annotation: {err}");
        vec![]
    })
}

pub fn parse_rejections(annotations: &BTreeMap<String, String>) -> Vec<Rejection> {
    let Some(raw) = annotations.get(REJECTIONS_KEY) else {
        return vec![];
    };
    serde_json::from_str(raw).unwrap_or_else(|err| {
        warn!("ignoring malformed rejections annotation: {err}");
        vec![]
    })
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreezeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Freeze {
    Inactive,
    Active(FreezeInfo),
}

impl Freeze {
    pub fn is_active(&self) -> bool {
        matches!(self, Freeze::Active(_))
    }
}

/// A freeze is either the literal "true"/"false" (legacy form) or a JSON
/// object.  Content we cannot make sense of counts as an active freeze with
/// no metadata; a mangled freeze must keep blocking.
pub fn parse_freeze(annotations: &BTreeMap<String, String>) -> Freeze {
    let Some(raw) = annotations.get(FREEZE_KEY) else {
        return Freeze::Inactive;
    };
    match raw.trim() {
        "false" => Freeze::Inactive,
        "true" => Freeze::Active(FreezeInfo::default()),
        other => match serde_json::from_str(other) {
            Ok(info) => Freeze::Active(info),
            Err(err) => {
                warn!("treating malformed freeze annotation as active: {err}");
                Freeze::Active(FreezeInfo::default())
            },
        },
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnoozeInfo {
    pub expiry: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A snooze is either a bare RFC-3339 timestamp (legacy form) or a JSON
/// object carrying one.  Unlike freezes, unparseable snoozes are inactive;
/// snoozes only suppress reporting, so failing open is harmless.
pub fn parse_snooze(annotations: &BTreeMap<String, String>) -> Option<SnoozeInfo> {
    let raw = annotations.get(SNOOZE_KEY)?;
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw.trim()) {
        return Some(SnoozeInfo {
            expiry: ts.with_timezone(&Utc),
            user: None,
            message: None,
        });
    }
    match serde_json::from_str(raw) {
        Ok(info) => Some(info),
        Err(err) => {
            debug!("ignoring malformed snooze annotation: {err}");
            None
        },
    }
}

pub fn is_snoozed(annotations: &BTreeMap<String, String>, now: DateTime<Utc>) -> bool {
    parse_snooze(annotations).is_some_and(|s| now < s.expiry)
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PruneResult {
    pub kept: Vec<Approval>,
    pub removed: usize,
    pub changed: bool,
}

/// Drop approvals that can never become valid again: once/generation grants
/// recorded for a generation the parent has moved past (or that never had a
/// generation recorded at all).
pub fn prune_stale(approvals: Vec<Approval>, current_generation: i64) -> PruneResult {
    prune(approvals, None, current_generation)
}

/// As prune_stale, but additionally removes a just-consumed `once` approval.
pub fn prune(approvals: Vec<Approval>, consumed: Option<&Approval>, current_generation: i64) -> PruneResult {
    let before = approvals.len();
    let kept: Vec<_> = approvals
        .into_iter()
        .filter(|a| match a.mode {
            ApprovalMode::Always => true,
            ApprovalMode::Generation | ApprovalMode::Once => {
                if a.generation.is_none_or(|g| g < current_generation) {
                    return false;
                }
                !(a.mode == ApprovalMode::Once && consumed == Some(a))
            },
        })
        .collect();

    let removed = before - kept.len();
    PruneResult { kept, removed, changed: removed > 0 }
}
