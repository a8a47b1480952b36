use std::fmt;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::*;

use kz_core::prelude::*;

use crate::config::{
    DriftDetectionConfig,
    ModeOverride,
};

/// What happens to a drift verdict that would deny: enforce actually denies,
/// log lets the mutation through with a warning attached.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Log,
    Enforce,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mode::Log => write!(f, "log"),
            Mode::Enforce => write!(f, "enforce"),
        }
    }
}

/// Unknown values are ignored, not errors; a typo'd annotation falls through
/// to the next layer of precedence.
pub fn parse_mode(s: &str) -> Option<Mode> {
    match s {
        "log" => Some(Mode::Log),
        "enforce" => Some(Mode::Enforce),
        _ => None,
    }
}

/// Resolve the effective enforcement mode for an object: its own annotation
/// beats its namespace's annotation beats the first matching config override
/// beats the configured default.
pub fn resolve_mode(
    obj: &DynamicObject,
    namespace: Option<&corev1::Namespace>,
    group: &str,
    resource: &str,
    kind: &str,
    config: &DriftDetectionConfig,
) -> Mode {
    if let Some(mode) = obj.annotations().get(MODE_KEY).and_then(|v| parse_mode(v)) {
        return mode;
    }

    if let Some(ns) = namespace
        && let Some(mode) = ns.annotations().get(MODE_KEY).and_then(|v| parse_mode(v))
    {
        return mode;
    }

    // The admission request normally carries the resource plural; objects
    // we're asked about out-of-band only have a kind to go on.
    let plural = if resource.is_empty() { format!("{}s", kind.to_lowercase()) } else { resource.into() };

    for o in &config.overrides {
        if override_matches(o, obj, namespace, group, &plural) {
            return o.mode;
        }
    }

    config.default_mode
}

fn override_matches(
    o: &ModeOverride,
    obj: &DynamicObject,
    namespace: Option<&corev1::Namespace>,
    group: &str,
    plural: &str,
) -> bool {
    if !o.api_groups.iter().any(|g| g == group) {
        return false;
    }
    if !o.resources.iter().any(|r| r == "*" || r == plural) {
        return false;
    }

    if let Some(namespaces) = &o.namespaces {
        match obj.namespace() {
            Some(ns) if namespaces.contains(&ns) => (),
            _ => return false,
        }
    }

    if let Some(sel) = &o.namespace_selector {
        let matched = namespace.is_some_and(|ns_obj| {
            ns_obj.matches(sel).unwrap_or_else(|err| {
                warn!("skipping malformed namespaceSelector: {err}");
                false
            })
        });
        if !matched {
            return false;
        }
    }

    if let Some(sel) = &o.object_selector {
        let matched = obj.matches(sel).unwrap_or_else(|err| {
            warn!("skipping malformed objectSelector: {err}");
            false
        });
        if !matched {
            return false;
        }
    }

    true
}
