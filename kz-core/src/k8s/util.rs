use std::collections::BTreeMap;

use kube::Resource;
use serde::{
    Deserialize,
    Serialize,
};
use serde_json as json;

use super::*;
use crate::errors::*;
use crate::prelude::*;

/// A minimal reference to an object, used for reports, approval matching,
/// and log lines.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub api_version: String,
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl ObjectRef {
    pub fn from_dynamic_obj(obj: &DynamicObject) -> anyhow::Result<ObjectRef> {
        let types = obj.types.as_ref().ok_or(KubernetesError::missing_type_meta(obj.name_any()))?;
        Ok(ObjectRef {
            api_version: types.api_version.clone(),
            kind: types.kind.clone(),
            namespace: obj.namespace(),
            name: obj.name_any(),
            uid: obj.uid(),
        })
    }

    pub fn from_owner_ref(namespace: Option<&str>, rf: &metav1::OwnerReference) -> ObjectRef {
        ObjectRef {
            api_version: rf.api_version.clone(),
            kind: rf.kind.clone(),
            namespace: namespace.map(|ns| ns.into()),
            name: rf.name.clone(),
            uid: Some(rf.uid.clone()),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} {ns}/{}", self.api_version, self.kind, self.name),
            None => write!(f, "{}/{} {}", self.api_version, self.kind, self.name),
        }
    }
}

/// One entry of `status.conditions`; only the fields the lifecycle
/// classifier cares about.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCondition {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// The controlling owner reference, if the object has exactly one.  More
/// than one ref with `controller: true` is undefined behavior upstream; we
/// treat such objects as parentless.
pub fn controlling_owner(obj: &impl Resource) -> Option<metav1::OwnerReference> {
    let mut controllers = obj.owner_references().iter().filter(|rf| rf.controller == Some(true));
    match (controllers.next(), controllers.next()) {
        (Some(rf), None) => Some(rf.clone()),
        _ => None,
    }
}

pub trait KubeResourceExt {
    fn namespaced_name(&self) -> String;
    fn matches(&self, sel: &metav1::LabelSelector) -> anyhow::Result<bool>;
}

impl<T: Resource> KubeResourceExt for T {
    fn namespaced_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}", ns, self.name_any()),
            None => self.name_any(),
        }
    }

    fn matches(&self, sel: &metav1::LabelSelector) -> anyhow::Result<bool> {
        let labels = self.labels();

        for (k, v) in sel.match_labels.iter().flatten() {
            if labels.get(k) != Some(v) {
                return Ok(false);
            }
        }

        for req in sel.match_expressions.iter().flatten() {
            if !requirement_matches(labels, req)? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

/// Typed accessors over the schemaless payload of a DynamicObject.  Parent
/// inspection has to work for arbitrary kinds, so everything here reads the
/// raw JSON instead of specializing per GVK.
pub trait DynamicObjectExt {
    fn spec(&self) -> Option<&json::Value>;
    fn status(&self) -> Option<&json::Value>;
    fn observed_generation(&self) -> Option<i64>;
    fn conditions(&self) -> Vec<StatusCondition>;
    fn current_generation(&self) -> i64;
}

impl DynamicObjectExt for DynamicObject {
    fn spec(&self) -> Option<&json::Value> {
        self.data.get("spec")
    }

    fn status(&self) -> Option<&json::Value> {
        self.data.get("status")
    }

    fn observed_generation(&self) -> Option<i64> {
        self.status()?.get("observedGeneration")?.as_i64()
    }

    fn conditions(&self) -> Vec<StatusCondition> {
        let Some(conds) = self.status().and_then(|s| s.get("conditions")) else {
            return vec![];
        };
        serde_json::from_value(conds.clone()).unwrap_or_default()
    }

    fn current_generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }
}

// One set-based selector requirement against an object's labels.  "In" and
// "NotIn" require a values list; "Exists" and "DoesNotExist" forbid one.
fn requirement_matches(
    labels: &BTreeMap<String, String>,
    req: &metav1::LabelSelectorRequirement,
) -> anyhow::Result<bool> {
    let current = labels.get(&req.key);
    let values = req.values.as_deref().unwrap_or_default();

    let needs_values = matches!(req.operator.as_str(), "In" | "NotIn");
    if needs_values == values.is_empty() {
        bail!(KubernetesError::malformed_label_selector(req));
    }

    let matched = match req.operator.as_str() {
        "In" => current.is_some_and(|v| values.contains(v)),
        "NotIn" => !current.is_some_and(|v| values.contains(v)),
        "Exists" => current.is_some(),
        "DoesNotExist" => current.is_none(),
        other => bail!("unknown label selector operator {other:?}"),
    };
    Ok(matched)
}
