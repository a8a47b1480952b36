use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

use crate::constants::*;
use crate::k8s::ObjectRef;

/// One entry in a causal chain: a single mutated object, who mutated it, and
/// which admission request carried the mutation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Hop {
    pub api_version: String,
    pub kind: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,

    pub user: String,
    pub request_uid: String,
    pub timestamp: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl Hop {
    pub fn for_object(
        ref_: &ObjectRef,
        generation: Option<i64>,
        user: &str,
        request_uid: &str,
        timestamp: i64,
        labels: Option<BTreeMap<String, String>>,
    ) -> Hop {
        Hop {
            api_version: ref_.api_version.clone(),
            kind: ref_.kind.clone(),
            name: ref_.name.clone(),
            generation,
            user: user.into(),
            request_uid: request_uid.into(),
            timestamp,
            labels,
        }
    }
}

/// An ordered sequence of hops, JSON-serialized into a single annotation.
/// The first hop is the origin of the causal chain; it is never rewritten
/// once recorded.  Appends past the cap evict the oldest non-origin hop.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Trace(Vec<Hop>);

impl Trace {
    pub fn new_origin(hop: Hop) -> Trace {
        Trace(vec![hop])
    }

    /// An empty annotation value is an empty trace; anything else has to be
    /// valid JSON.
    pub fn parse(s: &str) -> anyhow::Result<Trace> {
        if s.is_empty() {
            return Ok(Trace::default());
        }
        Ok(Trace(serde_json::from_str(s)?))
    }

    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> anyhow::Result<Trace> {
        annotations.get(TRACE_KEY).map_or_else(|| Ok(Trace::default()), |v| Trace::parse(v))
    }

    pub fn serialize(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn append(&self, hop: Hop) -> Trace {
        let mut hops = self.0.clone();
        hops.push(hop);
        while hops.len() > MAX_TRACE_HOPS {
            hops.remove(1);
        }
        Trace(hops)
    }

    pub fn origin(&self) -> Option<&Hop> {
        self.0.first()
    }

    pub fn last_hop(&self) -> Option<&Hop> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Collect the trace labels the current object wants attached to its next
/// hop.  Labels come only from the object itself; they are never inherited
/// from earlier hops in the chain.
pub fn extract_trace_labels(annotations: &BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    let labels: BTreeMap<_, _> = annotations
        .iter()
        .filter_map(|(k, v)| match k.strip_prefix(TRACE_LABEL_PREFIX) {
            Some(suffix) if !suffix.is_empty() => Some((suffix.to_string(), v.clone())),
            _ => None,
        })
        .collect();

    if labels.is_empty() { None } else { Some(labels) }
}
