use std::fmt;

use k8s_openapi::api::authentication::v1::UserInfo;
use sha2::{
    Digest,
    Sha256,
};

use crate::constants::*;

/// Lowercase hex encoding of a SHA-256 digest over the given bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes).iter().fold(String::new(), |mut acc, b| {
        acc += &format!("{b:02x}");
        acc
    })
}

/// The fixed-width fingerprint recorded for an actor in the updaters and
/// controllers annotations.
pub fn hash_actor(actor: &str) -> String {
    let mut h = sha256_hex(actor.as_bytes());
    h.truncate(ACTOR_HASH_LEN);
    h
}

/// The identifier we fingerprint for a request: the username when the
/// platform gives us one, falling back to the user UID and then the request
/// UID so that anonymous requests still produce a stable value.
pub fn actor_id(user_info: &UserInfo, request_uid: &str) -> String {
    if let Some(username) = &user_info.username
        && !username.is_empty()
    {
        return username.clone();
    }
    if let Some(uid) = &user_info.uid
        && !uid.is_empty()
    {
        return uid.clone();
    }
    request_uid.into()
}

/// An ordered set of actor hashes, stored comma-separated in a single
/// annotation value.  Insertion order is preserved so that overflow can evict
/// the oldest entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActorSet(Vec<String>);

impl ActorSet {
    pub fn parse(s: &str) -> ActorSet {
        ActorSet(s.split(',').map(|h| h.trim().to_string()).filter(|h| !h.is_empty()).collect())
    }

    pub fn from_annotations(annotations: &std::collections::BTreeMap<String, String>, key: &str) -> ActorSet {
        annotations.get(key).map_or_else(ActorSet::default, |v| ActorSet::parse(v))
    }

    pub fn contains(&self, h: &str) -> bool {
        self.0.iter().any(|x| x == h)
    }

    /// Append a hash if it isn't already present; evicts the oldest entry
    /// when the set is full.  Returns true if the set changed.
    pub fn insert(&mut self, h: &str) -> bool {
        if self.contains(h) {
            return false;
        }
        self.0.push(h.into());
        while self.0.len() > MAX_ACTOR_HASHES {
            self.0.remove(0);
        }
        true
    }

    pub fn with(mut self, h: &str) -> ActorSet {
        self.insert(h);
        self
    }

    pub fn intersection(&self, other: &ActorSet) -> ActorSet {
        ActorSet(self.0.iter().filter(|h| other.contains(h)).cloned().collect())
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ActorSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}
