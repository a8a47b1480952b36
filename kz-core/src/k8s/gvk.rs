use std::borrow::Cow;
use std::fmt;
use std::ops::Deref;

use kube::api::{
    GroupVersionKind,
    TypeMeta,
};

use super::*;
use crate::errors::*;
use crate::prelude::*;

// GVK is a "newtype" wrapper around the metav1::GroupVersionKind object with
// the conversions we need for owner references and dynamic API lookups.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct GVK(GroupVersionKind);

impl GVK {
    pub fn new(group: &str, version: &str, kind: &str) -> GVK {
        GVK(GroupVersionKind::gvk(group, version, kind))
    }

    pub fn from_dynamic_obj(obj: &DynamicObject) -> anyhow::Result<GVK> {
        match &obj.types {
            Some(t) => Ok(GVK(t.try_into()?)),
            None => bail!(KubernetesError::missing_type_meta(obj.name_any())),
        }
    }

    // An ownerReference carries apiVersion ("group/version", or bare
    // "version" for the core group) and kind.
    pub fn from_owner_ref(rf: &metav1::OwnerReference) -> anyhow::Result<GVK> {
        let parts: Vec<_> = rf.api_version.split('/').collect();

        match parts[..] {
            [version] => Ok(GVK(GroupVersionKind::gvk("", version, &rf.kind))),
            [group, version] => Ok(GVK(GroupVersionKind::gvk(group, version, &rf.kind))),
            _ => bail!("invalid format for api_version: {}", rf.api_version),
        }
    }

    pub fn from_request_kind(gvk: &GroupVersionKind) -> GVK {
        GVK(gvk.clone())
    }

    pub fn into_type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.0.api_version(),
            kind: self.0.kind.clone(),
        }
    }
}

// Impl Deref lets a GVK act like a GroupVersionKind anywhere one of those is expected
impl Deref for GVK {
    type Target = GroupVersionKind;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for GVK {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut group = Cow::from(&self.0.group);
        if !group.is_empty() {
            group.to_mut().push('/');
        }

        write!(f, "{group}{}.{}", self.0.version, self.0.kind)
    }
}
