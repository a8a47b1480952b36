mod apiset;
mod gvk;
mod util;

pub use apiset::*;
pub use gvk::*;
pub use util::*;

use crate::errors::*;
use crate::prelude::*;

err_impl! {KubernetesError,
    #[error("object has no type information: {0}")]
    MissingTypeMeta(String),

    #[error("malformed label selector: {0:?}")]
    MalformedLabelSelector(metav1::LabelSelectorRequirement),
}

#[cfg(test)]
mod tests;
