use serde::{
    Deserialize,
    Serialize,
};
use serde_json as json;

use crate::actor::sha256_hex;
use crate::k8s::ObjectRef;

pub const REPORT_ID_LEN: usize = 16;

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DriftPhase {
    Detected,
    Resolved,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReport {
    #[serde(flatten)]
    pub ref_: ObjectRef,

    pub lifecycle: String,
    pub generation: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildReport {
    #[serde(flatten)]
    pub ref_: ObjectRef,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<i64>,
}

/// Who asked for the mutation that triggered the report.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub user: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    pub operation: String,
    pub dry_run: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field_manager: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReportSpec {
    pub id: String,
    pub phase: DriftPhase,
    pub parent: ParentReport,
    pub child: ChildReport,
    pub request: RequestContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_object: Option<json::Value>,
}

/// The POST body sent to every configured backend.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DriftReport {
    pub spec: DriftReportSpec,
}

/// The response body we expect a backend to acknowledge a report with.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct CallbackAck {
    #[serde(default)]
    pub acknowledged: bool,
}

/// A stable identifier for a drift event, so that backends can correlate the
/// Detected and Resolved reports for the same child.  Detected ids also fold
/// in the spec diff: two different out-of-band changes to the same child are
/// different events.
pub fn report_id(phase: DriftPhase, parent: &ObjectRef, child: &ObjectRef, spec_diff: Option<&[u8]>) -> String {
    let mut buf = format!("{parent}|{child}").into_bytes();
    if phase == DriftPhase::Detected
        && let Some(diff) = spec_diff
    {
        buf.extend_from_slice(diff);
    }

    let mut id = sha256_hex(&buf);
    id.truncate(REPORT_ID_LEN);
    id
}
