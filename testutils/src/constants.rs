use kz_core::k8s::GVK;
use lazy_static::lazy_static;

pub const TEST_NAMESPACE: &str = "test-namespace";
pub const TEST_DEPLOYMENT: &str = "the-deployment";
pub const TEST_REPLICASET: &str = "the-rs";

pub const TEST_PARENT_UID: &str = "parent-uid-1234";
pub const TEST_CHILD_UID: &str = "child-uid-5678";
pub const TEST_REQUEST_UID: &str = "req-0000-1111";

pub const TEST_PARENT_GENERATION: i64 = 7;
pub const TEST_CHILD_GENERATION: i64 = 2;

// If these users change, the hashes need to be recomputed (first five hex
// chars of the sha256 of the username)
pub const TEST_CONTROLLER: &str = "ctrl";
pub const TEST_CONTROLLER_HASH: &str = "f48a2";
pub const TEST_USER: &str = "alice";
pub const TEST_USER_HASH: &str = "2bd80";
pub const TEST_OTHER_USER: &str = "bob";
pub const TEST_OTHER_USER_HASH: &str = "81b63";

lazy_static! {
    pub static ref DEPL_GVK: GVK = GVK::new("apps", "v1", "Deployment");
    pub static ref RS_GVK: GVK = GVK::new("apps", "v1", "ReplicaSet");
}
