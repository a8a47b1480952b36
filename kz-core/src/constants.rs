use const_format::concatcp;

// All reserved annotations live under a single vendor prefix.  Other actors
// may end up copying these keys around (controllers frequently propagate
// parent annotations onto children wholesale), but only the webhook is
// allowed to author them; the admission pipeline re-computes or strips
// anything it finds on incoming objects.
pub const ANNOTATION_PREFIX: &str = "kausality.io/";

// System-owned keys
pub const TRACE_KEY: &str = concatcp!(ANNOTATION_PREFIX, "trace");
pub const UPDATERS_KEY: &str = concatcp!(ANNOTATION_PREFIX, "updaters");
pub const CONTROLLERS_KEY: &str = concatcp!(ANNOTATION_PREFIX, "controllers");
pub const PHASE_KEY: &str = concatcp!(ANNOTATION_PREFIX, "phase");

// User-owned keys
pub const APPROVALS_KEY: &str = concatcp!(ANNOTATION_PREFIX, "approvals");
pub const REJECTIONS_KEY: &str = concatcp!(ANNOTATION_PREFIX, "rejections");
pub const FREEZE_KEY: &str = concatcp!(ANNOTATION_PREFIX, "freeze");
pub const SNOOZE_KEY: &str = concatcp!(ANNOTATION_PREFIX, "snooze");
pub const MODE_KEY: &str = concatcp!(ANNOTATION_PREFIX, "mode");

// Keys of the form `kausality.io/trace-<label>` attach <label> to the next
// hop this object contributes to a trace.
pub const TRACE_LABEL_PREFIX: &str = concatcp!(ANNOTATION_PREFIX, "trace-");

// Value latched into PHASE_KEY once a parent has been seen fully reconciled
pub const PHASE_INITIALIZED: &str = "initialized";

// Caps; overflow evicts the oldest entry (the trace origin is exempt)
pub const ACTOR_HASH_LEN: usize = 5;
pub const MAX_ACTOR_HASHES: usize = 16;
pub const MAX_TRACE_HOPS: usize = 16;

// Every warning surfaced to the admitting client carries this prefix
pub const WARNING_PREFIX: &str = "[kausality]";

// Defaults
pub const WEBHOOK_PORT: &str = "8443";
pub const DEFAULT_CALLBACK_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_CALLBACK_RETRY_COUNT: u32 = 3;
pub const DEFAULT_CALLBACK_RETRY_INTERVAL_SECONDS: u64 = 2;

/// Returns true for any annotation key the webhook owns, including the
/// trace-label namespace.
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(ANNOTATION_PREFIX)
}
