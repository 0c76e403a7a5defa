//! The closed event-type catalog of §6.3. Each constant is the wire
//! `"type"` string carried on [`super::NewEvent`]/[`super::StoredEvent`].
//! Appliers match on these strings; an applier that sees an unrecognized
//! type ignores it (forward compatibility, §4.1).

pub mod engine {
    pub const STEP_REGISTERED: &str = "step_registered";
    pub const STEP_UPDATED: &str = "step_updated";
    pub const STEP_UNREGISTERED: &str = "step_unregistered";
    pub const STEP_HEALTH_CHANGED: &str = "step_health_changed";
    pub const FLOW_ACTIVATED: &str = "flow_activated";
    pub const FLOW_DEACTIVATED: &str = "flow_deactivated";
    pub const FLOW_ARCHIVING: &str = "flow_archiving";
    pub const FLOW_ARCHIVED: &str = "flow_archived";

    pub const ALL: &[&str] = &[
        STEP_REGISTERED,
        STEP_UPDATED,
        STEP_UNREGISTERED,
        STEP_HEALTH_CHANGED,
        FLOW_ACTIVATED,
        FLOW_DEACTIVATED,
        FLOW_ARCHIVING,
        FLOW_ARCHIVED,
    ];
}

pub mod flow {
    pub const FLOW_STARTED: &str = "flow_started";
    pub const FLOW_COMPLETED: &str = "flow_completed";
    pub const FLOW_FAILED: &str = "flow_failed";
    /// Internal optimization; its sequencing relative to other flow-scope
    /// events is unspecified. Kept in the catalog for forward compatibility
    /// but never emitted here.
    pub const FLOW_DIGEST_UPDATED: &str = "flow_digest_updated";
    pub const STEP_STARTED: &str = "step_started";
    pub const STEP_COMPLETED: &str = "step_completed";
    pub const STEP_FAILED: &str = "step_failed";
    pub const STEP_SKIPPED: &str = "step_skipped";
    pub const WORK_STARTED: &str = "work_started";
    pub const WORK_SUCCEEDED: &str = "work_succeeded";
    pub const WORK_FAILED: &str = "work_failed";
    pub const WORK_NOT_COMPLETED: &str = "work_not_completed";
    pub const RETRY_SCHEDULED: &str = "retry_scheduled";
    pub const ATTRIBUTE_SET: &str = "attribute_set";

    pub const ALL: &[&str] = &[
        FLOW_STARTED,
        FLOW_COMPLETED,
        FLOW_FAILED,
        FLOW_DIGEST_UPDATED,
        STEP_STARTED,
        STEP_COMPLETED,
        STEP_FAILED,
        STEP_SKIPPED,
        WORK_STARTED,
        WORK_SUCCEEDED,
        WORK_FAILED,
        WORK_NOT_COMPLETED,
        RETRY_SCHEDULED,
        ATTRIBUTE_SET,
    ];
}
