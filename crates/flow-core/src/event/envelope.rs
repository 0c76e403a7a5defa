use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{FlowId, StepId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Flow,
    Engine,
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateKind::Flow => write!(f, "flow"),
            AggregateKind::Engine => write!(f, "engine"),
        }
    }
}

/// Identity of a consistency boundary in the event store: `kind + id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    pub kind: AggregateKind,
    pub id: String,
}

impl AggregateRef {
    pub fn flow(id: &FlowId) -> Self {
        Self { kind: AggregateKind::Flow, id: id.0.clone() }
    }

    /// There is exactly one engine aggregate instance per deployment.
    pub fn engine() -> Self {
        Self { kind: AggregateKind::Engine, id: "engine".to_string() }
    }

    pub fn step_scoped(_step: &StepId) -> Self {
        // Health/catalog events all land on the single engine aggregate; this
        // helper exists so call sites reading "for this step" stay readable
        // without constructing `AggregateRef::engine()` by hand everywhere.
        Self::engine()
    }
}

impl std::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A not-yet-sequenced event, as produced by a command handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub data: Value,
}

/// A committed, sequenced event as read back from the store. This is the
/// wire shape from §6.2's event bus envelope (`aggregate_id` here is carried
/// alongside rather than embedded, since the store already scopes reads to
/// one aggregate at a time; the hub re-attaches it when fanning out).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    /// Sequence within this aggregate; strictly increasing, contiguous.
    pub sequence: u64,
    /// Monotone across all aggregates; fan-out/display only.
    pub global_sequence: u64,
    pub timestamp_ms: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
}
