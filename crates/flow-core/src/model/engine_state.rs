use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::ids::{FlowId, StepId};
use super::step::Step;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthEntry {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for HealthEntry {
    fn default() -> Self {
        Self { status: HealthStatus::Unknown, error: None }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActiveFlowEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<FlowId>,
    pub activated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeactivatedEntry {
    pub flow_id: FlowId,
    pub at: i64,
}

/// Global aggregate: catalog, health map, active/deactivated/archiving flow
/// sets. A flow id appears in at most one of `active`, `deactivated`,
/// `archiving` at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineState {
    pub steps: IndexMap<StepId, Step>,
    pub health: IndexMap<StepId, HealthEntry>,
    pub active: IndexMap<FlowId, ActiveFlowEntry>,
    pub deactivated: VecDeque<DeactivatedEntry>,
    /// flow id -> lease-start timestamp (ms).
    pub archiving: IndexMap<FlowId, i64>,
}

/// Bound on the `deactivated` FIFO window kept in the projection; older
/// entries are dropped first. This only bounds in-memory recency tracking —
/// actual archival eligibility is driven by `flow_archiving`/lease state, not
/// by presence in this window.
pub const DEACTIVATED_WINDOW: usize = 1024;

impl EngineState {
    pub fn is_active(&self, flow: &FlowId) -> bool {
        self.active.contains_key(flow)
    }
}
