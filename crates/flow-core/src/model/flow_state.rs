use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{FlowId, StepId};
use super::plan::ExecutionPlan;
use super::step_execution::StepExecution;

/// Provenance marker for attributes seeded from the caller's `init` map.
pub const PROVENANCE_INIT: &str = "__init__";
/// Provenance marker for attributes filled in from a step's declared default.
pub const PROVENANCE_DEFAULT: &str = "__default__";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub value: Value,
    /// Step id (or `"__init__"`/`"__default__"`) that first produced this
    /// attribute. Immutable once set — first-writer-wins.
    pub producing_step: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    pub id: FlowId,
    pub status: FlowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeValue>,
    #[serde(default)]
    pub executions: IndexMap<StepId, StepExecution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_state: Option<String>,
}

impl FlowState {
    pub fn new(id: FlowId) -> Self {
        Self {
            id,
            status: FlowStatus::Active,
            plan: None,
            metadata: Value::Null,
            started_at: None,
            completed_at: None,
            error: None,
            attributes: IndexMap::new(),
            executions: IndexMap::new(),
            error_state: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, FlowStatus::Active)
    }

    /// A flow is eligible for `flow_deactivated` once it is terminal and no
    /// execution still has in-flight work.
    pub fn is_deactivation_eligible(&self) -> bool {
        self.is_terminal() && self.executions.values().all(|e| !e.has_active_work())
    }
}
