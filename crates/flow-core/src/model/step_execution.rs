use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::WorkToken;
use super::work_state::WorkState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepExecStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

impl StepExecStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepExecStatus::Completed | StepExecStatus::Failed | StepExecStatus::Skipped)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub status: StepExecStatus,
    #[serde(default)]
    pub inputs: Value,
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
    #[serde(default)]
    pub work_items: IndexMap<WorkToken, WorkState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl StepExecution {
    pub fn pending() -> Self {
        Self {
            status: StepExecStatus::Pending,
            inputs: Value::Null,
            outputs: IndexMap::new(),
            work_items: IndexMap::new(),
            started_at: None,
            completed_at: None,
            error: None,
            duration_ms: None,
        }
    }

    pub fn all_work_terminal(&self) -> bool {
        self.work_items.values().all(WorkState::is_terminal)
    }

    pub fn has_active_work(&self) -> bool {
        self.work_items.values().any(|w| !w.is_terminal())
    }
}
