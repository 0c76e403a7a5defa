use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::WorkToken;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    Active,
    Succeeded,
    Failed,
    /// Transient; may transition back to `Active` (retry) or to `Failed`
    /// (retry budget exhausted).
    NotCompleted,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkState {
    pub token: WorkToken,
    pub status: WorkStatus,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
}

impl WorkState {
    pub fn new_active(token: WorkToken, inputs: Option<Value>) -> Self {
        Self { token, status: WorkStatus::Active, retry_count: 0, next_retry_at: None, error: None, inputs, outputs: None }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, WorkStatus::Succeeded | WorkStatus::Failed)
    }
}
