use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::ids::StepId;
use super::step::Step;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributePlanEntry {
    pub providers: Vec<StepId>,
    pub consumers: Vec<StepId>,
}

/// An immutable execution plan attached to a flow at `flow_started`. Produced
/// by the plan builder; never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub goals: Vec<StepId>,
    /// Attribute names the caller must supply in `init`.
    pub required: Vec<String>,
    /// Minimal subset of the catalog reachable backward from goals,
    /// snapshotted by value.
    pub steps: Vec<Step>,
    pub attributes: IndexMap<String, AttributePlanEntry>,
}

impl ExecutionPlan {
    pub fn step(&self, id: &StepId) -> Option<&Step> {
        self.steps.iter().find(|s| &s.id == id)
    }

    pub fn contains_step(&self, id: &StepId) -> bool {
        self.steps.iter().any(|s| &s.id == id)
    }
}
