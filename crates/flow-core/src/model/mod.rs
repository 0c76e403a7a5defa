//! Neutral data model shared by the plan builder, flow runtime, projections,
//! and event payloads: the catalog [`Step`], the immutable [`ExecutionPlan`],
//! and the two projections the engine folds events into — [`FlowState`] and
//! [`EngineState`].

pub mod engine_state;
pub mod flow_state;
pub mod ids;
pub mod plan;
pub mod step;
pub mod step_execution;
pub mod work_state;

pub use engine_state::{ActiveFlowEntry, DeactivatedEntry, EngineState, HealthEntry, HealthStatus, DEACTIVATED_WINDOW};
pub use flow_state::{AttributeValue, FlowState, FlowStatus, PROVENANCE_DEFAULT, PROVENANCE_INIT};
pub use ids::{FlowId, StepId, WorkToken};
pub use plan::{AttributePlanEntry, ExecutionPlan};
pub use step::{
    AttributeDecl, AttributeRole, AttributeType, BackoffType, FlowSpec, HttpSpec, PredicateSpec, ScriptLanguage, ScriptSpec, Step, StepKind,
    WorkConfig,
};
pub use step_execution::{StepExecStatus, StepExecution};
pub use work_state::{WorkState, WorkStatus};
