//! Plan Builder (§4.2): computes the minimal, immutable [`ExecutionPlan`]
//! reachable backward from a flow's goal steps.

mod builder;

pub use builder::build_plan;
