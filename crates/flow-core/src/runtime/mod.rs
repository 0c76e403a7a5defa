//! The Flow Runtime (§4.3): the per-flow state machine that turns a
//! committed command into the ordered cascade of events a single `Execute`
//! appends — dispatch, predicate evaluation, fan-out, completion
//! aggregation, and goal resolution all run to a fixpoint inside
//! [`dispatch::handle_command`] before the transaction commits.

pub mod apply;
pub mod dispatch;
pub mod engine_apply;
pub mod engine_dispatch;
pub mod predicate;

pub use apply::apply_flow_event;
pub use dispatch::{handle_command, FlowCommand};
pub use engine_apply::apply_engine_event;
pub use engine_dispatch::{handle_engine_command, EngineCommand};
pub use predicate::{AlwaysTrue, PredicateEvaluator};
