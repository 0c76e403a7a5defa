//! flow-core: the engine runtime at the center of the goal-driven flow
//! orchestrator — plan builder, flow state machine, event store contract,
//! and the projections everything else in the workspace folds events into.
//!
//! Components, leaves first:
//! - `event`: the append-only per-aggregate event log contract (`EventStore`)
//!   plus the envelope and closed event-type catalog.
//! - `model`: the neutral data model — catalog `Step`, immutable
//!   `ExecutionPlan`, and the `FlowState`/`EngineState` projections events
//!   fold into.
//! - `plan`: the Plan Builder — reverse-reachability from goal steps,
//!   cycle detection, required-set minimization.
//! - `retry`: backoff computation, pluggable behind `RetryPolicy` so
//!   `flow-policies` can wrap it with an audit trail.
//! - `runtime`: the Flow Runtime dispatch loop — command handling plus the
//!   reactive cascade (dispatch, fan-out, aggregation, goal resolution).
//! - `hashing`: canonical JSON and content hashes used for script
//!   compiled-artifact cache keys and fingerprints.
//! - `errors`: the five-class error taxonomy shared across the workspace.

pub mod aggregate;
pub mod constants;
pub mod errors;
pub mod event;
pub mod hashing;
pub mod model;
pub mod plan;
pub mod retry;
pub mod runtime;

pub use aggregate::Aggregator;
pub use errors::{AggregateError, CommandError, ErrorClass, PlanError, StoreError, ValidationError};
pub use event::{AggregateKind, AggregateRef, EventStore, InMemoryEventStore, NewEvent, StoredEvent};
pub use model::{EngineState, ExecutionPlan, FlowId, FlowState, FlowStatus, Step, StepExecution, StepId, WorkState, WorkToken};
pub use plan::build_plan;
pub use retry::{compute_backoff, DefaultRetryPolicy, RetryPolicy};
pub use runtime::{handle_command, handle_engine_command, AlwaysTrue, EngineCommand, FlowCommand, PredicateEvaluator};
