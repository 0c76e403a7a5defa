//! Engine-wide tunables that more than one module needs to agree on.

/// Bound on how many times [`crate::aggregate::Aggregator::execute`]
/// re-invokes a command after an optimistic-concurrency conflict before
/// surfacing [`crate::errors::AggregateError::ConcurrentWrite`].
pub const AGGREGATOR_MAX_RETRIES: u32 = 5;

/// A projection snapshot is written every this-many committed events, so
/// replaying a long-lived aggregate does not require folding its full
/// history on every load.
pub const SNAPSHOT_INTERVAL: u64 = 200;

/// Bound on the in-memory `EngineState::deactivated` FIFO window (see
/// `model::engine_state::DEACTIVATED_WINDOW`, re-exported here for crates
/// that only need the constant, not the whole `model` module).
pub const ENGINE_VERSION: u32 = 1;
