//! The Aggregator (§4.1): `Execute(id, cmd)` — load the projection, run a
//! command closure that may raise events, and commit them atomically with a
//! compare-and-swap on the aggregate's last sequence. On a concurrent-write
//! conflict the raised events are discarded, the projection is reloaded from
//! the now-current log, and the command is re-invoked, bounded by
//! [`crate::constants::AGGREGATOR_MAX_RETRIES`].
//!
//! The same load-apply-commit shape serves two aggregate kinds (flow,
//! engine) and genuinely concurrent callers.

use std::sync::Arc;

use serde_json::Value;

use crate::constants::{AGGREGATOR_MAX_RETRIES, SNAPSHOT_INTERVAL};
use crate::errors::{AggregateError, CommandError};
use crate::event::{AggregateRef, EventStore, NewEvent, StoredEvent};
use crate::model::{EngineState, FlowState};
use crate::runtime::{apply_engine_event, apply_flow_event};

/// Thin wrapper over an [`EventStore`] that folds a flow or engine
/// projection from its event log and commits command-raised events under
/// optimistic concurrency.
pub struct Aggregator<S: EventStore> {
    store: Arc<S>,
}

impl<S: EventStore> Aggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Folds and returns the current projection without appending anything,
    /// for read-only callers (health polling, diagnostics) that would
    /// otherwise have to round-trip a no-op command through `execute_engine`.
    pub fn read_engine(&self, agg: &AggregateRef) -> Result<EngineState, AggregateError> {
        Ok(self.load_engine(agg)?.0)
    }

    pub fn read_flow(&self, agg: &AggregateRef) -> Result<FlowState, AggregateError> {
        Ok(self.load_flow(agg)?.0)
    }

    fn load_flow(&self, agg: &AggregateRef) -> Result<(FlowState, u64), AggregateError> {
        load_projection(self.store.as_ref(), agg, "flow_state", FlowState::new(flow_id_from_agg(agg)), apply_flow_event)
    }

    fn load_engine(&self, agg: &AggregateRef) -> Result<(EngineState, u64), AggregateError> {
        load_projection(self.store.as_ref(), agg, "engine_state", EngineState::default(), apply_engine_event)
    }

    /// Runs `handler` against the current [`FlowState`] for `flow_id`,
    /// retrying on conflict, and returns the post-commit projection.
    pub fn execute_flow<F>(&self, agg: &AggregateRef, now_ms: i64, handler: F) -> Result<FlowState, AggregateError>
    where
        F: FnMut(&FlowState) -> Result<Vec<NewEvent>, CommandError>,
    {
        Ok(self.execute_flow_traced(agg, now_ms, handler)?.0)
    }

    pub fn execute_engine<F>(&self, agg: &AggregateRef, mut handler: F) -> Result<EngineState, AggregateError>
    where
        F: FnMut(&EngineState) -> Result<Vec<NewEvent>, CommandError>,
    {
        Ok(self.execute_engine_traced(agg, handler)?.0)
    }

    /// As [`Self::execute_flow`], but also returns the events actually
    /// committed (with their assigned sequence), so a caller that drives
    /// side effects off a command's cascade — the orchestration layer that
    /// dispatches `work_started` to an executor or schedules a
    /// `retry_scheduled` task — doesn't have to re-diff the projection to
    /// find out what just happened.
    pub fn execute_flow_traced<F>(&self, agg: &AggregateRef, now_ms: i64, mut handler: F) -> Result<(FlowState, Vec<StoredEvent>), AggregateError>
    where
        F: FnMut(&FlowState) -> Result<Vec<NewEvent>, CommandError>,
    {
        let mut attempt = 0;
        loop {
            let (mut state, expected_seq) = self.load_flow(agg)?;
            let raised = handler(&state)?;
            match self.store.append(agg, expected_seq, raised) {
                Ok(stored) => {
                    for ev in &stored {
                        apply_flow_event(&mut state, &ev.event_type, &ev.data);
                    }
                    maybe_snapshot(self.store.as_ref(), agg, "flow_state", expected_seq + stored.len() as u64, &state);
                    return Ok((state, stored));
                }
                Err(crate::errors::StoreError::Conflict(_)) => {
                    attempt += 1;
                    if attempt >= AGGREGATOR_MAX_RETRIES {
                        return Err(AggregateError::ConcurrentWrite);
                    }
                }
                Err(e) => return Err(AggregateError::Store(e)),
            }
        }
    }

    pub fn execute_engine_traced<F>(&self, agg: &AggregateRef, mut handler: F) -> Result<(EngineState, Vec<StoredEvent>), AggregateError>
    where
        F: FnMut(&EngineState) -> Result<Vec<NewEvent>, CommandError>,
    {
        let mut attempt = 0;
        loop {
            let (mut state, expected_seq) = self.load_engine(agg)?;
            let raised = handler(&state)?;
            match self.store.append(agg, expected_seq, raised) {
                Ok(stored) => {
                    for ev in &stored {
                        apply_engine_event(&mut state, &ev.event_type, &ev.data);
                    }
                    maybe_snapshot(self.store.as_ref(), agg, "engine_state", expected_seq + stored.len() as u64, &state);
                    return Ok((state, stored));
                }
                Err(crate::errors::StoreError::Conflict(_)) => {
                    attempt += 1;
                    if attempt >= AGGREGATOR_MAX_RETRIES {
                        return Err(AggregateError::ConcurrentWrite);
                    }
                }
                Err(e) => return Err(AggregateError::Store(e)),
            }
        }
    }
}

fn flow_id_from_agg(agg: &AggregateRef) -> crate::model::FlowId {
    agg.id.clone().into()
}

fn load_projection<S, St, Apply>(store: &S, agg: &AggregateRef, projection: &str, seed: St, apply: Apply) -> Result<(St, u64), AggregateError>
where
    S: EventStore,
    St: serde::Serialize + serde::de::DeserializeOwned,
    Apply: Fn(&mut St, &str, &Value),
{
    let snapshot = store.load_snapshot(agg, projection)?;
    let (mut state, from_seq) = match snapshot {
        Some((seq, data)) => (serde_json::from_value(data).expect("snapshot must deserialize to its projection type"), seq),
        None => (seed, 0),
    };
    let events = store.load(agg)?;
    let mut last_seq = from_seq;
    for ev in events.into_iter().filter(|e| e.sequence > from_seq) {
        apply(&mut state, &ev.event_type, &ev.data);
        last_seq = ev.sequence;
    }
    Ok((state, last_seq))
}

fn maybe_snapshot<S, St>(store: &S, agg: &AggregateRef, projection: &str, sequence: u64, state: &St)
where
    S: EventStore,
    St: serde::Serialize,
{
    if sequence > 0 && sequence % SNAPSHOT_INTERVAL == 0 {
        let data = serde_json::to_value(state).expect("projection must serialize for snapshotting");
        if let Err(e) = store.save_snapshot(agg, projection, sequence, data) {
            tracing::warn!(error = %e, aggregate = %agg, "failed to write projection snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{AggregateKind, InMemoryEventStore};
    use crate::model::{ExecutionPlan, FlowId};
    use crate::runtime::FlowCommand;
    use indexmap::IndexMap;
    use serde_json::json;

    #[test]
    fn execute_flow_commits_cascade_and_returns_updated_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let aggregator = Aggregator::new(store);
        let agg = AggregateRef { kind: AggregateKind::Flow, id: "f1".into() };
        let plan = ExecutionPlan { goals: vec![], required: vec![], steps: vec![], attributes: IndexMap::new() };

        let state = aggregator
            .execute_flow(&agg, 1000, |s| {
                crate::runtime::handle_command(
                    s,
                    FlowCommand::Start { plan: plan.clone(), init: json!({}), metadata: json!(null) },
                    1000,
                    &crate::runtime::AlwaysTrue,
                    &crate::retry::DefaultRetryPolicy,
                    &crate::model::WorkConfig::default(),
                )
            })
            .unwrap();

        assert!(state.plan.is_some());
        assert_eq!(aggregator.store().last_sequence(&agg).unwrap(), 1);
    }

    #[test]
    fn reloading_after_commit_replays_to_the_same_state() {
        let store = Arc::new(InMemoryEventStore::new());
        let aggregator = Aggregator::new(store);
        let agg = AggregateRef { kind: AggregateKind::Flow, id: "f2".into() };
        let plan = ExecutionPlan { goals: vec![], required: vec![], steps: vec![], attributes: IndexMap::new() };

        let first = aggregator
            .execute_flow(&agg, 1000, |s| {
                crate::runtime::handle_command(
                    s,
                    FlowCommand::Start { plan: plan.clone(), init: json!({}), metadata: json!(null) },
                    1000,
                    &crate::runtime::AlwaysTrue,
                    &crate::retry::DefaultRetryPolicy,
                    &crate::model::WorkConfig::default(),
                )
            })
            .unwrap();

        let (reloaded, _) = aggregator.load_flow(&agg).unwrap();
        assert_eq!(first, reloaded);
        let _ = FlowId::from("f2");
    }
}
