//! Event store contract (§4.1) and an in-memory reference implementation.
//!
//! The in-memory implementation keeps a `HashMap<(AggregateKind, String),
//! Vec<Event>>` with a 1-based monotonic `seq` per aggregate, internally
//! synchronized (a `Mutex`) since the aggregator runs across multiple worker
//! threads rather than a single synchronous loop.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

use super::envelope::{AggregateKind, AggregateRef, NewEvent, StoredEvent};
use crate::errors::StoreError;

/// Durable, append-only per-aggregate event log with snapshotting and
/// archival hibernation. Implementors must guarantee: appends under a given
/// `AggregateRef` are linearizable by `sequence`; `append` is a compare-and-
/// swap on the aggregate's last sequence.
pub trait EventStore: Send + Sync {
    /// Appends `events` iff the aggregate's current last sequence equals
    /// `expected_seq` (0 for a brand-new aggregate). Returns the
    /// newly-stored, sequenced events on success.
    fn append(&self, agg: &AggregateRef, expected_seq: u64, events: Vec<NewEvent>) -> Result<Vec<StoredEvent>, StoreError>;

    /// All events for `agg` in ascending sequence order.
    fn load(&self, agg: &AggregateRef) -> Result<Vec<StoredEvent>, StoreError>;

    /// The last committed sequence for `agg`, or 0 if none.
    fn last_sequence(&self, agg: &AggregateRef) -> Result<u64, StoreError>;

    /// Persists a projection snapshot at the sequence it was folded up to.
    /// `projection` names the projection kind (e.g. `"flow_state"`), since an
    /// aggregate kind may in principle be folded into more than one shape.
    fn save_snapshot(&self, agg: &AggregateRef, projection: &str, sequence: u64, data: Value) -> Result<(), StoreError>;

    /// The most recently saved snapshot for `(agg, projection)`, if any.
    fn load_snapshot(&self, agg: &AggregateRef, projection: &str) -> Result<Option<(u64, Value)>, StoreError>;

    /// Detaches `agg` from active storage (§4.1 archival hibernation). A
    /// hibernated aggregate remains readable via `load`/`load_snapshot` but
    /// is excluded from `list_active`.
    fn hibernate(&self, agg: &AggregateRef) -> Result<(), StoreError>;

    fn is_hibernated(&self, agg: &AggregateRef) -> Result<bool, StoreError>;

    /// Non-hibernated aggregate ids of a given kind, in no particular order.
    fn list_active(&self, kind: AggregateKind) -> Result<Vec<String>, StoreError>;
}

struct AggregateLog {
    events: Vec<StoredEvent>,
    snapshots: HashMap<String, (u64, Value)>,
    hibernated: bool,
}

impl AggregateLog {
    fn new() -> Self {
        Self { events: Vec::new(), snapshots: HashMap::new(), hibernated: false }
    }
}

#[derive(Default)]
struct Inner {
    logs: HashMap<(AggregateKind, String), AggregateLog>,
    global_seq: u64,
}

/// Volatile, process-local [`EventStore`]. Data is lost on process exit; the
/// Postgres-backed implementation in `flow-persistence` is the durable
/// counterpart with an identical contract.
pub struct InMemoryEventStore {
    inner: Mutex<Inner>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    fn key(agg: &AggregateRef) -> (AggregateKind, String) {
        (agg.kind, agg.id.clone())
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(&self, agg: &AggregateRef, expected_seq: u64, events: Vec<NewEvent>) -> Result<Vec<StoredEvent>, StoreError> {
        let mut inner = self.inner.lock().expect("event store mutex poisoned");
        let key = Self::key(agg);
        let current_seq = inner.logs.get(&key).map(|l| l.events.len() as u64).unwrap_or(0);
        if current_seq != expected_seq {
            return Err(StoreError::Conflict(agg.to_string()));
        }
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut stored = Vec::with_capacity(events.len());
        for (i, ev) in events.into_iter().enumerate() {
            inner.global_seq += 1;
            stored.push(StoredEvent {
                sequence: expected_seq + i as u64 + 1,
                global_sequence: inner.global_seq,
                timestamp_ms: now_ms,
                event_type: ev.event_type,
                data: ev.data,
            });
        }
        let log = inner.logs.entry(key).or_insert_with(AggregateLog::new);
        log.events.extend(stored.clone());
        Ok(stored)
    }

    fn load(&self, agg: &AggregateRef) -> Result<Vec<StoredEvent>, StoreError> {
        let inner = self.inner.lock().expect("event store mutex poisoned");
        Ok(inner.logs.get(&Self::key(agg)).map(|l| l.events.clone()).unwrap_or_default())
    }

    fn last_sequence(&self, agg: &AggregateRef) -> Result<u64, StoreError> {
        let inner = self.inner.lock().expect("event store mutex poisoned");
        Ok(inner.logs.get(&Self::key(agg)).map(|l| l.events.len() as u64).unwrap_or(0))
    }

    fn save_snapshot(&self, agg: &AggregateRef, projection: &str, sequence: u64, data: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("event store mutex poisoned");
        let log = inner.logs.entry(Self::key(agg)).or_insert_with(AggregateLog::new);
        log.snapshots.insert(projection.to_string(), (sequence, data));
        Ok(())
    }

    fn load_snapshot(&self, agg: &AggregateRef, projection: &str) -> Result<Option<(u64, Value)>, StoreError> {
        let inner = self.inner.lock().expect("event store mutex poisoned");
        Ok(inner.logs.get(&Self::key(agg)).and_then(|l| l.snapshots.get(projection).cloned()))
    }

    fn hibernate(&self, agg: &AggregateRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("event store mutex poisoned");
        match inner.logs.get_mut(&Self::key(agg)) {
            Some(log) => {
                log.hibernated = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(agg.to_string())),
        }
    }

    fn is_hibernated(&self, agg: &AggregateRef) -> Result<bool, StoreError> {
        let inner = self.inner.lock().expect("event store mutex poisoned");
        Ok(inner.logs.get(&Self::key(agg)).map(|l| l.hibernated).unwrap_or(false))
    }

    fn list_active(&self, kind: AggregateKind) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().expect("event store mutex poisoned");
        Ok(inner
            .logs
            .iter()
            .filter(|((k, _), log)| *k == kind && !log.hibernated)
            .map(|((_, id), _)| id.clone())
            .collect())
    }
}
