//! flow-hub: the event bus fan-out surface (§6.2) sitting between a
//! committed append and whichever outside collaborator is watching —
//! the HTTP/WebSocket API, the archiver worker, the agent bridge. An
//! in-memory, best-effort broadcast bus with an at-least-once delivery
//! contract, the same "subscribers must be idempotent" discipline
//! `flow-core`'s event sourcing already assumes of projections.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use flow_core::event::{AggregateKind, StoredEvent};

/// The wire shape a subscriber receives (§6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
    pub id: (AggregateKind, String),
    pub timestamp: i64,
    pub sequence: u64,
}

impl HubEnvelope {
    pub fn from_stored(kind: AggregateKind, aggregate_id: &str, event: &StoredEvent) -> Self {
        Self {
            event_type: event.event_type.clone(),
            data: event.data.clone(),
            id: (kind, aggregate_id.to_string()),
            timestamp: event.timestamp_ms,
            sequence: event.global_sequence,
        }
    }
}

/// Server-side filter for a subscription request (§6.2): `aggregate_id` and
/// `event_types` narrow the live fan-out; `from_sequence` additionally
/// replays buffered history before attaching to the live stream.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub aggregate_id: Option<Vec<String>>,
    pub event_types: Option<Vec<String>>,
    pub from_sequence: Option<u64>,
}

impl SubscriptionFilter {
    fn matches(&self, envelope: &HubEnvelope) -> bool {
        if let Some(ids) = &self.aggregate_id {
            if !ids.contains(&envelope.id.1) {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&envelope.event_type) {
                return false;
            }
        }
        true
    }
}

/// A live subscription: a backlog drained first (the `from_sequence` replay,
/// if requested and still within the hub's retained window), then a
/// blocking/non-blocking receiver for everything published afterward.
pub struct Subscription {
    backlog: VecDeque<HubEnvelope>,
    receiver: mpsc::Receiver<HubEnvelope>,
}

impl Subscription {
    pub fn recv(&mut self) -> Option<HubEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        self.receiver.recv().ok()
    }

    pub fn try_recv(&mut self) -> Option<HubEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        self.receiver.try_recv().ok()
    }
}

const RETAINED_WINDOW: usize = 10_000;

struct Sink {
    filter: SubscriptionFilter,
    tx: mpsc::Sender<HubEnvelope>,
}

struct Inner {
    sinks: Vec<Sink>,
    ring: VecDeque<HubEnvelope>,
}

/// In-process fan-out bus. Not durable: a subscriber that was never attached
/// misses everything published before it subscribed, beyond what
/// `RETAINED_WINDOW` still holds in the ring buffer.
pub struct EventHub {
    inner: Mutex<Inner>,
}

impl EventHub {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner { sinks: Vec::new(), ring: VecDeque::new() }) }
    }

    pub fn publish(&self, envelope: HubEnvelope) {
        let mut inner = self.inner.lock().expect("event hub mutex poisoned");
        inner.ring.push_back(envelope.clone());
        if inner.ring.len() > RETAINED_WINDOW {
            inner.ring.pop_front();
        }
        inner.sinks.retain(|sink| {
            if !sink.filter.matches(&envelope) {
                return true;
            }
            sink.tx.send(envelope.clone()).is_ok()
        });
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        let (tx, rx) = mpsc::channel();
        let mut inner = self.inner.lock().expect("event hub mutex poisoned");

        let backlog: VecDeque<HubEnvelope> = match filter.from_sequence {
            Some(from) => inner.ring.iter().filter(|e| e.sequence >= from && filter.matches(e)).cloned().collect(),
            None => VecDeque::new(),
        };

        inner.sinks.push(Sink { filter, tx });
        Subscription { backlog, receiver: rx }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(event_type: &str, id: &str, sequence: u64) -> HubEnvelope {
        HubEnvelope { event_type: event_type.into(), data: json!({}), id: (AggregateKind::Flow, id.into()), timestamp: 0, sequence }
    }

    #[test]
    fn subscriber_only_receives_matching_events() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe(SubscriptionFilter { aggregate_id: Some(vec!["f1".into()]), ..Default::default() });

        hub.publish(envelope("flow_started", "f1", 1));
        hub.publish(envelope("flow_started", "f2", 2));

        let received = sub.try_recv().unwrap();
        assert_eq!(received.id.1, "f1");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn event_type_filter_narrows_delivery() {
        let hub = EventHub::new();
        let mut sub = hub.subscribe(SubscriptionFilter { event_types: Some(vec!["attribute_set".into()]), ..Default::default() });

        hub.publish(envelope("flow_started", "f1", 1));
        hub.publish(envelope("attribute_set", "f1", 2));

        let received = sub.try_recv().unwrap();
        assert_eq!(received.event_type, "attribute_set");
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn from_sequence_replays_retained_history_before_live_events() {
        let hub = EventHub::new();
        hub.publish(envelope("flow_started", "f1", 1));
        hub.publish(envelope("attribute_set", "f1", 2));

        let mut sub = hub.subscribe(SubscriptionFilter { from_sequence: Some(2), ..Default::default() });
        hub.publish(envelope("step_dispatched", "f1", 3));

        assert_eq!(sub.recv().unwrap().sequence, 2);
        assert_eq!(sub.recv().unwrap().sequence, 3);
    }

    #[test]
    fn dropped_subscriber_is_pruned_on_next_publish() {
        let hub = EventHub::new();
        {
            let _sub = hub.subscribe(SubscriptionFilter::default());
        }
        hub.publish(envelope("flow_started", "f1", 1));
        assert_eq!(hub.inner.lock().unwrap().sinks.len(), 0);
    }
}
