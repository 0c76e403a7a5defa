//! Event envelope, closed event-type catalog, and the [`EventStore`]
//! contract (§3's event envelope, §6.3, §4.1).

pub mod envelope;
pub mod store;
pub mod types;

pub use envelope::{AggregateKind, AggregateRef, NewEvent, StoredEvent};
pub use store::{EventStore, InMemoryEventStore};
