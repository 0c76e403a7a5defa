//! flow-persistence: the durable, Postgres-backed counterpart to
//! `flow_core::event::InMemoryEventStore`, plus archival hibernation (§4.1,
//! §6.4). The event log is keyed by `(aggregate_kind, aggregate_id)` rather
//! than a bare flow id, so one store serves both flow and engine aggregates.

pub mod archive;
pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use archive::{ArchiveError, ArchiveRecord, ArchiveSink, LocalFileArchiveSink};
pub use config::DbConfig;
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgEventStore, PgPool, PoolProvider};
