//! Postgres (Diesel) implementation of `flow_core::EventStore` (§4.1),
//! parity with [`flow_core::event::InMemoryEventStore`]: same CAS-on-append
//! contract, same snapshot/hibernation semantics, backed by durable tables
//! instead of a `Mutex<HashMap<_, _>>`.

use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};
use serde_json::Value;

use flow_core::errors::StoreError;
use flow_core::event::{AggregateKind, AggregateRef, EventStore, NewEvent, StoredEvent};

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{aggregate_hibernation, aggregate_snapshots, event_log};

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Abstracts connection acquisition so unit tests can stand in a fake
/// provider without pulling in r2d2 and a live database.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<r2d2::PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

#[derive(Insertable)]
#[diesel(table_name = event_log)]
struct NewEventRow<'a> {
    aggregate_kind: &'a str,
    aggregate_id: &'a str,
    sequence: i64,
    ts_ms: i64,
    event_type: &'a str,
    payload: &'a Value,
}

#[derive(Queryable)]
struct EventRow {
    _id: i64,
    _aggregate_kind: String,
    _aggregate_id: String,
    sequence: i64,
    global_sequence: i64,
    ts_ms: i64,
    event_type: String,
    payload: Value,
}

fn deserialize_row(row: EventRow) -> StoredEvent {
    StoredEvent {
        sequence: row.sequence as u64,
        global_sequence: row.global_sequence as u64,
        timestamp_ms: row.ts_ms,
        event_type: row.event_type,
        data: row.payload,
    }
}

/// Up to 3 retries of 15/30/45ms on transient errors, applied uniformly to
/// append/load/snapshot calls against the backing pool.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
where
    F: FnMut() -> Result<T, PersistenceError>,
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < 3 => {
                let delay_ms = 15 * (attempts + 1) as u64;
                tracing::warn!(attempt = attempts + 1, error = %e, delay_ms, "retrying transient persistence error");
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

pub struct PgEventStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgEventStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

impl<P: ConnectionProvider> EventStore for PgEventStore<P> {
    fn append(&self, agg: &AggregateRef, expected_seq: u64, events: Vec<NewEvent>) -> Result<Vec<StoredEvent>, StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();

        let result: Result<Vec<StoredEvent>, PersistenceError> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx_conn| {
                    let current: i64 = event_log::table
                        .filter(event_log::aggregate_kind.eq(&kind))
                        .filter(event_log::aggregate_id.eq(&id))
                        .select(diesel::dsl::max(event_log::sequence))
                        .for_update()
                        .first::<Option<i64>>(tx_conn)?
                        .unwrap_or(0);

                    if current as u64 != expected_seq {
                        return Err(diesel::result::Error::RollbackTransaction);
                    }

                    let now_ms = chrono::Utc::now().timestamp_millis();
                    let mut rows = Vec::with_capacity(events.len());
                    for (i, ev) in events.iter().enumerate() {
                        rows.push(NewEventRow {
                            aggregate_kind: &kind,
                            aggregate_id: &id,
                            sequence: expected_seq as i64 + i as i64 + 1,
                            ts_ms: now_ms,
                            event_type: &ev.event_type,
                            payload: &ev.data,
                        });
                    }

                    let inserted: Vec<EventRow> = diesel::insert_into(event_log::table)
                        .values(&rows)
                        .returning((
                            event_log::id,
                            event_log::aggregate_kind,
                            event_log::aggregate_id,
                            event_log::sequence,
                            event_log::global_sequence,
                            event_log::ts_ms,
                            event_log::event_type,
                            event_log::payload,
                        ))
                        .get_results(tx_conn)?;

                    Ok(inserted.into_iter().map(deserialize_row).collect())
                })
                .map_err(|e| match e {
                    diesel::result::Error::RollbackTransaction => PersistenceError::SerializationConflict,
                    other => PersistenceError::from(other),
                })
        });

        match result {
            Ok(stored) => Ok(stored),
            Err(PersistenceError::SerializationConflict) => Err(StoreError::Conflict(agg.to_string())),
            Err(other) => Err(other.into()),
        }
    }

    fn load(&self, agg: &AggregateRef) -> Result<Vec<StoredEvent>, StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        let rows: Vec<EventRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            event_log::table
                .filter(event_log::aggregate_kind.eq(&kind))
                .filter(event_log::aggregate_id.eq(&id))
                .order(event_log::sequence.asc())
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)?;
        Ok(rows.into_iter().map(deserialize_row).collect())
    }

    fn last_sequence(&self, agg: &AggregateRef) -> Result<u64, StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        let current: Option<i64> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            event_log::table
                .filter(event_log::aggregate_kind.eq(&kind))
                .filter(event_log::aggregate_id.eq(&id))
                .select(diesel::dsl::max(event_log::sequence))
                .first(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)?;
        Ok(current.unwrap_or(0) as u64)
    }

    fn save_snapshot(&self, agg: &AggregateRef, projection: &str, sequence: u64, data: Value) -> Result<(), StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        let projection = projection.to_string();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(aggregate_snapshots::table)
                .values((
                    aggregate_snapshots::aggregate_kind.eq(&kind),
                    aggregate_snapshots::aggregate_id.eq(&id),
                    aggregate_snapshots::projection.eq(&projection),
                    aggregate_snapshots::sequence.eq(sequence as i64),
                    aggregate_snapshots::data.eq(&data),
                ))
                .on_conflict((aggregate_snapshots::aggregate_kind, aggregate_snapshots::aggregate_id, aggregate_snapshots::projection))
                .do_update()
                .set((aggregate_snapshots::sequence.eq(sequence as i64), aggregate_snapshots::data.eq(&data)))
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)
    }

    fn load_snapshot(&self, agg: &AggregateRef, projection: &str) -> Result<Option<(u64, Value)>, StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        let projection = projection.to_string();
        let row: Option<(i64, Value)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            aggregate_snapshots::table
                .filter(aggregate_snapshots::aggregate_kind.eq(&kind))
                .filter(aggregate_snapshots::aggregate_id.eq(&id))
                .filter(aggregate_snapshots::projection.eq(&projection))
                .select((aggregate_snapshots::sequence, aggregate_snapshots::data))
                .first(&mut conn)
                .optional()
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)?;
        Ok(row.map(|(seq, data)| (seq as u64, data)))
    }

    fn hibernate(&self, agg: &AggregateRef) -> Result<(), StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(aggregate_hibernation::table)
                .values((
                    aggregate_hibernation::aggregate_kind.eq(&kind),
                    aggregate_hibernation::aggregate_id.eq(&id),
                    aggregate_hibernation::hibernated_at_ms.eq(chrono::Utc::now().timestamp_millis()),
                ))
                .on_conflict_do_nothing()
                .execute(&mut conn)
                .map(|_| ())
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)
    }

    fn is_hibernated(&self, agg: &AggregateRef) -> Result<bool, StoreError> {
        let kind = agg.kind.to_string();
        let id = agg.id.clone();
        let exists: bool = with_retry(|| {
            let mut conn = self.provider.connection()?;
            aggregate_hibernation::table
                .filter(aggregate_hibernation::aggregate_kind.eq(&kind))
                .filter(aggregate_hibernation::aggregate_id.eq(&id))
                .count()
                .get_result::<i64>(&mut conn)
                .map(|c| c > 0)
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)?;
        Ok(exists)
    }

    fn list_active(&self, kind: AggregateKind) -> Result<Vec<String>, StoreError> {
        let kind = kind.to_string();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            let hibernated_ids = aggregate_hibernation::table
                .filter(aggregate_hibernation::aggregate_kind.eq(&kind))
                .select(aggregate_hibernation::aggregate_id)
                .load::<String>(&mut conn)?;

            event_log::table
                .filter(event_log::aggregate_kind.eq(&kind))
                .filter(event_log::aggregate_id.ne_all(hibernated_ids))
                .select(event_log::aggregate_id)
                .distinct()
                .load(&mut conn)
                .map_err(PersistenceError::from)
        })
        .map_err(StoreError::from)
    }
}

pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let min = min_size.max(1);
    let max = max_size.max(1).max(min);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .min_idle(Some(min))
        .max_size(max)
        .build(manager)
        .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get().map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
