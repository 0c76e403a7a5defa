//! Wrapper around the embedded migration set. Matching the schema in
//! `schema.rs`, the migration directory (`migrations/`, sibling to `src/`)
//! creates `event_log`, `aggregate_snapshots`, and `aggregate_hibernation`
//! with the unique indexes the store's CAS and snapshot-replace semantics
//! depend on.

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::error::PersistenceError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

pub fn run_pending_migrations(conn: &mut PgConnection) -> Result<(), PersistenceError> {
    conn.batch_execute("CREATE EXTENSION IF NOT EXISTS pgcrypto;").ok();
    conn.run_pending_migrations(MIGRATIONS).map(|_| ()).map_err(|e| PersistenceError::Unknown(format!("migration error: {e}")))
}
