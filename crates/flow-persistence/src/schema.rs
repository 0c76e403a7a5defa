//! Diesel schema, hand-written rather than `diesel print-schema`d (no
//! running database in this workspace to introspect against).
//!
//! Tables:
//! - `event_log`: append-only per-aggregate log, `(aggregate_kind,
//!   aggregate_id, sequence)` uniquely identifying a row, `global_sequence`
//!   monotone across every aggregate for fan-out ordering (§6.2).
//! - `aggregate_snapshots`: at most one row per `(aggregate_kind,
//!   aggregate_id, projection)`, replaced on every snapshot write.
//! - `aggregate_hibernation`: presence of a row marks an aggregate detached
//!   from active storage (§4.1).

diesel::table! {
    event_log (id) {
        id -> BigInt,
        aggregate_kind -> Text,
        aggregate_id -> Text,
        sequence -> BigInt,
        global_sequence -> BigInt,
        ts_ms -> BigInt,
        event_type -> Text,
        payload -> Jsonb,
    }
}

diesel::table! {
    aggregate_snapshots (aggregate_kind, aggregate_id, projection) {
        aggregate_kind -> Text,
        aggregate_id -> Text,
        projection -> Text,
        sequence -> BigInt,
        data -> Jsonb,
    }
}

diesel::table! {
    aggregate_hibernation (aggregate_kind, aggregate_id) {
        aggregate_kind -> Text,
        aggregate_id -> Text,
        hibernated_at_ms -> BigInt,
    }
}

diesel::allow_tables_to_appear_in_same_query!(event_log, aggregate_snapshots, aggregate_hibernation,);
