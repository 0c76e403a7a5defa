//! Archival hibernation (§4.1, §6.4): when the engine reserves a deactivated
//! flow for archival, the actual byte-moving is delegated to a pluggable
//! sink so the object-storage backend an operator picks never has to live
//! in this crate. The local filesystem implementation is the one exercised
//! by the development binary; it is not meant for production retention.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use flow_core::event::{AggregateRef, StoredEvent};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive IO error: {0}")]
    Io(String),
    #[error("archive serialization error: {0}")]
    Serde(String),
}

/// `{events, snapshots}` for one aggregate, the full record an archiver
/// worker writes out and a future restore path would read back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub events: Vec<StoredEvent>,
    pub snapshots: Vec<(String, u64, Value)>,
}

pub trait ArchiveSink: Send + Sync {
    fn write(&self, agg: &AggregateRef, record: &ArchiveRecord) -> Result<(), ArchiveError>;

    fn read(&self, agg: &AggregateRef) -> Result<Option<ArchiveRecord>, ArchiveError>;
}

/// Writes to `<prefix>/<kind>/<id>.json`, the layout named in §6.4.
pub struct LocalFileArchiveSink {
    prefix: PathBuf,
}

impl LocalFileArchiveSink {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self { prefix: prefix.into() }
    }

    fn path_for(&self, agg: &AggregateRef) -> PathBuf {
        self.prefix.join(agg.kind.to_string()).join(format!("{}.json", agg.id))
    }
}

impl ArchiveSink for LocalFileArchiveSink {
    fn write(&self, agg: &AggregateRef, record: &ArchiveRecord) -> Result<(), ArchiveError> {
        let path = self.path_for(agg);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ArchiveError::Io(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| ArchiveError::Serde(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| ArchiveError::Io(e.to_string()))
    }

    fn read(&self, agg: &AggregateRef) -> Result<Option<ArchiveRecord>, ArchiveError> {
        let path = self.path_for(agg);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(|e| ArchiveError::Io(e.to_string()))?;
        serde_json::from_slice(&bytes).map(Some).map_err(|e| ArchiveError::Serde(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flow_core::event::AggregateKind;

    #[test]
    fn round_trips_an_archive_record_through_the_filesystem() {
        let dir = std::env::temp_dir().join(format!("flow-archive-test-{}", std::process::id()));
        let sink = LocalFileArchiveSink::new(&dir);
        let agg = AggregateRef { kind: AggregateKind::Flow, id: "f-archival-test".into() };
        let record = ArchiveRecord {
            events: vec![StoredEvent {
                sequence: 1,
                global_sequence: 1,
                timestamp_ms: 0,
                event_type: "flow_started".into(),
                data: Value::Null,
            }],
            snapshots: vec![],
        };

        sink.write(&agg, &record).unwrap();
        let loaded = sink.read(&agg).unwrap().unwrap();
        assert_eq!(loaded.events.len(), 1);

        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_archive_reads_as_none() {
        let dir = std::env::temp_dir().join(format!("flow-archive-test-missing-{}", std::process::id()));
        let sink = LocalFileArchiveSink::new(&dir);
        let agg = AggregateRef { kind: AggregateKind::Engine, id: "engine".into() };
        assert!(sink.read(&agg).unwrap().is_none());
    }
}
