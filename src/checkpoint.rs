//! Resume checkpoints.
//!
//! The replicator persists one checkpoint at shutdown: the lowest position any
//! buffer has applied up to. Buffers run at different speeds, so the slowest
//! one decides where a restart must begin; faster buffers replay a little.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ReplicationError, Result};
use crate::position::LogPosition;

/// Persisted checkpoint record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub file: String,
    pub position: u32,
}

impl TryFrom<&LogPosition> for CheckpointRecord {
    type Error = ReplicationError;

    fn try_from(p: &LogPosition) -> Result<Self> {
        let position = u32::try_from(p.offset).map_err(|_| {
            ReplicationError::Shutdown(format!("binlog offset {p} does not fit in 32 bits"))
        })?;
        Ok(Self {
            file: p.file.clone(),
            position,
        })
    }
}

impl From<CheckpointRecord> for LogPosition {
    fn from(r: CheckpointRecord) -> Self {
        LogPosition::new(r.file, u64::from(r.position))
    }
}

/// Global resume point: the lowest of the per-buffer floors, or `previous`
/// when no buffer has one.
pub fn resume_position<'a, I>(floors: I, previous: Option<&LogPosition>) -> Option<LogPosition>
where
    I: IntoIterator<Item = &'a LogPosition>,
{
    floors.into_iter().min().or(previous).cloned()
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self) -> Result<Option<CheckpointRecord>>;
    async fn save(&self, record: &CheckpointRecord) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    record: Mutex<Option<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new(initial: Option<CheckpointRecord>) -> Self {
        Self {
            record: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> Option<CheckpointRecord> {
        self.record
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> Result<Option<CheckpointRecord>> {
        Ok(self.get())
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        *self.record.lock().unwrap_or_else(|p| p.into_inner()) = Some(record.clone());
        Ok(())
    }
}

/// JSON file store. Writes go to a sibling temp file that is renamed over the
/// target, so a crash never leaves a torn record.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn shutdown_err(what: &str, path: &Path, e: impl std::fmt::Display) -> ReplicationError {
    ReplicationError::Shutdown(format!("{what} {}: {e}", path.display()))
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self) -> Result<Option<CheckpointRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ReplicationError::Config(format!(
                "cannot read checkpoint {}: {e}",
                self.path.display()
            ))),
        };
        let record = serde_json::from_str(&contents).map_err(|e| {
            ReplicationError::Config(format!(
                "corrupt checkpoint {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(Some(record))
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let temp_path = self.path.with_extension("tmp");
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| shutdown_err("cannot encode checkpoint for", &self.path, e))?;

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| shutdown_err("cannot create", &temp_path, e))?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| shutdown_err("cannot write", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| shutdown_err("cannot sync", &temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| shutdown_err("cannot replace", &self.path, e))?;
        debug!(path = %self.path.display(), file = %record.file, position = record.position, "checkpoint saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_conversions() {
        let p = LogPosition::new("mysql-bin.000007", 1234);
        let r = CheckpointRecord::try_from(&p).unwrap();
        assert_eq!(r.position, 1234);
        assert_eq!(LogPosition::from(r), p);

        let huge = LogPosition::new("mysql-bin.000007", u64::from(u32::MAX) + 1);
        let err = CheckpointRecord::try_from(&huge).unwrap_err();
        assert!(matches!(err, ReplicationError::Shutdown(_)));
    }

    #[test]
    fn resume_position_is_minimum_across_buffers() {
        let floors = [
            LogPosition::new("file1", 500),
            LogPosition::new("file1", 300),
            LogPosition::new("file2", 700),
        ];
        let previous = LogPosition::new("file1", 4);
        assert_eq!(
            resume_position(&floors, Some(&previous)),
            Some(LogPosition::new("file1", 300))
        );
        assert_eq!(resume_position([], Some(&previous)), Some(previous));
        assert_eq!(resume_position([], None), None);
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCheckpointStore::default();
        assert_eq!(store.load().await.unwrap(), None);
        let r = CheckpointRecord {
            file: "mysql-bin.000001".into(),
            position: 4,
        };
        store.save(&r).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn file_store_persists_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        let store = FileCheckpointStore::new(&path);
        assert_eq!(store.load().await.unwrap(), None);

        let r = CheckpointRecord {
            file: "mysql-bin.000002".into(),
            position: 891,
        };
        store.save(&r).await.unwrap();
        assert!(!path.with_extension("tmp").exists());

        let raw = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["file"], "mysql-bin.000002");
        assert_eq!(json["position"], 891);

        let reopened = FileCheckpointStore::new(&path);
        assert_eq!(reopened.load().await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn corrupt_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");
        std::fs::write(&path, "not json").unwrap();
        let err = FileCheckpointStore::new(&path).load().await.unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn save_into_missing_directory_is_shutdown_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("missing").join("cp.json"));
        let r = CheckpointRecord {
            file: "f.000001".into(),
            position: 4,
        };
        let err = store.save(&r).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Shutdown(_)));
    }
}
