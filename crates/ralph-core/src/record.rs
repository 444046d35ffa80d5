//! Append-only log of what happened each iteration. Distinct from the Task
//! Store: tasks are mutable current state, records are history -- one file
//! per iteration, never rewritten after creation.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("iteration record {0} already exists")]
    AlreadyExists(String),

    #[error("iteration record {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationOutcome {
    Success,
    VerificationFailed,
    AgentFailed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration_id: String,
    pub task_id: String,
    pub base_commit: String,
    pub outcome: IterationOutcome,
    #[serde(default)]
    pub files_changed: Vec<String>,
    pub failure_signature: Option<String>,
    pub attempt_number: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// File-per-iteration-record store under `.ralph/logs/`. Records are never
/// updated in place once written.
#[derive(Debug, Clone)]
pub struct RecordStore {
    logs_dir: PathBuf,
}

impl RecordStore {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
        }
    }

    fn path_for(&self, iteration_id: &str) -> PathBuf {
        self.logs_dir.join(format!("iteration-{iteration_id}.json"))
    }

    /// Persist a new record. Errors if one with the same id already exists
    /// -- records are append-only, never overwritten.
    pub fn append(&self, record: &IterationRecord) -> Result<(), RecordStoreError> {
        let path = self.path_for(&record.iteration_id);
        if path.exists() {
            return Err(RecordStoreError::AlreadyExists(record.iteration_id.clone()));
        }
        std::fs::create_dir_all(&self.logs_dir)?;
        let json = serde_json::to_string_pretty(record)?;
        let tmp_path = self
            .logs_dir
            .join(format!(".iteration-{}.json.tmp", record.iteration_id));
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    pub fn get(&self, iteration_id: &str) -> Result<IterationRecord, RecordStoreError> {
        let path = self.path_for(iteration_id);
        let contents = std::fs::read_to_string(&path)
            .map_err(|_| RecordStoreError::NotFound(iteration_id.to_string()))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// All records for `task_id`, ordered by start_time ascending. This is
    /// the sequence the Gutter Detector reasons over.
    pub fn for_task(&self, task_id: &str) -> Result<Vec<IterationRecord>, RecordStoreError> {
        let mut records = self.all()?;
        records.retain(|r| r.task_id == task_id);
        records.sort_by_key(|r| r.start_time);
        Ok(records)
    }

    /// Every record in the store, unordered.
    pub fn all(&self) -> Result<Vec<IterationRecord>, RecordStoreError> {
        let mut records = Vec::new();
        if !self.logs_dir.is_dir() {
            return Ok(records);
        }
        for entry in std::fs::read_dir(&self.logs_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with("iteration-") || !name.ends_with(".json") {
                continue;
            }
            let contents = std::fs::read_to_string(entry.path())?;
            records.push(serde_json::from_str(&contents)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(id: &str, task_id: &str, outcome: IterationOutcome, offset_secs: i64) -> IterationRecord {
        let start = Utc::now() + Duration::seconds(offset_secs);
        IterationRecord {
            iteration_id: id.to_string(),
            task_id: task_id.to_string(),
            base_commit: "deadbeef".to_string(),
            outcome,
            files_changed: vec!["src/lib.rs".to_string()],
            failure_signature: None,
            attempt_number: 1,
            start_time: start,
            end_time: start + Duration::seconds(30),
        }
    }

    #[test]
    fn append_then_get_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let rec = record("iter-1", "t1", IterationOutcome::Success, 0);
        store.append(&rec).unwrap();
        assert_eq!(store.get("iter-1").unwrap(), rec);
    }

    #[test]
    fn append_rejects_duplicate_id() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        let rec = record("iter-1", "t1", IterationOutcome::Success, 0);
        store.append(&rec).unwrap();
        assert!(matches!(
            store.append(&rec),
            Err(RecordStoreError::AlreadyExists(_))
        ));
    }

    #[test]
    fn for_task_filters_and_orders_by_start_time() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        store.append(&record("iter-2", "t1", IterationOutcome::VerificationFailed, 10)).unwrap();
        store.append(&record("iter-1", "t1", IterationOutcome::AgentFailed, 0)).unwrap();
        store.append(&record("iter-3", "t2", IterationOutcome::Success, 5)).unwrap();

        let for_t1 = store.for_task("t1").unwrap();
        assert_eq!(for_t1.len(), 2);
        assert_eq!(for_t1[0].iteration_id, "iter-1");
        assert_eq!(for_t1[1].iteration_id, "iter-2");
    }

    #[test]
    fn missing_record_is_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::new(dir.path());
        assert!(matches!(
            store.get("nope"),
            Err(RecordStoreError::NotFound(_))
        ));
    }

    #[test]
    fn all_on_uninitialized_dir_is_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::new(dir.path().join("missing"));
        assert!(store.all().unwrap().is_empty());
    }
}
