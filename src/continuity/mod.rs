//! Session continuity store.
//!
//! Append-only event log, per-task records, and bounded recovery checkpoints
//! on plain JSON files. Every write is durable before it returns: events are
//! appended and fsynced, records and checkpoints go through a temp file plus
//! an atomic rename, so a half-written state is never observable.
//!
//! The store is the only process-wide mutable resource in the core. All
//! writes serialize through one internal lock; readers take the same lock
//! briefly to get a consistent view.
//!
//! Layout under the store root:
//!
//! ```text
//! sessions/<date>.log.jsonl    append-only, one SessionEvent per line
//! tasks/<task_id>.json         one file per task, atomic rewrite
//! tasks/active.json            index of non-terminal task ids
//! checkpoints/latest.json      <= 2 KB, atomic rewrite
//! checkpoints/<id>.json        historical checkpoints
//! ```

use crate::error::CoreError;
use crate::validator::FixTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Hard cap on a serialized checkpoint.
pub const CHECKPOINT_MAX_BYTES: usize = 2048;

// ─── Records ─────────────────────────────────────────────────

/// Pipeline transition kinds journaled per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Classify,
    Delegate,
    Validate,
    Retry,
    Escalate,
    Complete,
    Error,
}

/// One append-only journal entry. `correlation_id` is the task id so
/// consumers can demultiplex interleaved tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub correlation_id: String,
}

impl SessionEvent {
    pub fn new(kind: EventKind, correlation_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            payload,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Task lifecycle states. `Validated` and `Failed` and `Abandoned` are
/// terminal; everything else counts as pending on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Validated,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Validated | TaskStatus::Failed | TaskStatus::Abandoned
        )
    }
}

/// One delegation against one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub model_id: String,
    pub score: u8,
    pub cost: f64,
    pub latency_ms: u64,
    pub tier: FixTier,
}

/// Persisted task state; mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub attempts: Vec<Attempt>,
    pub final_artifact_ref: Option<String>,
}

impl TaskRecord {
    pub fn new(task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: task_id.into(),
            created_at: now,
            updated_at: now,
            status: TaskStatus::Pending,
            attempts: Vec::new(),
            final_artifact_ref: None,
        }
    }

    /// Derive a stable, content-addressed task id.
    pub fn derive_id(task: &str) -> String {
        let digest = Sha256::digest(task.as_bytes());
        hex_prefix(&digest, 16)
    }
}

/// Minimal recovery manifest, always <= `CHECKPOINT_MAX_BYTES` serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub active_task_ids: Vec<String>,
    pub last_events_summary: String,
    pub state_hash: String,
}

/// What `resume()` hands back after an interruption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub last_checkpoint: Option<Checkpoint>,
    pub pending_tasks: Vec<TaskRecord>,
}

// ─── Store ───────────────────────────────────────────────────

/// File-backed continuity store with a single-writer discipline.
pub struct ContinuityStore {
    root: PathBuf,
    lock: Mutex<()>,
}

impl ContinuityStore {
    /// Open (creating directories as needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        for dir in ["sessions", "tasks", "checkpoints"] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|e| CoreError::persistence(&path, e))?;
        }
        tracing::info!(root = %root.display(), "continuity store ready");
        Ok(Self {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Append one event to today's session log and fsync before returning.
    /// After this returns, `resume()`/`recent_events()` observe the event.
    pub fn append_event(&self, event: &SessionEvent) -> Result<(), CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let path = self.session_log_path(event.timestamp);
        let line = serde_json::to_string(event)
            .map_err(|e| CoreError::persistence(&path, std::io::Error::other(e)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| CoreError::persistence(&path, e))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_all())
            .map_err(|e| CoreError::persistence(&path, e))?;
        Ok(())
    }

    /// Upsert a task record. Last write wins by `updated_at`; an older write
    /// against a newer on-disk record is skipped.
    pub fn put_task(&self, record: &TaskRecord) -> Result<(), CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let path = self.task_path(&record.task_id);

        if let Some(existing) = read_json::<TaskRecord>(&path)? {
            if existing.updated_at > record.updated_at {
                tracing::debug!(task_id = %record.task_id, "skipped stale task write");
                return Ok(());
            }
        }

        write_json_atomic(&path, record)?;
        self.update_active_index(&record.task_id, record.status)?;
        Ok(())
    }

    /// Load one task record.
    pub fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>, CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        read_json(&self.task_path(task_id))
    }

    /// Write a recovery checkpoint from caller-supplied digests. The result
    /// is guaranteed to serialize to at most `CHECKPOINT_MAX_BYTES`; if the
    /// naive form is larger, the summary is dropped in favor of a pointer to
    /// `tasks/active.json`, then the id list itself is truncated.
    pub fn checkpoint(
        &self,
        active_task_ids: &[String],
        last_events_summary: &str,
    ) -> Result<Checkpoint, CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");

        let mut checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            active_task_ids: active_task_ids.to_vec(),
            last_events_summary: last_events_summary.to_string(),
            state_hash: state_hash(active_task_ids, last_events_summary),
        };

        if serialized_len(&checkpoint)? > CHECKPOINT_MAX_BYTES {
            tracing::warn!(
                ids = active_task_ids.len(),
                "checkpoint over size cap; falling back to ids plus pointer"
            );
            checkpoint.last_events_summary = "see tasks/active.json".to_string();
            let mut size = serialized_len(&checkpoint)?;
            // Single pass, no re-serialization: removing an id from the JSON
            // array shrinks it by at least its own bytes plus quotes, so this
            // estimate only ever over-shoots the final size.
            while size > CHECKPOINT_MAX_BYTES {
                match checkpoint.active_task_ids.pop() {
                    Some(id) => size -= id.len() + 2,
                    None => break,
                }
            }
        }

        // Compact form on disk so the 2 KB cap holds for the file itself.
        let latest = self.root.join("checkpoints").join("latest.json");
        write_json_atomic_compact(&latest, &checkpoint)?;
        let historical = self
            .root
            .join("checkpoints")
            .join(format!("{}.json", checkpoint.checkpoint_id));
        write_json_atomic_compact(&historical, &checkpoint)?;

        tracing::info!(id = %checkpoint.checkpoint_id, "checkpoint written");
        Ok(checkpoint)
    }

    /// Recover after an interruption: the latest checkpoint (if any) plus
    /// every non-terminal task record. One file load and a directory scan.
    pub fn resume(&self) -> Result<Resume, CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");

        let last_checkpoint: Option<Checkpoint> =
            read_json(&self.root.join("checkpoints").join("latest.json"))?;

        let active: Vec<String> = read_json(&self.root.join("tasks").join("active.json"))?
            .unwrap_or_default();

        let mut pending_tasks = Vec::new();
        for task_id in active {
            match read_json::<TaskRecord>(&self.task_path(&task_id))? {
                Some(record) if !record.status.is_terminal() => pending_tasks.push(record),
                Some(_) => {}
                None => tracing::warn!(%task_id, "active index points at a missing task file"),
            }
        }
        Ok(Resume {
            last_checkpoint,
            pending_tasks,
        })
    }

    /// Events logged on a given date, in append order.
    pub fn events_for(&self, date: chrono::NaiveDate) -> Result<Vec<SessionEvent>, CoreError> {
        let _guard = self.lock.lock().expect("store lock poisoned");
        let path = self
            .root
            .join("sessions")
            .join(format!("{}.log.jsonl", date.format("%Y-%m-%d")));
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path).map_err(|e| CoreError::persistence(&path, e))?;
        let mut events = Vec::new();
        for line in raw.lines() {
            match serde_json::from_str::<SessionEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => tracing::warn!("bad event line skipped: {e}"),
            }
        }
        Ok(events)
    }

    /// The newest `n` events from today's log.
    pub fn recent_events(&self, n: usize) -> Result<Vec<SessionEvent>, CoreError> {
        let mut events = self.events_for(Utc::now().date_naive())?;
        if events.len() > n {
            events.drain(..events.len() - n);
        }
        Ok(events)
    }

    fn session_log_path(&self, timestamp: DateTime<Utc>) -> PathBuf {
        self.root
            .join("sessions")
            .join(format!("{}.log.jsonl", timestamp.format("%Y-%m-%d")))
    }

    fn task_path(&self, task_id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{task_id}.json"))
    }

    /// Keep `tasks/active.json` in sync with the record's terminal-ness.
    /// Caller holds the write lock.
    fn update_active_index(&self, task_id: &str, status: TaskStatus) -> Result<(), CoreError> {
        let path = self.root.join("tasks").join("active.json");
        let mut active: Vec<String> = read_json(&path)?.unwrap_or_default();
        let present = active.iter().any(|id| id == task_id);
        if status.is_terminal() {
            if present {
                active.retain(|id| id != task_id);
                write_json_atomic(&path, &active)?;
            }
        } else if !present {
            active.push(task_id.to_string());
            active.sort_unstable();
            write_json_atomic(&path, &active)?;
        }
        Ok(())
    }
}

// ─── File helpers ────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    match fs::read_to_string(path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| CoreError::persistence(path, std::io::Error::other(e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::persistence(path, e)),
    }
}

/// Write-temp-then-rename with fsync; the destination is either the old or
/// the new content, never a mix.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let raw = serde_json::to_vec_pretty(value)
        .map_err(|e| CoreError::persistence(path, std::io::Error::other(e)))?;
    write_bytes_atomic(path, &raw)
}

fn write_json_atomic_compact<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let raw = serde_json::to_vec(value)
        .map_err(|e| CoreError::persistence(path, std::io::Error::other(e)))?;
    write_bytes_atomic(path, &raw)
}

fn write_bytes_atomic(path: &Path, raw: &[u8]) -> Result<(), CoreError> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(|e| CoreError::persistence(&tmp, e))?;
    file.write_all(raw)
        .and_then(|_| file.sync_all())
        .map_err(|e| CoreError::persistence(&tmp, e))?;
    drop(file);
    fs::rename(&tmp, path).map_err(|e| CoreError::persistence(path, e))?;
    Ok(())
}

fn serialized_len<T: Serialize>(value: &T) -> Result<usize, CoreError> {
    serde_json::to_vec(value)
        .map(|v| v.len())
        .map_err(|e| CoreError::persistence("checkpoint", std::io::Error::other(e)))
}

fn state_hash(active_task_ids: &[String], summary: &str) -> String {
    let mut hasher = Sha256::new();
    for id in active_task_ids {
        hasher.update(id.as_bytes());
        hasher.update([0x1f]);
    }
    hasher.update(summary.as_bytes());
    hex_prefix(&hasher.finalize(), 16)
}

fn hex_prefix(digest: &[u8], chars: usize) -> String {
    digest
        .iter()
        .flat_map(|b| [b >> 4, b & 0xf])
        .take(chars)
        .map(|nibble| char::from_digit(nibble as u32, 16).expect("nibble < 16"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, ContinuityStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContinuityStore::open(dir.path()).unwrap();
        (dir, store)
    }

    fn event(kind: EventKind, task_id: &str) -> SessionEvent {
        SessionEvent::new(kind, task_id, json!({"note": "test"}))
    }

    #[test]
    fn test_append_event_is_observed_exactly_once() {
        let (_dir, store) = store();
        store
            .append_event(&event(EventKind::Classify, "task-1"))
            .unwrap();
        let events = store.recent_events(10).unwrap();
        let matching: Vec<_> = events
            .iter()
            .filter(|e| e.correlation_id == "task-1" && e.kind == EventKind::Classify)
            .collect();
        assert_eq!(matching.len(), 1);
    }

    #[test]
    fn test_events_preserve_append_order() {
        let (_dir, store) = store();
        for kind in [EventKind::Classify, EventKind::Delegate, EventKind::Validate] {
            store.append_event(&event(kind, "task-1")).unwrap();
        }
        let events = store.events_for(Utc::now().date_naive()).unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Classify, EventKind::Delegate, EventKind::Validate]
        );
    }

    #[test]
    fn test_put_task_is_idempotent() {
        let (_dir, store) = store();
        let record = TaskRecord::new("task-xyz");
        store.put_task(&record).unwrap();
        store.put_task(&record).unwrap();

        let loaded = store.get_task("task-xyz").unwrap().unwrap();
        assert_eq!(loaded.task_id, "task-xyz");
        let resume = store.resume().unwrap();
        assert_eq!(resume.pending_tasks.len(), 1);
    }

    #[test]
    fn test_stale_write_is_skipped() {
        let (_dir, store) = store();
        let mut newer = TaskRecord::new("task-lww");
        newer.status = TaskStatus::InProgress;
        store.put_task(&newer).unwrap();

        let mut stale = newer.clone();
        stale.status = TaskStatus::Pending;
        stale.updated_at = newer.updated_at - chrono::Duration::seconds(30);
        store.put_task(&stale).unwrap();

        let loaded = store.get_task("task-lww").unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::InProgress);
    }

    #[test]
    fn test_terminal_task_leaves_active_index() {
        let (_dir, store) = store();
        let mut record = TaskRecord::new("task-done");
        store.put_task(&record).unwrap();
        assert_eq!(store.resume().unwrap().pending_tasks.len(), 1);

        record.status = TaskStatus::Validated;
        record.updated_at = Utc::now();
        store.put_task(&record).unwrap();
        assert!(store.resume().unwrap().pending_tasks.is_empty());
    }

    #[test]
    fn test_checkpoint_fits_size_cap() {
        let (_dir, store) = store();
        let ids: Vec<String> = (0..200).map(|i| format!("task-{i:04}")).collect();
        let summary = "x".repeat(4096);
        let checkpoint = store.checkpoint(&ids, &summary).unwrap();

        assert!(serde_json::to_vec(&checkpoint).unwrap().len() <= CHECKPOINT_MAX_BYTES);
        assert_eq!(checkpoint.last_events_summary, "see tasks/active.json");

        let latest = std::fs::read(store.root().join("checkpoints/latest.json")).unwrap();
        assert!(latest.len() <= CHECKPOINT_MAX_BYTES);
    }

    #[test]
    fn test_checkpoint_fallback_handles_many_active_tasks() {
        let (_dir, store) = store();
        let ids: Vec<String> = (0..50_000).map(|i| format!("task-{i:08}")).collect();
        let checkpoint = store.checkpoint(&ids, "huge backlog").unwrap();

        assert!(serde_json::to_vec(&checkpoint).unwrap().len() <= CHECKPOINT_MAX_BYTES);
        assert!(checkpoint.active_task_ids.len() < ids.len());
        assert!(!checkpoint.active_task_ids.is_empty());
        assert_eq!(checkpoint.last_events_summary, "see tasks/active.json");
    }

    #[test]
    fn test_checkpoint_small_state_keeps_summary() {
        let (_dir, store) = store();
        let ids = vec!["task-1".to_string()];
        let checkpoint = store.checkpoint(&ids, "two tasks validated").unwrap();
        assert_eq!(checkpoint.last_events_summary, "two tasks validated");
        assert_eq!(checkpoint.active_task_ids, ids);
        assert_eq!(checkpoint.state_hash.len(), 16);
    }

    #[test]
    fn test_resume_returns_latest_checkpoint() {
        let (_dir, store) = store();
        store.checkpoint(&["a".to_string()], "first").unwrap();
        let second = store.checkpoint(&["b".to_string()], "second").unwrap();

        let resume = store.resume().unwrap();
        let latest = resume.last_checkpoint.unwrap();
        assert_eq!(latest.checkpoint_id, second.checkpoint_id);
        assert_eq!(latest.last_events_summary, "second");
    }

    #[test]
    fn test_resume_on_empty_store() {
        let (_dir, store) = store();
        let resume = store.resume().unwrap();
        assert!(resume.last_checkpoint.is_none());
        assert!(resume.pending_tasks.is_empty());
    }

    #[test]
    fn test_historical_checkpoint_retained() {
        let (_dir, store) = store();
        let checkpoint = store.checkpoint(&[], "only").unwrap();
        let path = store
            .root()
            .join("checkpoints")
            .join(format!("{}.json", checkpoint.checkpoint_id));
        assert!(path.exists());
    }

    #[test]
    fn test_derive_id_is_stable_and_content_addressed() {
        let a = TaskRecord::derive_id("Implement a JWT refresh endpoint");
        let b = TaskRecord::derive_id("Implement a JWT refresh endpoint");
        let c = TaskRecord::derive_id("Implement a JWT revoke endpoint");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_corrupt_event_line_is_skipped_not_fatal() {
        let (_dir, store) = store();
        store
            .append_event(&event(EventKind::Complete, "task-ok"))
            .unwrap();
        let path = store
            .root()
            .join("sessions")
            .join(format!("{}.log.jsonl", Utc::now().format("%Y-%m-%d")));
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json}\n");
        std::fs::write(&path, raw).unwrap();
        store
            .append_event(&event(EventKind::Error, "task-ok"))
            .unwrap();

        let events = store.events_for(Utc::now().date_naive()).unwrap();
        assert_eq!(events.len(), 2);
    }
}
