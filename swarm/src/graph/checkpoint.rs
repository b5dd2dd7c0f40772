//! Checkpoints: canonically serialized workflow snapshots.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::canonical::{canonical_hash, to_canonical_json};
use crate::error::{Error, Result};
use crate::value::Value;

/// The event-schema version this engine reads and writes.
pub const EVENT_SCHEMA_VERSION: &str = "hsw.v1";

/// Channel holding the workflow's latest dataflow value.
pub const OUTPUT_CHANNEL: &str = "__output__";
/// Channel holding the workflow's original input.
pub const INPUT_CHANNEL: &str = "__input__";

/// A persisted snapshot of workflow state sufficient for resumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Workflow identity (pre-sanitization).
    pub workflow_id: String,
    /// The run that produced this snapshot.
    pub run_id: String,
    /// Number of steps completed when the snapshot was taken.
    pub step_index: usize,
    /// Nodes eligible for execution at snapshot time.
    pub frontier: Vec<String>,
    /// Channel values, keyed by channel name, sorted.
    pub channel_values: BTreeMap<String, Value>,
    /// Why the workflow paused, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interruption_reason: Option<String>,
    /// Schema marker; cross-version replay is refused.
    pub event_schema_version: String,
}

impl CheckpointState {
    /// Canonical JSON rendering (sorted keys, no slash escaping).
    ///
    /// # Errors
    ///
    /// [`Error::Json`] when the state fails to serialize.
    pub fn canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(to_canonical_json(&value))
    }

    /// A stable id derived from the canonical bytes.
    ///
    /// # Errors
    ///
    /// [`Error::Json`] when the state fails to serialize.
    pub fn checkpoint_id(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        Ok(canonical_hash(&value))
    }

    /// The latest dataflow value recorded before the snapshot.
    #[must_use]
    pub fn intermediate_output(&self) -> Option<&str> {
        self.channel_values
            .get(OUTPUT_CHANNEL)
            .and_then(Value::as_str)
    }
}

/// Sanitize a workflow id into a store key safe for file names.
///
/// The result contains no path separators, no `..` sequences, and no
/// `:`; anything outside `[A-Za-z0-9._-]` becomes `_`.
#[must_use]
pub fn sanitize_workflow_id(id: &str) -> String {
    let mut out: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    while out.contains("..") {
        out = out.replace("..", "_.");
    }
    if out.is_empty() {
        out.push_str("workflow");
    }
    out
}

/// The capability to persist and recover checkpoints.
///
/// Implementations must write atomically and never outside their
/// configured location; workflow ids are sanitized before use as keys.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state`, replacing any previous snapshot for the same
    /// workflow id.
    async fn save(&self, state: &CheckpointState) -> Result<()>;

    /// Load the latest snapshot for `workflow_id`.
    async fn load(&self, workflow_id: &str) -> Result<Option<CheckpointState>>;

    /// Remove the snapshot for `workflow_id`.
    async fn delete(&self, workflow_id: &str) -> Result<()>;
}

/// An in-memory store for tests and short-lived workflows.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    states: Mutex<HashMap<String, CheckpointState>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, state: &CheckpointState) -> Result<()> {
        let key = sanitize_workflow_id(&state.workflow_id);
        self.states.lock().await.insert(key, state.clone());
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<CheckpointState>> {
        let key = sanitize_workflow_id(workflow_id);
        Ok(self.states.lock().await.get(&key).cloned())
    }

    async fn delete(&self, workflow_id: &str) -> Result<()> {
        let key = sanitize_workflow_id(workflow_id);
        self.states.lock().await.remove(&key);
        Ok(())
    }
}

/// A store writing one canonical JSON file per workflow.
///
/// Writes go to a temporary file first and land by rename, so a crashed
/// writer never leaves a half-written checkpoint behind.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create a store rooted at `dir`. The directory is created on first
    /// save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, workflow_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", sanitize_workflow_id(workflow_id)))
    }

    /// The directory this store writes into.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, state: &CheckpointState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::checkpoint_store(e.to_string()))?;
        let path = self.path_for(&state.workflow_id);
        let tmp = path.with_extension("json.tmp");
        let body = state.canonical_json()?;
        tokio::fs::write(&tmp, body.as_bytes())
            .await
            .map_err(|e| Error::checkpoint_store(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::checkpoint_store(e.to_string()))?;
        debug!(path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<CheckpointState>> {
        let path = self.path_for(workflow_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::from(crate::error::ResumeError::CheckpointCorrupt {
                        message: e.to_string(),
                    })
                })?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::checkpoint_store(e.to_string())),
        }
    }

    async fn delete(&self, workflow_id: &str) -> Result<()> {
        let path = self.path_for(workflow_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::checkpoint_store(e.to_string())),
        }
    }
}
