//! Atomic, failure-tolerant persistence scoped to one slot directory.
//!
//! Every write goes to `.{name}.tmp` in the target's own directory and is then
//! renamed over the target, so a reader never observes a half-written file.
//! Checkpoint and step-result operations never return errors: failures are
//! logged and degrade to "absent", which makes the next resume redo the work.

use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use extractflow_shared::{CHECKPOINT_FILE, Checkpoint, ExtractflowError, Result};

/// Metadata for a single artifact file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactMeta {
    pub filename: String,
    pub sha256: String,
    pub size_bytes: usize,
}

/// A step result as stored on disk: JSON documents are parsed, anything
/// else is kept as text.
#[derive(Debug, Clone, PartialEq)]
pub enum StepValue {
    Json(serde_json::Value),
    Text(String),
}

/// Durable storage for one flow slot.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The slot directory this store writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Absolute path of an artifact inside the slot.
    pub fn path_of(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    // -----------------------------------------------------------------------
    // Checkpoint
    // -----------------------------------------------------------------------

    /// Persist the slot checkpoint. Returns `false` if it could not be written.
    pub fn save_checkpoint(&self, checkpoint: &Checkpoint) -> bool {
        let bytes = match serde_json::to_vec_pretty(checkpoint) {
            Ok(b) => b,
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "failed to serialize checkpoint");
                return false;
            }
        };

        match write_atomic(&self.path_of(CHECKPOINT_FILE), &bytes) {
            Ok(_) => {
                debug!(
                    dir = %self.dir.display(),
                    step = ?checkpoint.step,
                    status = ?checkpoint.status,
                    "checkpoint saved"
                );
                true
            }
            Err(e) => {
                error!(dir = %self.dir.display(), error = %e, "failed to save checkpoint");
                false
            }
        }
    }

    /// Load the slot checkpoint, if present and readable.
    pub fn load_checkpoint(&self) -> Option<Checkpoint> {
        let path = self.path_of(CHECKPOINT_FILE);
        if !path.is_file() {
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read checkpoint");
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(cp) => Some(cp),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable checkpoint");
                None
            }
        }
    }

    // -----------------------------------------------------------------------
    // Step results
    // -----------------------------------------------------------------------

    /// Persist a named step result (default file `{name}_result.json`).
    pub fn save_step_result(
        &self,
        name: &str,
        value: &StepValue,
        filename: Option<&str>,
    ) -> Option<ArtifactMeta> {
        let filename = result_filename(name, filename);
        let bytes = match value {
            StepValue::Json(v) => match serde_json::to_vec_pretty(v) {
                Ok(b) => b,
                Err(e) => {
                    error!(name, error = %e, "failed to serialize step result");
                    return None;
                }
            },
            StepValue::Text(t) => t.as_bytes().to_vec(),
        };

        match write_atomic(&self.path_of(&filename), &bytes) {
            Ok(meta) => {
                debug!(name, file = %meta.filename, size = meta.size_bytes, "step result saved");
                Some(meta)
            }
            Err(e) => {
                error!(name, error = %e, "failed to save step result");
                None
            }
        }
    }

    /// Serialize any value as a pretty-printed JSON artifact.
    pub fn save_json<T: Serialize>(&self, filename: &str, value: &T) -> Option<ArtifactMeta> {
        match serde_json::to_value(value) {
            Ok(v) => self.save_step_result(filename, &StepValue::Json(v), Some(filename)),
            Err(e) => {
                error!(file = filename, error = %e, "failed to serialize artifact");
                None
            }
        }
    }

    /// Load a named step result. `.json` files are parsed, others returned as text.
    pub fn load_step_result(&self, name: &str, filename: Option<&str>) -> Option<StepValue> {
        let filename = result_filename(name, filename);
        let path = self.path_of(&filename);
        if !path.is_file() {
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read step result");
                return None;
            }
        };

        if !filename.ends_with(".json") {
            return Some(StepValue::Text(content));
        }

        match serde_json::from_str(&content) {
            Ok(v) => Some(StepValue::Json(v)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable step result");
                None
            }
        }
    }

    pub fn step_result_exists(&self, name: &str, filename: Option<&str>) -> bool {
        self.path_of(&result_filename(name, filename)).is_file()
    }

    // -----------------------------------------------------------------------
    // Auxiliary artifacts
    // -----------------------------------------------------------------------

    /// Atomically write a text artifact (generated source, per-document result).
    pub fn write_text(&self, filename: &str, text: &str) -> Result<ArtifactMeta> {
        write_atomic(&self.path_of(filename), text.as_bytes())
    }

    pub fn read_text(&self, filename: &str) -> Option<String> {
        std::fs::read_to_string(self.path_of(filename)).ok()
    }

    /// Remove an artifact. Returns `true` if a file was deleted.
    pub fn remove(&self, filename: &str) -> bool {
        let path = self.path_of(filename);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "artifact removed");
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to remove artifact");
                false
            }
        }
    }
}

fn result_filename(name: &str, filename: Option<&str>) -> String {
    filename.map_or_else(|| format!("{name}_result.json"), str::to_string)
}

/// Write `bytes` to a temp file next to `target`, then rename it into place.
fn write_atomic(target: &Path, bytes: &[u8]) -> Result<ArtifactMeta> {
    let parent = target
        .parent()
        .ok_or_else(|| ExtractflowError::validation(format!("no parent for {}", target.display())))?;
    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ExtractflowError::validation(format!("bad file name {}", target.display())))?;

    std::fs::create_dir_all(parent).map_err(|e| ExtractflowError::io(parent, e))?;

    let temp = parent.join(format!(".{name}.tmp"));
    std::fs::write(&temp, bytes).map_err(|e| ExtractflowError::io(&temp, e))?;

    if let Err(e) = std::fs::rename(&temp, target) {
        let _ = std::fs::remove_file(&temp);
        return Err(ExtractflowError::io(target, e));
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);

    Ok(ArtifactMeta {
        filename: name.to_string(),
        sha256: format!("{:x}", hasher.finalize()),
        size_bytes: bytes.len(),
    })
}
