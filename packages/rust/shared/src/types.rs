//! Core domain types: stage identities, checkpoints, input documents.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bag::OutputBag;

/// Name of the checkpoint file inside every flow slot.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Name of the human-readable snapshot written after every stage.
pub const INTERMEDIATE_RESULTS_FILE: &str = "intermediate_results.json";

// ---------------------------------------------------------------------------
// StageId
// ---------------------------------------------------------------------------

/// Identity of a pipeline phase.
///
/// The derived `Ord` is the execution order; checkpoints compare identities
/// with it when deciding which cumulative snapshot is the most recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    TextAnalysis,
    VisualAnalysis,
    Synthesized,
    Schema,
    CodeGenerated,
    CodeValidated,
    MarkdownConverted,
}

impl StageId {
    /// All identities in execution order.
    pub const ALL: [StageId; 7] = [
        Self::TextAnalysis,
        Self::VisualAnalysis,
        Self::Synthesized,
        Self::Schema,
        Self::CodeGenerated,
        Self::CodeValidated,
        Self::MarkdownConverted,
    ];

    /// Stable string form, identical to the serialized value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextAnalysis => "text_analysis",
            Self::VisualAnalysis => "visual_analysis",
            Self::Synthesized => "synthesized",
            Self::Schema => "schema",
            Self::CodeGenerated => "code_generated",
            Self::CodeValidated => "code_validated",
            Self::MarkdownConverted => "markdown_converted",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("unknown stage identity: {s}"))
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Lifecycle status recorded alongside the step identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    /// `step` finished and `data` holds its cumulative outputs.
    Completed,
    /// An attempt at `attempted` failed; `step` is the last completed upstream stage.
    Failed,
    /// An attempt at `attempted` started and never recorded an outcome.
    InProgress,
}

/// The `checkpoint.json` record stored in each flow slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Last successfully completed stage whose outputs are in `data`.
    pub step: Option<StageId>,
    pub status: CheckpointStatus,
    /// Stage this slot is working on when the status is not `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempted: Option<StageId>,
    pub timestamp: DateTime<Utc>,
    /// Cumulative output bag up to and including `step`.
    #[serde(default)]
    pub data: OutputBag,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Checkpoint {
    /// Terminal checkpoint for a stage that finished successfully.
    pub fn completed(step: StageId, data: OutputBag) -> Self {
        Self {
            step: Some(step),
            status: CheckpointStatus::Completed,
            attempted: None,
            timestamp: Utc::now(),
            data,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    /// Marker written before `attempted` starts running.
    pub fn in_progress(last_completed: Option<StageId>, attempted: StageId, data: OutputBag) -> Self {
        Self {
            step: last_completed,
            status: CheckpointStatus::InProgress,
            attempted: Some(attempted),
            timestamp: Utc::now(),
            data,
            metadata: serde_json::Map::new(),
            error: None,
        }
    }

    /// Retry marker for a failed attempt, pinned at the last completed stage.
    pub fn failed(
        last_completed: Option<StageId>,
        attempted: StageId,
        data: OutputBag,
        error: impl Into<String>,
    ) -> Self {
        Self {
            step: last_completed,
            status: CheckpointStatus::Failed,
            attempted: Some(attempted),
            timestamp: Utc::now(),
            data,
            metadata: serde_json::Map::new(),
            error: Some(error.into()),
        }
    }

    /// Attach a metadata entry.
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Whether this checkpoint marks `stage` as done.
    pub fn is_completed(&self, stage: StageId) -> bool {
        self.status == CheckpointStatus::Completed && self.step == Some(stage)
    }

    /// Whether this slot holds an unfinished or failed attempt at `stage`.
    pub fn is_retry_marker(&self, stage: StageId) -> bool {
        self.status != CheckpointStatus::Completed && self.attempted == Some(stage)
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one pipeline invocation (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// InputDocument
// ---------------------------------------------------------------------------

/// One document of the input batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDocument {
    /// Stable identifier (source URL, or file path for local documents).
    pub identifier: String,
    /// File name used to derive per-document artifact names.
    pub name: String,
    /// Local file, when the document was read from disk.
    pub path: Option<PathBuf>,
    /// Raw HTML content.
    pub content: String,
}
