//! Error types for extractflow.
//!
//! Library crates use [`ExtractflowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all extractflow operations.
#[derive(Debug, thiserror::Error)]
pub enum ExtractflowError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP transport error (connect, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// A collaborator API answered with a non-success status.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// Collaborator output or on-disk data could not be decoded.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty batch, invalid input, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Generated code does not expose the declared interface.
    #[error("contract violation: {message}")]
    Contract { message: String },

    /// The plugin subprocess failed to start, crashed, or misbehaved.
    #[error("plugin error: {0}")]
    Plugin(String),

    /// A stage was asked to run without one of its declared inputs.
    #[error("stage {stage} is missing required input `{input}`")]
    StageInput { stage: String, input: String },

    /// A mandatory stage failed; the run was aborted after recording a retry marker.
    #[error("stage {stage} failed in flow{flow_id}: {message}")]
    StageFailed {
        stage: String,
        flow_id: u32,
        message: String,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ExtractflowError>;

impl ExtractflowError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a contract violation from any displayable message.
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same request may succeed.
    ///
    /// Transport failures, timeouts, rate limiting and server errors are
    /// transient; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => matches!(*status, 408 | 429 | 500..=599),
            _ => false,
        }
    }
}
