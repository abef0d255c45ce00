//! Shared types, error model, and configuration for extractflow.
//!
//! This crate is the foundation depended on by all other extractflow crates.
//! It provides:
//! - [`ExtractflowError`], the unified error type
//! - Domain types ([`StageId`], [`Checkpoint`], [`OutputBag`], stage payloads)
//! - Configuration ([`AppConfig`], [`RunOptions`], config loading)

pub mod bag;
pub mod config;
pub mod error;
pub mod payloads;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use bag::{OutputBag, OutputKey};
pub use config::{
    AppConfig, DownloadConfig, EndpointConfig, LlmConfig, LlmCredentials, PathsConfig,
    PipelineSettings, RetryPolicy, RunOptions, VisualConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, locate_config,
};
pub use error::{ExtractflowError, Result};
pub use payloads::{
    AnalyzedSection, ContentAnalysis, ConversionSummary, Decoded, DocumentAnalysis,
    ExtractionSchema, ExtractionSummary, FileRecord, IssueCategory, RecordStatus, SchemaSection,
    StructureReport, Synthesis, ValidationIssue, ValidationReport, VisualAnalysis,
};
pub use types::{
    CHECKPOINT_FILE, Checkpoint, CheckpointStatus, INTERMEDIATE_RESULTS_FILE, InputDocument,
    RunId, StageId,
};
