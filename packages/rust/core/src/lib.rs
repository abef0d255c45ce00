//! Resumable pipeline execution for extractflow.
//!
//! A [`Stage`] declares the outputs it needs and produces; the
//! [`PipelineExecutor`] runs stages in order, one `flow{N}` slot each, and
//! resumes an interrupted batch from the checkpoints it finds under the
//! output root. [`pipeline`] wires the seven concrete stages to their
//! collaborators.

pub mod executor;
pub mod pipeline;
pub mod stage;
pub mod stages;

#[cfg(test)]
mod testing;

pub use executor::{
    PipelineExecutor, PipelineObserver, PipelineReport, SilentObserver, StageOutcome, StageReport,
};
pub use pipeline::{Collaborators, build_stages, run_pipeline, run_with};
pub use stage::{Run, Stage, StageContext, input};
