//! The resumable pipeline executor.
//!
//! Each stage owns one `flow{N}` slot under the output root. Before a stage
//! runs, an `in_progress` marker is written to its slot; afterwards the slot
//! holds either a completed checkpoint with the cumulative output bag, or a
//! failed checkpoint pinned at the last completed upstream stage. On the next
//! run the slots are scanned once: completed stages are resumed from their
//! checkpoints and failed or interrupted ones are retried in the same slot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use extractflow_artifacts::{FlowAllocator, FlowSlot, SlotEntry, StepValue};
use extractflow_shared::{
    Checkpoint, CheckpointStatus, ExtractflowError, INTERMEDIATE_RESULTS_FILE, OutputBag,
    Result, RunId, StageId,
};

use crate::stage::{Run, Stage, StageContext};

// ---------------------------------------------------------------------------
// Outcomes and observers
// ---------------------------------------------------------------------------

/// How one stage was settled during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage ran in `slot`. `persisted` is false when its checkpoint
    /// could not be written, so the next run redoes it.
    Executed { slot: u32, persisted: bool },
    /// Outputs came from an earlier run, recorded in `slot` when known.
    Resumed { slot: Option<u32> },
    /// Disabled; the stage's gap outputs were used.
    Skipped,
    /// An optional stage failed in `slot`; its gap outputs were used.
    Gap { slot: u32, error: String },
    /// A mandatory stage failed in `slot` and the run stopped.
    Failed { slot: u32, error: String },
}

impl StageOutcome {
    pub fn slot(&self) -> Option<u32> {
        match self {
            Self::Executed { slot, .. } | Self::Gap { slot, .. } | Self::Failed { slot, .. } => {
                Some(*slot)
            }
            Self::Resumed { slot } => *slot,
            Self::Skipped => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Executed { .. } => "executed",
            Self::Resumed { .. } => "resumed",
            Self::Skipped => "skipped",
            Self::Gap { .. } => "gap",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: StageId,
    pub outcome: StageOutcome,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub output_root: PathBuf,
    pub stages: Vec<StageReport>,
    /// The final cumulative output bag.
    pub outputs: OutputBag,
}

impl PipelineReport {
    pub fn outcome(&self, stage: StageId) -> Option<&StageOutcome> {
        self.stages
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| &r.outcome)
    }

    /// Stages that actually ran in this invocation.
    pub fn executed(&self) -> Vec<StageId> {
        self.stages
            .iter()
            .filter(|r| matches!(r.outcome, StageOutcome::Executed { .. }))
            .map(|r| r.stage)
            .collect()
    }

    /// Directory of the slot holding `stage`'s artifacts.
    pub fn slot_dir(&self, stage: StageId) -> Option<PathBuf> {
        self.outcome(stage)?
            .slot()
            .map(|id| self.output_root.join(format!("flow{id}")))
    }
}

/// Progress callbacks for the executor.
pub trait PipelineObserver: Send + Sync {
    /// Called before a stage runs in `slot`.
    fn stage_started(&self, stage: StageId, slot: u32);
    /// Called once per stage with how it was settled.
    fn stage_finished(&self, stage: StageId, outcome: &StageOutcome);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl PipelineObserver for SilentObserver {
    fn stage_started(&self, _stage: StageId, _slot: u32) {}
    fn stage_finished(&self, _stage: StageId, _outcome: &StageOutcome) {}
}

// ---------------------------------------------------------------------------
// Resume index
// ---------------------------------------------------------------------------

/// What an earlier run left under the output root.
#[derive(Debug, Default)]
struct ResumeIndex {
    /// Lowest-numbered completed slot per stage.
    completed: BTreeMap<StageId, SlotEntry>,
    /// Lowest-numbered failed or interrupted slot per attempted stage.
    retry: BTreeMap<StageId, FlowSlot>,
}

impl ResumeIndex {
    fn build(allocator: &FlowAllocator, identifiers: &[String]) -> Self {
        let mut index = Self::default();

        for entry in allocator.scan() {
            let Some(checkpoint) = entry.checkpoint.as_ref() else {
                debug!(slot = entry.slot.id, "slot has no checkpoint, ignoring");
                continue;
            };
            if checkpoint.data.file_identifiers.as_deref() != Some(identifiers) {
                warn!(
                    slot = entry.slot.id,
                    "checkpoint belongs to a different input batch, ignoring"
                );
                continue;
            }

            let (status, step, attempted) =
                (checkpoint.status, checkpoint.step, checkpoint.attempted);
            match (status, step, attempted) {
                (CheckpointStatus::Completed, Some(step), _) => {
                    index.completed.entry(step).or_insert(entry);
                }
                (CheckpointStatus::Failed | CheckpointStatus::InProgress, _, Some(attempted)) => {
                    index.retry.entry(attempted).or_insert(entry.slot);
                }
                _ => debug!(slot = entry.slot.id, "checkpoint names no stage, ignoring"),
            }
        }

        index
    }

    /// Bag seeded from the most advanced completed checkpoint, with gaps
    /// filled from the earlier ones.
    fn seed(&self) -> OutputBag {
        let mut bag = OutputBag::default();
        for entry in self.completed.values().rev() {
            if let Some(checkpoint) = &entry.checkpoint {
                bag.fill_missing(&checkpoint.data);
            }
        }
        bag
    }

    /// Highest stage whose completed checkpoint was found.
    fn last_completed(&self) -> Option<StageId> {
        self.completed.keys().next_back().copied()
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs an ordered list of stages with checkpoint-and-resume semantics.
pub struct PipelineExecutor {
    stages: Vec<Box<dyn Stage>>,
    allocator: FlowAllocator,
    resume: bool,
}

impl PipelineExecutor {
    pub fn new(output_root: impl Into<PathBuf>, stages: Vec<Box<dyn Stage>>) -> Self {
        Self {
            stages,
            allocator: FlowAllocator::new(output_root),
            resume: true,
        }
    }

    /// Whether to pick up checkpoints left by earlier runs (default `true`).
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn output_root(&self) -> &Path {
        self.allocator.root()
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|s| s.id()).collect()
    }

    /// Run every stage in order, resuming where possible.
    #[instrument(skip_all, fields(run_id = %run.id, documents = run.documents.len()))]
    pub async fn run(&self, run: &Run, observer: &dyn PipelineObserver) -> Result<PipelineReport> {
        if run.documents.is_empty() {
            return Err(ExtractflowError::validation("input batch is empty"));
        }

        let identifiers = run.file_identifiers();
        let index = if self.resume {
            ResumeIndex::build(&self.allocator, &identifiers)
        } else {
            ResumeIndex::default()
        };

        let mut bag = index.seed();
        bag.file_identifiers = Some(identifiers);
        let mut last_completed = index.last_completed();

        info!(
            resumable = index.completed.len(),
            retryable = index.retry.len(),
            root = %self.allocator.root().display(),
            "starting pipeline"
        );

        let mut reports = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let id = stage.id();
            let outcome = self
                .settle(stage.as_ref(), run, &index, &mut bag, &mut last_completed, observer)
                .await;
            match outcome {
                Ok(outcome) => {
                    observer.stage_finished(id, &outcome);
                    reports.push(StageReport { stage: id, outcome });
                }
                Err((slot, e)) => {
                    let outcome = StageOutcome::Failed {
                        slot,
                        error: e.to_string(),
                    };
                    observer.stage_finished(id, &outcome);
                    error!(stage = %id, slot, error = %e, "stage failed, stopping run");
                    return Err(ExtractflowError::StageFailed {
                        stage: id.to_string(),
                        flow_id: slot,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            executed = reports
                .iter()
                .filter(|r| matches!(r.outcome, StageOutcome::Executed { .. }))
                .count(),
            "pipeline finished"
        );

        Ok(PipelineReport {
            run_id: run.id.clone(),
            output_root: self.allocator.root().to_path_buf(),
            stages: reports,
            outputs: bag,
        })
    }

    /// Resume, skip or execute one stage. A mandatory failure comes back
    /// as `Err((slot, error))` after its retry marker has been written.
    async fn settle(
        &self,
        stage: &dyn Stage,
        run: &Run,
        index: &ResumeIndex,
        bag: &mut OutputBag,
        last_completed: &mut Option<StageId>,
        observer: &dyn PipelineObserver,
    ) -> std::result::Result<StageOutcome, (u32, ExtractflowError)> {
        let id = stage.id();
        let produced = stage.produced_outputs();

        if !stage.is_enabled() {
            info!(stage = %id, "stage disabled, using its gap outputs");
            bag.fill_missing(&stage.gap_outputs());
            return Ok(StageOutcome::Skipped);
        }

        let recorded = index.completed.get(&id);
        if bag.contains_all(produced) {
            let slot = recorded.map(|e| e.slot.id);
            info!(stage = %id, slot, "stage already completed, resuming");
            return Ok(StageOutcome::Resumed { slot });
        }

        let slot = match (recorded, index.retry.get(&id)) {
            (Some(entry), _) => {
                if let Some(checkpoint) = &entry.checkpoint {
                    bag.merge(&checkpoint.data, produced);
                }
                if bag.contains_all(produced) {
                    info!(stage = %id, slot = entry.slot.id, "loaded stage outputs from checkpoint");
                    return Ok(StageOutcome::Resumed {
                        slot: Some(entry.slot.id),
                    });
                }
                warn!(stage = %id, slot = entry.slot.id, "checkpoint lacks stage outputs, redoing");
                entry.slot.clone()
            }
            (None, Some(slot)) => {
                info!(stage = %id, slot = slot.id, "retrying stage in its previous slot");
                slot.clone()
            }
            (None, None) => self.allocator.allocate().map_err(|e| (0, e))?,
        };

        let store = slot.store();
        observer.stage_started(id, slot.id);

        let marker = Checkpoint::in_progress(*last_completed, id, bag.clone())
            .with_metadata("flow_id", slot.id)
            .with_metadata("run_id", run.id.to_string());
        if !store.save_checkpoint(&marker) {
            warn!(stage = %id, slot = slot.id, "could not write in-progress marker");
        }

        let ctx = StageContext {
            run,
            slot_id: slot.id,
            store: store.clone(),
        };
        info!(stage = %id, slot = slot.id, "running stage");

        match execute(stage, &ctx, bag).await {
            Ok(outputs) => {
                for key in produced {
                    if let Some(value) = outputs.value(*key) {
                        store.save_step_result(key.as_str(), &StepValue::Json(value), None);
                    }
                }
                bag.merge(&outputs, produced);
                *last_completed = Some(id);

                let checkpoint = Checkpoint::completed(id, bag.clone())
                    .with_metadata("flow_id", slot.id)
                    .with_metadata("run_id", run.id.to_string())
                    .with_metadata("outputs", json!(produced));
                let persisted = store.save_checkpoint(&checkpoint);
                if persisted {
                    info!(stage = %id, slot = slot.id, "stage completed");
                } else {
                    error!(
                        stage = %id,
                        slot = slot.id,
                        "stage completed but its checkpoint was not saved, it will run again on resume"
                    );
                }

                let snapshot = json!({
                    "run_id": run.id,
                    "flow_id": slot.id,
                    "step": id,
                    "timestamp": checkpoint.timestamp,
                    "results": bag,
                });
                store.save_json(INTERMEDIATE_RESULTS_FILE, &snapshot);

                Ok(StageOutcome::Executed {
                    slot: slot.id,
                    persisted,
                })
            }
            Err(e) => {
                let checkpoint = Checkpoint::failed(*last_completed, id, bag.clone(), e.to_string())
                    .with_metadata("flow_id", slot.id)
                    .with_metadata("run_id", run.id.to_string());
                if !store.save_checkpoint(&checkpoint) {
                    error!(stage = %id, slot = slot.id, "could not record the failure");
                }

                if stage.is_optional() {
                    warn!(stage = %id, slot = slot.id, error = %e, "optional stage failed, continuing without it");
                    bag.fill_missing(&stage.gap_outputs());
                    Ok(StageOutcome::Gap {
                        slot: slot.id,
                        error: e.to_string(),
                    })
                } else {
                    Err((slot.id, e))
                }
            }
        }
    }
}

/// Project the bag onto the stage's inputs, run it and check its outputs.
async fn execute(stage: &dyn Stage, ctx: &StageContext<'_>, bag: &OutputBag) -> Result<OutputBag> {
    let id = stage.id();
    if let Some(key) = bag.missing(stage.required_inputs()).first() {
        return Err(ExtractflowError::StageInput {
            stage: id.to_string(),
            input: key.to_string(),
        });
    }

    let mut inputs = bag.project(stage.required_inputs());
    inputs.merge(bag, stage.optional_inputs());

    let outputs = stage.run(ctx, &inputs).await?;

    let missing = outputs.missing(stage.produced_outputs());
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
        return Err(ExtractflowError::contract(format!(
            "stage {id} did not produce {}",
            names.join(", ")
        )));
    }
    Ok(outputs)
}
