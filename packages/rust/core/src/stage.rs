//! The unit of work the executor drives.

use std::path::PathBuf;

use async_trait::async_trait;

use extractflow_artifacts::ArtifactStore;
use extractflow_shared::{
    ExtractflowError, InputDocument, OutputBag, OutputKey, Result, RunId, StageId,
};

/// One invocation of the pipeline over one input batch.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: RunId,
    /// Input documents in a stable order.
    pub documents: Vec<InputDocument>,
    /// Root under which flow slots live.
    pub output_root: PathBuf,
}

impl Run {
    pub fn new(documents: Vec<InputDocument>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            id: RunId::new(),
            documents,
            output_root: output_root.into(),
        }
    }

    /// Identifiers of the input documents, in batch order.
    pub fn file_identifiers(&self) -> Vec<String> {
        self.documents.iter().map(|d| d.identifier.clone()).collect()
    }
}

/// What a stage sees while it runs.
#[derive(Debug)]
pub struct StageContext<'a> {
    pub run: &'a Run,
    pub slot_id: u32,
    /// Storage for the stage's own flow slot.
    pub store: ArtifactStore,
}

/// One pipeline phase.
///
/// A stage reads only the inputs it declares and must return every output it
/// declares; the executor enforces both.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    /// Artifacts that must be present before the stage can run.
    fn required_inputs(&self) -> &'static [OutputKey];

    /// Artifacts passed along when present.
    fn optional_inputs(&self) -> &'static [OutputKey] {
        &[]
    }

    fn produced_outputs(&self) -> &'static [OutputKey];

    /// Optional stages degrade to [`Stage::gap_outputs`] instead of failing the run.
    fn is_optional(&self) -> bool {
        false
    }

    fn is_enabled(&self) -> bool {
        true
    }

    /// Contribution of an optional stage that was disabled or failed.
    fn gap_outputs(&self) -> OutputBag {
        OutputBag::default()
    }

    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag>;
}

/// Borrow a declared input, or fail with [`ExtractflowError::StageInput`].
pub fn input<'a, T>(value: &'a Option<T>, stage: StageId, key: OutputKey) -> Result<&'a T> {
    value.as_ref().ok_or_else(|| ExtractflowError::StageInput {
        stage: stage.to_string(),
        input: key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_follow_batch_order() {
        let doc = |id: &str| InputDocument {
            identifier: id.into(),
            name: id.into(),
            path: None,
            content: String::new(),
        };
        let run = Run::new(vec![doc("b.html"), doc("a.html")], "/tmp/out");
        assert_eq!(run.file_identifiers(), vec!["b.html", "a.html"]);
    }

    #[test]
    fn missing_input_names_stage_and_key() {
        let bag = OutputBag::default();
        let err = input(&bag.schema, StageId::CodeGenerated, OutputKey::Schema).unwrap_err();
        assert_eq!(
            err.to_string(),
            "stage code_generated is missing required input `schema`"
        );
    }
}
