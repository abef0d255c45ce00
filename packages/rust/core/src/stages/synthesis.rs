use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument};

use extractflow_agents::Synthesizer;
use extractflow_shared::{OutputBag, OutputKey, Result, StageId};

use crate::stage::{Stage, StageContext, input};

/// Combines the per-document analyses into one structural synthesis.
pub struct SynthesisStage {
    synthesizer: Arc<dyn Synthesizer>,
}

impl SynthesisStage {
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self { synthesizer }
    }
}

#[async_trait]
impl Stage for SynthesisStage {
    fn id(&self) -> StageId {
        StageId::Synthesized
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::FileIdentifiers, OutputKey::AnalysisResults]
    }

    fn optional_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::VisualResults]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Synthesized]
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        let identifiers = input(&inputs.file_identifiers, self.id(), OutputKey::FileIdentifiers)?;
        let analyses = input(&inputs.analysis_results, self.id(), OutputKey::AnalysisResults)?;
        let visuals = inputs.visual_results.as_deref().unwrap_or_default();

        info!(
            documents = identifiers.len(),
            visual = visuals.len(),
            "synthesizing analyses"
        );
        let synthesized = self
            .synthesizer
            .synthesize(identifiers, analyses, visuals)
            .await?;

        Ok(OutputBag {
            synthesized: Some(synthesized),
            ..OutputBag::default()
        })
    }
}
