use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use extractflow_agents::DocumentAnalyzer;
use extractflow_shared::{DocumentAnalysis, OutputBag, OutputKey, Result, StageId};

use crate::stage::{Stage, StageContext};

/// Structural analysis of every input document.
///
/// A document whose analysis fails is recorded with its error; the stage
/// itself only fails on infrastructure errors.
pub struct TextAnalysisStage {
    analyzer: Arc<dyn DocumentAnalyzer>,
}

impl TextAnalysisStage {
    pub fn new(analyzer: Arc<dyn DocumentAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Stage for TextAnalysisStage {
    fn id(&self) -> StageId {
        StageId::TextAnalysis
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::FileIdentifiers]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[OutputKey::AnalysisResults]
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, _inputs: &OutputBag) -> Result<OutputBag> {
        let total = ctx.run.documents.len();
        let mut results = Vec::with_capacity(total);

        for (i, document) in ctx.run.documents.iter().enumerate() {
            info!(document = %document.name, current = i + 1, total, "analyzing document");
            let result = match self.analyzer.analyze(document).await {
                Ok(analysis) => DocumentAnalysis {
                    document: document.identifier.clone(),
                    analysis: Some(analysis),
                    error: None,
                },
                Err(e) => {
                    warn!(document = %document.name, error = %e, "document analysis failed");
                    DocumentAnalysis {
                        document: document.identifier.clone(),
                        analysis: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let failed = results.iter().filter(|r| r.error.is_some()).count();
        info!(analyzed = total - failed, failed, "text analysis finished");

        Ok(OutputBag {
            analysis_results: Some(results),
            ..OutputBag::default()
        })
    }
}
