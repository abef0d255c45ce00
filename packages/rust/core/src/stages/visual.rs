use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use extractflow_agents::{VisualAnalyzer, screenshot_path};
use extractflow_shared::{
    ExtractflowError, OutputBag, OutputKey, Result, StageId, VisualAnalysis,
};

use crate::stage::{Stage, StageContext};

/// Renders every document and describes its layout.
///
/// Optional: without an analyzer the stage is disabled, and when no document
/// could be analyzed it fails into an empty `visual_results` gap.
pub struct VisualAnalysisStage {
    analyzer: Option<Arc<dyn VisualAnalyzer>>,
}

impl VisualAnalysisStage {
    pub fn new(analyzer: Option<Arc<dyn VisualAnalyzer>>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Stage for VisualAnalysisStage {
    fn id(&self) -> StageId {
        StageId::VisualAnalysis
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::FileIdentifiers]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[OutputKey::VisualResults]
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.analyzer.is_some()
    }

    fn gap_outputs(&self) -> OutputBag {
        OutputBag {
            visual_results: Some(Vec::new()),
            ..OutputBag::default()
        }
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, _inputs: &OutputBag) -> Result<OutputBag> {
        let Some(analyzer) = &self.analyzer else {
            return Err(ExtractflowError::config("no visual analyzer configured"));
        };

        let workdir = ctx.store.dir();
        let mut results = Vec::with_capacity(ctx.run.documents.len());

        for document in &ctx.run.documents {
            let screenshot = screenshot_path(workdir, document);
            let result = match analyzer.analyze(document, workdir).await {
                Ok(analysis) => VisualAnalysis {
                    document: document.identifier.clone(),
                    screenshot: screenshot
                        .is_file()
                        .then(|| screenshot.display().to_string()),
                    analysis: Some(analysis),
                    error: None,
                },
                Err(e) => {
                    warn!(document = %document.name, error = %e, "visual analysis failed");
                    VisualAnalysis {
                        document: document.identifier.clone(),
                        screenshot: None,
                        analysis: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            results.push(result);
        }

        let analyzed = results.iter().filter(|r| r.analysis.is_some()).count();
        if analyzed == 0 {
            let first = results
                .iter()
                .find_map(|r| r.error.clone())
                .unwrap_or_default();
            return Err(ExtractflowError::Plugin(format!(
                "visual analysis failed for every document: {first}"
            )));
        }
        info!(analyzed, total = results.len(), "visual analysis finished");

        Ok(OutputBag {
            visual_results: Some(results),
            ..OutputBag::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Run;
    use crate::testing::{ScriptedLlm, documents, temp_root};
    use extractflow_artifacts::ArtifactStore;
    use std::sync::atomic::Ordering;

    #[test]
    fn no_analyzer_means_disabled() {
        let stage = VisualAnalysisStage::new(None);
        assert!(!stage.is_enabled());
        assert!(stage.is_optional());
        assert_eq!(stage.gap_outputs().visual_results, Some(vec![]));
    }

    #[tokio::test]
    async fn results_follow_the_documents() {
        let root = temp_root("stage-visual");
        let llm = Arc::new(ScriptedLlm::default());
        let stage = VisualAnalysisStage::new(Some(llm.clone()));
        let run = Run::new(documents(&["a.html", "b.html"]), &root);
        let ctx = StageContext {
            run: &run,
            slot_id: 2,
            store: ArtifactStore::new(root.join("flow2")),
        };

        let results = stage
            .run(&ctx, &OutputBag::default())
            .await
            .unwrap()
            .visual_results
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].document, "pages/b.html");
        assert_eq!(
            results[1].analysis.as_ref().unwrap().structured().unwrap()["layout_structure"],
            "b.html"
        );

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn all_documents_failing_fails_the_stage() {
        let root = temp_root("stage-visual-fail");
        let llm = Arc::new(ScriptedLlm::default());
        llm.fail_visual.store(true, Ordering::SeqCst);
        let stage = VisualAnalysisStage::new(Some(llm.clone()));
        let run = Run::new(documents(&["a.html"]), &root);
        let ctx = StageContext {
            run: &run,
            slot_id: 2,
            store: ArtifactStore::new(root.join("flow2")),
        };

        let err = stage.run(&ctx, &OutputBag::default()).await.unwrap_err();
        assert!(err.to_string().contains("renderer exited"));

        let _ = std::fs::remove_dir_all(&root);
    }
}
