//! End-to-end `run` pipeline: input batch → seven stages → extraction results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use extractflow_agents::{
    CodeGenerator, CodeValidator, ConverterGenerator, DocumentAnalyzer, LlmClient,
    LlmCodeValidator, LlmConverterGenerator, LlmDocumentAnalyzer, LlmOrchestrator,
    LlmVisualAnalyzer, Renderer, SchemaGenerator, Synthesizer, VisualAnalyzer,
};
use extractflow_documents::{DOWNLOAD_DIR, load_batch};
use extractflow_plugin::{PluginLoader, SubprocessLoader};
use extractflow_shared::{
    AppConfig, DownloadConfig, EndpointConfig, InputDocument, LlmCredentials, Result,
    RetryPolicy, RunOptions,
};

use crate::executor::{PipelineExecutor, PipelineObserver, PipelineReport};
use crate::stage::{Run, Stage};
use crate::stages::{
    CodeGenerationStage, CodeValidationStage, MarkdownConversionStage, SchemaStage,
    SynthesisStage, TextAnalysisStage, VisualAnalysisStage,
};

/// Subdirectory of the download dir holding the downloaded spread batch.
const SPREAD_DOWNLOAD_SUBDIR: &str = "spread";

/// Everything the stages call out to.
pub struct Collaborators {
    pub document_analyzer: Arc<dyn DocumentAnalyzer>,
    /// `None` disables visual analysis.
    pub visual_analyzer: Option<Arc<dyn VisualAnalyzer>>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub schema_generator: Arc<dyn SchemaGenerator>,
    pub code_generator: Arc<dyn CodeGenerator>,
    pub code_validator: Arc<dyn CodeValidator>,
    pub converter_generator: Arc<dyn ConverterGenerator>,
    pub loader: Arc<dyn PluginLoader>,
}

impl Collaborators {
    /// Build the LLM-backed collaborators.
    ///
    /// The orchestrator endpoint synthesizes, writes the schema and the
    /// extractor. The analyzer endpoint handles per-document analysis, code
    /// review and the Markdown converter. The vision endpoint is only
    /// contacted when a renderer is configured.
    pub fn from_config(
        config: &AppConfig,
        credentials: &LlmCredentials,
        options: &RunOptions,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.llm.timeout_secs);
        let retry = RetryPolicy::from(&config.llm);
        let client = |endpoint: &EndpointConfig, key: &str| {
            LlmClient::new(endpoint, key, timeout, retry)
        };

        let loader: Arc<dyn PluginLoader> =
            Arc::new(SubprocessLoader::new(options.interpreter.clone()));

        let orchestrator = Arc::new(LlmOrchestrator::new(client(
            &config.llm.orchestrator,
            &credentials.orchestrator,
        )?));

        let visual_analyzer = match Renderer::parse(&config.visual.renderer) {
            Some(renderer) if options.visual => {
                let vision = client(&config.llm.vision, &credentials.vision)?;
                Some(Arc::new(LlmVisualAnalyzer::new(vision, renderer)) as Arc<dyn VisualAnalyzer>)
            }
            _ => None,
        };

        Ok(Self {
            document_analyzer: Arc::new(LlmDocumentAnalyzer::new(
                client(&config.llm.analyzer, &credentials.analyzer)?,
                options.max_prompt_chars,
            )),
            visual_analyzer,
            synthesizer: orchestrator.clone(),
            schema_generator: orchestrator.clone(),
            code_generator: orchestrator,
            code_validator: Arc::new(LlmCodeValidator::new(
                client(&config.llm.analyzer, &credentials.analyzer)?,
                Arc::clone(&loader),
            )),
            converter_generator: Arc::new(LlmConverterGenerator::new(client(
                &config.llm.analyzer,
                &credentials.analyzer,
            )?)),
            loader,
        })
    }
}

/// The seven stages in execution order.
///
/// `targets` replaces the input batch as the documents the validated
/// extractor runs over.
pub fn build_stages(
    collaborators: &Collaborators,
    options: &RunOptions,
    targets: Option<Vec<InputDocument>>,
) -> Vec<Box<dyn Stage>> {
    let visual = collaborators
        .visual_analyzer
        .clone()
        .filter(|_| options.visual);

    let mut validation = CodeValidationStage::new(
        Arc::clone(&collaborators.code_validator),
        Arc::clone(&collaborators.loader),
    );
    if let Some(targets) = targets {
        validation = validation.with_targets(targets);
    }

    vec![
        Box::new(TextAnalysisStage::new(Arc::clone(&collaborators.document_analyzer))),
        Box::new(VisualAnalysisStage::new(visual)),
        Box::new(SynthesisStage::new(Arc::clone(&collaborators.synthesizer))),
        Box::new(SchemaStage::new(Arc::clone(&collaborators.schema_generator))),
        Box::new(CodeGenerationStage::new(Arc::clone(&collaborators.code_generator))),
        Box::new(validation),
        Box::new(MarkdownConversionStage::new(
            Arc::clone(&collaborators.converter_generator),
            Arc::clone(&collaborators.loader),
            options.markdown,
        )),
    ]
}

/// Run the full pipeline with collaborators built from `config`.
pub async fn run_pipeline(
    config: &AppConfig,
    options: &RunOptions,
    credentials: &LlmCredentials,
    observer: &dyn PipelineObserver,
) -> Result<PipelineReport> {
    let collaborators = Collaborators::from_config(config, credentials, options)?;
    run_with(&collaborators, &config.download, options, observer).await
}

/// Load the batches and run the stages against `collaborators`.
#[instrument(skip_all, fields(input = %options.input_dir.display(), output = %options.output_dir.display()))]
pub async fn run_with(
    collaborators: &Collaborators,
    download: &DownloadConfig,
    options: &RunOptions,
    observer: &dyn PipelineObserver,
) -> Result<PipelineReport> {
    let start = Instant::now();
    let download_dir = options.output_dir.join(DOWNLOAD_DIR);

    let documents = load_batch(&options.input_dir, &download_dir, download).await?;
    let targets = match &options.spread_dir {
        Some(dir) => {
            let spread =
                load_batch(dir, &download_dir.join(SPREAD_DOWNLOAD_SUBDIR), download).await?;
            info!(count = spread.len(), dir = %dir.display(), "extractor will run over the spread batch");
            Some(spread)
        }
        None => None,
    };

    let run = Run::new(documents, &options.output_dir);
    info!(run_id = %run.id, documents = run.documents.len(), "starting run");

    let executor = PipelineExecutor::new(
        &options.output_dir,
        build_stages(collaborators, options, targets),
    )
    .resume(options.resume);
    let report = executor.run(&run, observer).await?;

    info!(
        executed = report.executed().len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "run finished"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SilentObserver, StageOutcome};
    use crate::stages::{EXTRACTION_RESULTS_DIR, MARKDOWN_DIR};
    use crate::testing::{EXTRACTOR_SOURCE, FakeLoader, ScriptedLlm, list_files, temp_root};
    use extractflow_artifacts::FlowAllocator;
    use extractflow_shared::{CheckpointStatus, ExtractflowError, StageId};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::Ordering;

    struct Fixture {
        root: PathBuf,
        llm: Arc<ScriptedLlm>,
        options: RunOptions,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Self {
            let root = temp_root("pipeline");
            let input = root.join("input");
            std::fs::create_dir_all(&input).unwrap();
            for name in names {
                std::fs::write(
                    input.join(name),
                    format!("<html><body><h1>{name}</h1></body></html>"),
                )
                .unwrap();
            }

            let mut options = RunOptions::from(&AppConfig::default());
            options.input_dir = input;
            options.output_dir = root.join("output");
            options.spread_dir = None;
            options.visual = true;
            options.markdown = false;
            options.resume = true;

            Self {
                root,
                llm: Arc::new(ScriptedLlm::default()),
                options,
            }
        }

        fn collaborators(&self) -> Collaborators {
            let llm = &self.llm;
            Collaborators {
                document_analyzer: llm.clone(),
                visual_analyzer: Some(llm.clone() as Arc<dyn VisualAnalyzer>),
                synthesizer: llm.clone(),
                schema_generator: llm.clone(),
                code_generator: llm.clone(),
                code_validator: llm.clone(),
                converter_generator: llm.clone(),
                loader: Arc::new(FakeLoader::default()),
            }
        }

        async fn run(&self) -> Result<PipelineReport> {
            run_with(
                &self.collaborators(),
                &DownloadConfig::default(),
                &self.options,
                &SilentObserver,
            )
            .await
        }

        fn output(&self) -> &Path {
            &self.options.output_dir
        }

        fn checkpoint_bytes(&self) -> Vec<Vec<u8>> {
            FlowAllocator::new(self.output())
                .scan()
                .into_iter()
                .map(|e| std::fs::read(e.slot.dir.join("checkpoint.json")).unwrap())
                .collect()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn three_documents_complete_every_stage() {
        let fx = Fixture::new(&["a.html", "b.html", "c.html"]);
        let report = fx.run().await.unwrap();

        let entries = FlowAllocator::new(fx.output()).scan();
        let steps: Vec<StageId> = entries
            .iter()
            .map(|e| {
                let checkpoint = e.checkpoint.as_ref().unwrap();
                assert_eq!(checkpoint.status, CheckpointStatus::Completed);
                checkpoint.step.unwrap()
            })
            .collect();
        assert_eq!(
            steps,
            vec![
                StageId::TextAnalysis,
                StageId::VisualAnalysis,
                StageId::Synthesized,
                StageId::Schema,
                StageId::CodeGenerated,
                StageId::CodeValidated,
            ]
        );
        assert_eq!(
            report.outcome(StageId::MarkdownConverted),
            Some(&StageOutcome::Skipped)
        );

        let validated = report.slot_dir(StageId::CodeValidated).unwrap();
        assert_eq!(
            list_files(&validated.join(EXTRACTION_RESULTS_DIR)),
            vec!["a.json", "b.json", "c.json"]
        );
        assert_eq!(report.outputs.extraction.unwrap().processed_files, 3);
    }

    #[tokio::test]
    async fn rerun_after_completion_is_idempotent() {
        let fx = Fixture::new(&["a.html", "b.html"]);
        fx.run().await.unwrap();
        let before = fx.checkpoint_bytes();
        let calls = fx.llm.calls.lock().unwrap().len();

        let report = fx.run().await.unwrap();
        assert!(report.executed().is_empty());
        assert_eq!(fx.llm.calls.lock().unwrap().len(), calls);
        assert_eq!(fx.checkpoint_bytes(), before);
    }

    #[tokio::test]
    async fn rerun_with_a_differently_spelled_input_dir_resumes() {
        let mut fx = Fixture::new(&["a.html", "b.html"]);
        fx.run().await.unwrap();
        let calls = fx.llm.calls.lock().unwrap().len();

        fx.options.input_dir = fx.root.join(".").join("input").join(".");
        let report = fx.run().await.unwrap();
        assert!(report.executed().is_empty());
        assert_eq!(fx.llm.calls.lock().unwrap().len(), calls);
        assert_eq!(FlowAllocator::new(fx.output()).scan().len(), 6);
    }

    #[tokio::test]
    async fn failed_code_generation_is_retried_in_its_slot() {
        let fx = Fixture::new(&["a.html", "b.html"]);
        fx.llm.fail_codegen.store(true, Ordering::SeqCst);

        let err = fx.run().await.unwrap_err();
        let ExtractflowError::StageFailed { stage, flow_id, .. } = &err else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(stage, "code_generated");
        assert_eq!(*flow_id, 5);

        let entries = FlowAllocator::new(fx.output()).scan();
        assert_eq!(entries.len(), 5);
        let marker = entries[4].checkpoint.as_ref().unwrap();
        assert_eq!(marker.status, CheckpointStatus::Failed);
        assert_eq!(marker.step, Some(StageId::Schema));
        assert!(marker.is_retry_marker(StageId::CodeGenerated));

        fx.llm.fail_codegen.store(false, Ordering::SeqCst);
        let analyses = fx.llm.count("analyze");
        let report = fx.run().await.unwrap();

        assert_eq!(
            report.executed(),
            vec![StageId::CodeGenerated, StageId::CodeValidated]
        );
        assert_eq!(
            report.outcome(StageId::CodeGenerated).unwrap().slot(),
            Some(5)
        );
        assert_eq!(fx.llm.count("analyze"), analyses);
    }

    #[tokio::test]
    async fn extractor_without_extract_writes_no_results() {
        let fx = Fixture::new(&["a.html", "b.html", "c.html"]);
        fx.llm
            .set_code(&EXTRACTOR_SOURCE.replace("def extract(", "def parse("));

        let err = fx.run().await.unwrap_err();
        assert!(matches!(
            &err,
            ExtractflowError::StageFailed { stage, .. } if stage == "code_validated"
        ));
        assert!(err.to_string().contains("`extract`"));

        let slot = fx.output().join("flow6");
        assert!(list_files(&slot.join(EXTRACTION_RESULTS_DIR)).is_empty());
    }

    #[tokio::test]
    async fn disabled_visual_analysis_leaves_an_empty_gap() {
        let mut fx = Fixture::new(&["a.html", "b.html"]);
        fx.options.visual = false;

        let report = fx.run().await.unwrap();
        assert_eq!(
            report.outcome(StageId::VisualAnalysis),
            Some(&StageOutcome::Skipped)
        );
        assert_eq!(report.outputs.visual_results, Some(vec![]));
        assert_eq!(fx.llm.count("visual"), 0);
        assert_eq!(FlowAllocator::new(fx.output()).scan().len(), 5);
    }

    #[tokio::test]
    async fn markdown_conversion_runs_when_enabled() {
        let mut fx = Fixture::new(&["a.html", "b.html"]);
        fx.options.markdown = true;

        let report = fx.run().await.unwrap();
        let slot = report.slot_dir(StageId::MarkdownConverted).unwrap();
        assert_eq!(list_files(&slot.join(MARKDOWN_DIR)), vec!["a.md", "b.md"]);
        assert_eq!(report.outputs.conversion.unwrap().converted_files, 2);
    }

    #[tokio::test]
    async fn spread_batch_receives_the_extractor() {
        let mut fx = Fixture::new(&["a.html"]);
        let spread = fx.root.join("spread");
        std::fs::create_dir_all(&spread).unwrap();
        for name in ["x.html", "y.html"] {
            std::fs::write(spread.join(name), "<html><h1>spread</h1></html>").unwrap();
        }
        fx.options.spread_dir = Some(spread);

        let report = fx.run().await.unwrap();
        let slot = report.slot_dir(StageId::CodeValidated).unwrap();
        assert_eq!(
            list_files(&slot.join(EXTRACTION_RESULTS_DIR)),
            vec!["x.json", "y.json"]
        );
    }

    #[tokio::test]
    async fn empty_input_directory_fails_before_any_slot() {
        let fx = Fixture::new(&[]);
        assert!(fx.run().await.is_err());
        assert!(FlowAllocator::new(fx.output()).scan().is_empty());
    }
}
