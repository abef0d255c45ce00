//! Markdown conversion of the extraction results.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use extractflow_agents::ConverterGenerator;
use extractflow_artifacts::ArtifactStore;
use extractflow_plugin::{Converter, PluginLoader};
use extractflow_shared::{
    ContentAnalysis, ConversionSummary, Decoded, ExtractflowError, FileRecord, OutputBag,
    OutputKey, Result, StageId,
};

use crate::stage::{Stage, StageContext, input};
use crate::stages::check_syntax;
use crate::stages::validation::{read_result, result_files};

pub const MARKDOWN_CONVERTER_FILE: &str = "markdown_converter.py";
pub const MARKDOWN_DIR: &str = "markdown";
pub const MARKDOWN_SUMMARY_FILE: &str = "markdown_conversion_summary.json";

/// Extraction results shown to the content analysis.
const MAX_SAMPLES: usize = 5;

/// Regenerations allowed after converter code fails to compile.
const MAX_REGENERATIONS: usize = 2;

/// Generates a converter from sample results and renders every result as Markdown.
pub struct MarkdownConversionStage {
    generator: Arc<dyn ConverterGenerator>,
    loader: Arc<dyn PluginLoader>,
    enabled: bool,
}

impl MarkdownConversionStage {
    pub fn new(
        generator: Arc<dyn ConverterGenerator>,
        loader: Arc<dyn PluginLoader>,
        enabled: bool,
    ) -> Self {
        Self {
            generator,
            loader,
            enabled,
        }
    }

    /// Generate converter source that compiles, regenerating strictly on failure.
    async fn compiling_converter(
        &self,
        analysis: &Decoded<ContentAnalysis>,
        sample: &Value,
    ) -> Result<String> {
        let mut code = self
            .generator
            .generate_converter(analysis, sample, false)
            .await?;
        let mut regenerations = 0;

        loop {
            let check = check_syntax(&self.loader, &code).await?;
            if check.ok {
                return Ok(code);
            }
            let error = check.error.unwrap_or_else(|| "invalid syntax".into());
            if regenerations == MAX_REGENERATIONS {
                return Err(ExtractflowError::Plugin(format!(
                    "converter code does not compile after {MAX_REGENERATIONS} regenerations: {error}"
                )));
            }
            regenerations += 1;
            warn!(
                attempt = regenerations,
                line = check.line,
                error = %error,
                "converter code does not compile, regenerating"
            );
            code = self
                .generator
                .generate_converter(analysis, sample, true)
                .await?;
        }
    }
}

#[async_trait]
impl Stage for MarkdownConversionStage {
    fn id(&self) -> StageId {
        StageId::MarkdownConverted
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Extraction]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[
            OutputKey::ContentAnalysis,
            OutputKey::MarkdownConverterCode,
            OutputKey::Conversion,
        ]
    }

    fn is_optional(&self) -> bool {
        true
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        let extraction = input(&inputs.extraction, self.id(), OutputKey::Extraction)?;

        let files = result_files(&extraction.results_dir);
        if files.is_empty() {
            return Err(ExtractflowError::validation(format!(
                "no extraction results to convert in {}",
                extraction.results_dir.display()
            )));
        }

        let samples: Vec<Value> = files
            .iter()
            .take(MAX_SAMPLES)
            .filter_map(|p| read_result(p))
            .collect();
        let Some(sample) = samples.first() else {
            return Err(ExtractflowError::parse(
                "none of the sampled extraction results could be read",
            ));
        };
        info!(files = files.len(), samples = samples.len(), "analyzing extraction results");

        let analysis = self.generator.analyze_content(&samples).await?;
        let code = self.compiling_converter(&analysis, sample).await?;

        ctx.store.write_text(MARKDOWN_CONVERTER_FILE, &code)?;
        let source = ctx.store.path_of(MARKDOWN_CONVERTER_FILE);
        let loader = Arc::clone(&self.loader);
        let converter = tokio::task::spawn_blocking(move || loader.load_converter(&source))
            .await
            .map_err(|e| ExtractflowError::Plugin(format!("converter load task failed: {e}")))??;

        let store = ctx.store.clone();
        let records = tokio::task::spawn_blocking(move || convert_all(converter, &files, &store))
            .await
            .map_err(|e| ExtractflowError::Plugin(format!("conversion task failed: {e}")))?;

        let summary = ConversionSummary::new(ctx.store.path_of(MARKDOWN_DIR), records);
        ctx.store.save_json(MARKDOWN_SUMMARY_FILE, &summary);
        info!(
            converted = summary.converted_files,
            failed = summary.failed_files,
            dir = %summary.output_dir.display(),
            "markdown conversion finished"
        );

        Ok(OutputBag {
            content_analysis: Some(analysis),
            markdown_converter_code: Some(code),
            conversion: Some(summary),
            ..OutputBag::default()
        })
    }
}

fn convert_all(
    mut converter: Box<dyn Converter>,
    files: &[PathBuf],
    store: &ArtifactStore,
) -> Vec<FileRecord> {
    files
        .iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = path
                .file_stem()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let filename = format!("{MARKDOWN_DIR}/{stem}.md");

            let converted = read_result(path)
                .ok_or_else(|| ExtractflowError::parse("extraction result is unreadable"))
                .and_then(|record| converter.convert(&record))
                .and_then(|markdown| store.write_text(&filename, &markdown));

            match converted {
                Ok(_) => FileRecord::success(name, store.path_of(&filename).display().to_string()),
                Err(e) => {
                    warn!(file = %name, error = %e, "conversion failed");
                    FileRecord::failed(name, e.to_string())
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Run;
    use crate::testing::{FakeLoader, ScriptedLlm, documents, list_files, temp_root};
    use extractflow_shared::ExtractionSummary;
    use std::sync::atomic::Ordering;

    struct Fixture {
        root: PathBuf,
        llm: Arc<ScriptedLlm>,
        store: ArtifactStore,
        run: Run,
    }

    impl Fixture {
        fn new() -> Self {
            let root = temp_root("stage-markdown");
            Self {
                store: ArtifactStore::new(root.join("flow7")),
                run: Run::new(documents(&["a.html"]), &root),
                llm: Arc::new(ScriptedLlm::default()),
                root,
            }
        }

        fn stage(&self) -> MarkdownConversionStage {
            MarkdownConversionStage::new(self.llm.clone(), Arc::new(FakeLoader::default()), true)
        }

        fn ctx(&self) -> StageContext<'_> {
            StageContext {
                run: &self.run,
                slot_id: 7,
                store: self.store.clone(),
            }
        }

        /// Extraction results as the validation stage would leave them.
        fn results(&self, titles: &[&str]) -> OutputBag {
            let dir = self.root.join("flow6/extraction_results");
            std::fs::create_dir_all(&dir).unwrap();
            for title in titles {
                std::fs::write(
                    dir.join(format!("{title}.json")),
                    serde_json::json!({ "title": title }).to_string(),
                )
                .unwrap();
            }
            OutputBag {
                extraction: Some(ExtractionSummary::new(dir, vec![])),
                ..OutputBag::default()
            }
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.root);
        }
    }

    #[tokio::test]
    async fn every_result_becomes_a_markdown_file() {
        let fx = Fixture::new();
        let outputs = fx
            .stage()
            .run(&fx.ctx(), &fx.results(&["first", "second"]))
            .await
            .unwrap();

        let summary = outputs.conversion.unwrap();
        assert_eq!(summary.converted_files, 2);
        assert_eq!(
            list_files(&fx.store.path_of(MARKDOWN_DIR)),
            vec!["first.md", "second.md"]
        );
        assert_eq!(
            fx.store.read_text("markdown/second.md").as_deref(),
            Some("# second\n")
        );
        assert!(fx.store.path_of(MARKDOWN_CONVERTER_FILE).is_file());
        assert!(fx.store.path_of(MARKDOWN_SUMMARY_FILE).is_file());
        assert_eq!(
            outputs
                .content_analysis
                .unwrap()
                .structured()
                .unwrap()
                .recommendations
                .as_deref(),
            Some("2 samples")
        );
    }

    #[tokio::test]
    async fn samples_are_capped() {
        let fx = Fixture::new();
        let titles: Vec<String> = (0..7).map(|i| format!("doc{i}")).collect();
        let titles: Vec<&str> = titles.iter().map(String::as_str).collect();

        let outputs = fx.stage().run(&fx.ctx(), &fx.results(&titles)).await.unwrap();
        let analysis = outputs.content_analysis.unwrap();
        assert_eq!(
            analysis.structured().unwrap().recommendations.as_deref(),
            Some("5 samples")
        );
        assert_eq!(outputs.conversion.unwrap().converted_files, 7);
    }

    #[tokio::test]
    async fn broken_converter_is_regenerated_strictly() {
        let fx = Fixture::new();
        fx.llm.broken_converters.store(2, Ordering::SeqCst);

        fx.stage()
            .run(&fx.ctx(), &fx.results(&["only"]))
            .await
            .unwrap();
        assert_eq!(fx.llm.count("converter"), 1);
        assert_eq!(fx.llm.count("converter_strict"), 2);
    }

    #[tokio::test]
    async fn converter_that_never_compiles_fails() {
        let fx = Fixture::new();
        fx.llm.broken_converters.store(3, Ordering::SeqCst);

        let err = fx
            .stage()
            .run(&fx.ctx(), &fx.results(&["only"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not compile"));
        assert!(!fx.store.path_of(MARKDOWN_CONVERTER_FILE).exists());
    }

    #[tokio::test]
    async fn no_results_fails_the_stage() {
        let fx = Fixture::new();
        let err = fx
            .stage()
            .run(&fx.ctx(), &fx.results(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractflowError::Validation { .. }));
        assert_eq!(fx.llm.count("content_analysis"), 0);
    }
}
