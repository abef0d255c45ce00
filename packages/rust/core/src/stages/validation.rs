//! Validation of the generated extractor and its first real use.
//!
//! The validated source is loaded through the plugin boundary, which checks
//! the extractor contract before anything runs, and then applied to every
//! target document. One JSON file per document lands in
//! `extraction_results/`.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use extractflow_agents::CodeValidator;
use extractflow_artifacts::ArtifactStore;
use extractflow_documents::unique_result_stems;
use extractflow_plugin::{Extractor, PluginLoader};
use extractflow_shared::{
    ExtractflowError, ExtractionSummary, FileRecord, InputDocument, IssueCategory, OutputBag,
    OutputKey, Result, StageId, ValidationReport,
};

use crate::stage::{Stage, StageContext, input};
use crate::stages::codegen::EXTRACTION_CODE_FILE;

pub const VALIDATION_RESULT_FILE: &str = "code_validation_result.json";
pub const EXTRACTION_RESULTS_DIR: &str = "extraction_results";
pub const EXTRACTION_SUMMARY_FILE: &str = "extraction_results_summary.json";

/// Comment added to extractor source that passed validation unchanged.
pub const VALIDATED_MARKER: &str = "# This code has been validated and verified";

/// Insert [`VALIDATED_MARKER`] below the leading comment block of `source`.
pub fn mark_validated(source: &str) -> String {
    if source.contains(VALIDATED_MARKER) {
        return source.to_string();
    }

    let lines: Vec<&str> = source.lines().collect();
    let header = lines
        .iter()
        .take_while(|l| l.trim_start().starts_with('#'))
        .count();

    let mut marked: Vec<&str> = Vec::with_capacity(lines.len() + 1);
    marked.extend_from_slice(&lines[..header]);
    marked.push(VALIDATED_MARKER);
    marked.extend_from_slice(&lines[header..]);

    let mut out = marked.join("\n");
    if source.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Validates the extractor, then runs it over the target batch.
pub struct CodeValidationStage {
    validator: Arc<dyn CodeValidator>,
    loader: Arc<dyn PluginLoader>,
    /// Documents to extract from; the run's own batch when `None`.
    targets: Option<Vec<InputDocument>>,
}

impl CodeValidationStage {
    pub fn new(validator: Arc<dyn CodeValidator>, loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            validator,
            loader,
            targets: None,
        }
    }

    /// Extract from `targets` instead of the run's input batch.
    pub fn with_targets(mut self, targets: Vec<InputDocument>) -> Self {
        self.targets = Some(targets);
        self
    }
}

#[async_trait]
impl Stage for CodeValidationStage {
    fn id(&self) -> StageId {
        StageId::CodeValidated
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        &[OutputKey::Schema, OutputKey::ExtractionCode]
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        &[
            OutputKey::Validation,
            OutputKey::ValidatedCode,
            OutputKey::Extraction,
        ]
    }

    #[instrument(skip_all, fields(slot = ctx.slot_id))]
    async fn run(&self, ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        let schema = input(&inputs.schema, self.id(), OutputKey::Schema)?;
        let code = input(&inputs.extraction_code, self.id(), OutputKey::ExtractionCode)?;

        // --- Validation ---
        let first = self.validator.validate(code, schema).await?;
        let (report, validated) = match first.fixed_source.clone() {
            Some(fixed) if !first.is_valid => {
                info!("adopting the reviewed extractor and validating it again");
                let second = self.validator.validate(&fixed, schema).await?;
                let suggestions = if second.suggestions.is_empty() {
                    first.suggestions
                } else {
                    second.suggestions
                };
                let report = ValidationReport {
                    suggestions,
                    fixed_source: Some(fixed.clone()),
                    fixed_applied: true,
                    ..second
                };
                (report, fixed)
            }
            _ => (first, mark_validated(code)),
        };

        if report.is_valid {
            info!(
                warnings = report.count(IssueCategory::Warning),
                fixed = report.fixed_applied,
                "extractor validated"
            );
        } else {
            warn!(
                issues = report.issues.len(),
                "extractor still has validation issues, running it anyway"
            );
        }

        ctx.store.save_json(VALIDATION_RESULT_FILE, &report);
        let meta = ctx.store.write_text(EXTRACTION_CODE_FILE, &validated)?;
        debug!(file = %meta.filename, "validated extractor saved");

        // --- Extraction ---
        let schema_value = serde_json::to_value(schema)
            .map_err(|e| ExtractflowError::parse(format!("failed to serialize schema: {e}")))?;
        let source = ctx.store.path_of(EXTRACTION_CODE_FILE);
        let loader = Arc::clone(&self.loader);
        let extractor = tokio::task::spawn_blocking(move || {
            loader.load_extractor(&source, &schema_value)
        })
        .await
        .map_err(|e| ExtractflowError::Plugin(format!("extractor load task failed: {e}")))??;

        let targets = self
            .targets
            .clone()
            .unwrap_or_else(|| ctx.run.documents.clone());
        let store = ctx.store.clone();
        let records = tokio::task::spawn_blocking(move || extract_all(extractor, &targets, &store))
            .await
            .map_err(|e| ExtractflowError::Plugin(format!("extraction task failed: {e}")))?;

        let summary = ExtractionSummary::new(ctx.store.path_of(EXTRACTION_RESULTS_DIR), records);
        ctx.store.save_json(EXTRACTION_SUMMARY_FILE, &summary);
        info!(
            processed = summary.processed_files,
            failed = summary.failed_files,
            dir = %summary.results_dir.display(),
            "extraction finished"
        );

        Ok(OutputBag {
            validation: Some(report),
            validated_code: Some(validated),
            extraction: Some(summary),
            ..OutputBag::default()
        })
    }
}

/// Run the loaded extractor over every document, one result file each.
fn extract_all(
    mut extractor: Box<dyn Extractor>,
    documents: &[InputDocument],
    store: &ArtifactStore,
) -> Vec<FileRecord> {
    let total = documents.len();
    let mut records = Vec::with_capacity(total);
    let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
    let stems = unique_result_stems(&names);

    for (i, (document, stem)) in documents.iter().zip(&stems).enumerate() {
        debug!(document = %document.name, current = i + 1, total, "extracting");
        let filename = format!("{EXTRACTION_RESULTS_DIR}/{stem}.json");

        let written = extractor
            .extract(&document.content, document.path.as_deref())
            .and_then(|record| {
                serde_json::to_string_pretty(&record).map_err(|e| {
                    ExtractflowError::parse(format!("failed to serialize extraction: {e}"))
                })
            })
            .and_then(|json| store.write_text(&filename, &json));

        match written {
            Ok(_) => records.push(FileRecord::success(
                &document.name,
                store.path_of(&filename).display().to_string(),
            )),
            Err(e) => {
                warn!(document = %document.name, error = %e, "extraction failed");
                records.push(FileRecord::failed(&document.name, e.to_string()));
            }
        }
    }

    records
}

/// Every extraction result file in `dir`, sorted by name.
pub(crate) fn result_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|x| x == "json"))
        .collect();
    files.sort();
    files
}

/// Parse a result file, `None` (logged) when unreadable.
pub(crate) fn read_result(path: &std::path::Path) -> Option<Value> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read extraction result");
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "extraction result is not JSON");
            None
        }
    }
}
