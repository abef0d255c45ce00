//! Scripted stages, collaborators and plugins for executor and pipeline tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use extractflow_agents::{
    CodeGenerator, CodeValidator, ConverterGenerator, DocumentAnalyzer, SchemaGenerator,
    Synthesizer, VisualAnalyzer,
};
use extractflow_plugin::{
    ClassInfo, Converter, ExtractedRecord, ExtractedValue, Extractor, MethodInfo, ParamInfo,
    PluginDescription, PluginKind, PluginLoader, SyntaxCheck, verify_contract,
};
use extractflow_shared::{
    ContentAnalysis, ConversionSummary, Decoded, DocumentAnalysis, ExtractflowError,
    ExtractionSchema, ExtractionSummary, InputDocument, IssueCategory, OutputBag, OutputKey,
    Result, SchemaSection, StageId, StructureReport, Synthesis, ValidationIssue,
    ValidationReport, VisualAnalysis,
};

use crate::stage::{Stage, StageContext};

pub(crate) fn temp_root(prefix: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("ef-{prefix}-{}", uuid::Uuid::now_v7()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub(crate) fn documents(names: &[&str]) -> Vec<InputDocument> {
    names
        .iter()
        .map(|name| InputDocument {
            identifier: format!("pages/{name}"),
            name: (*name).to_string(),
            path: None,
            content: format!("<html><body><h1>{name}</h1></body></html>"),
        })
        .collect()
}

/// Every file below `dir`, relative and sorted.
pub(crate) fn list_files(dir: &Path) -> Vec<String> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            files.extend(list_files(&path).into_iter().map(|f| format!("{name}/{f}")));
        } else {
            files.push(name);
        }
    }
    files.sort();
    files
}

// ---------------------------------------------------------------------------
// Fake stages
// ---------------------------------------------------------------------------

/// Placeholder values for the listed artifacts.
pub(crate) fn outputs_for(keys: &[OutputKey]) -> OutputBag {
    let mut bag = OutputBag::default();
    for key in keys {
        match key {
            OutputKey::FileIdentifiers => bag.file_identifiers = Some(vec![]),
            OutputKey::AnalysisResults => bag.analysis_results = Some(vec![]),
            OutputKey::VisualResults => bag.visual_results = Some(vec![]),
            OutputKey::Synthesized => bag.synthesized = Some(Decoded::raw("synthesis")),
            OutputKey::Schema => bag.schema = Some(Decoded::Structured(ExtractionSchema::default())),
            OutputKey::ExtractionCode => bag.extraction_code = Some("code".into()),
            OutputKey::Validation => bag.validation = Some(ValidationReport::default()),
            OutputKey::ValidatedCode => bag.validated_code = Some("code".into()),
            OutputKey::Extraction => bag.extraction = Some(ExtractionSummary::default()),
            OutputKey::ContentAnalysis => {
                bag.content_analysis = Some(Decoded::Structured(ContentAnalysis::default()))
            }
            OutputKey::MarkdownConverterCode => bag.markdown_converter_code = Some("conv".into()),
            OutputKey::Conversion => bag.conversion = Some(ConversionSummary::default()),
        }
    }
    bag
}

/// A stage that produces placeholder outputs and can be told to fail.
pub(crate) struct FakeStage {
    pub id: StageId,
    pub requires: &'static [OutputKey],
    pub produces: &'static [OutputKey],
    pub optional: bool,
    pub enabled: bool,
    pub fail: Arc<AtomicBool>,
    pub runs: Arc<AtomicUsize>,
    /// Outputs to leave out, to exercise the output contract.
    pub omit: &'static [OutputKey],
}

impl FakeStage {
    pub fn new(id: StageId, requires: &'static [OutputKey], produces: &'static [OutputKey]) -> Self {
        Self {
            id,
            requires,
            produces,
            optional: false,
            enabled: true,
            fail: Arc::new(AtomicBool::new(false)),
            runs: Arc::new(AtomicUsize::new(0)),
            omit: &[],
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[async_trait]
impl Stage for FakeStage {
    fn id(&self) -> StageId {
        self.id
    }

    fn required_inputs(&self) -> &'static [OutputKey] {
        self.requires
    }

    fn produced_outputs(&self) -> &'static [OutputKey] {
        self.produces
    }

    fn is_optional(&self) -> bool {
        self.optional
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn gap_outputs(&self) -> OutputBag {
        outputs_for(self.produces)
    }

    async fn run(&self, _ctx: &StageContext<'_>, inputs: &OutputBag) -> Result<OutputBag> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(key) = inputs.missing(self.requires).first() {
            return Err(ExtractflowError::validation(format!("saw no {key}")));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ExtractflowError::Network(format!("{} collaborator down", self.id)));
        }
        let keys: Vec<OutputKey> = self
            .produces
            .iter()
            .copied()
            .filter(|k| !self.omit.contains(k))
            .collect();
        Ok(outputs_for(&keys))
    }
}

/// Handles to the fakes of [`fake_pipeline`].
pub(crate) struct FakeHandles {
    pub fail: BTreeMap<StageId, Arc<AtomicBool>>,
    pub runs: BTreeMap<StageId, Arc<AtomicUsize>>,
}

impl FakeHandles {
    pub fn runs(&self, id: StageId) -> usize {
        self.runs[&id].load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, id: StageId, failing: bool) {
        self.fail[&id].store(failing, Ordering::SeqCst);
    }
}

/// Text analysis through code generation, with an optional visual stage.
pub(crate) fn fake_pipeline(visual_enabled: bool) -> (Vec<Box<dyn Stage>>, FakeHandles) {
    let mut visual = FakeStage::new(
        StageId::VisualAnalysis,
        &[OutputKey::FileIdentifiers],
        &[OutputKey::VisualResults],
    )
    .optional();
    visual.enabled = visual_enabled;

    let stages = vec![
        FakeStage::new(
            StageId::TextAnalysis,
            &[OutputKey::FileIdentifiers],
            &[OutputKey::AnalysisResults],
        ),
        visual,
        FakeStage::new(
            StageId::Synthesized,
            &[
                OutputKey::FileIdentifiers,
                OutputKey::AnalysisResults,
                OutputKey::VisualResults,
            ],
            &[OutputKey::Synthesized],
        ),
        FakeStage::new(StageId::Schema, &[OutputKey::Synthesized], &[OutputKey::Schema]),
        FakeStage::new(
            StageId::CodeGenerated,
            &[OutputKey::Schema],
            &[OutputKey::ExtractionCode],
        ),
    ];

    let handles = FakeHandles {
        fail: stages.iter().map(|s| (s.id, Arc::clone(&s.fail))).collect(),
        runs: stages.iter().map(|s| (s.id, Arc::clone(&s.runs))).collect(),
    };
    let stages = stages
        .into_iter()
        .map(|s| Box::new(s) as Box<dyn Stage>)
        .collect();
    (stages, handles)
}

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

pub(crate) const EXTRACTOR_SOURCE: &str = r#"# Generated extractor
from typing import Any, Dict, Optional


class HTMLExtractor:
    def __init__(self, schema: Dict[str, Any]) -> None:
        self.schema = schema

    def extract(self, html_content: Optional[str] = None, file_path: Optional[str] = None) -> Dict[str, Any]:
        return {"title": html_content}
"#;

pub(crate) const CONVERTER_SOURCE: &str = r##"from typing import Any, Dict


class MarkdownConverter:
    def convert(self, json_data: Dict[str, Any]) -> str:
        return "# " + str(json_data.get("title"))
"##;

/// Marks source the fake loader refuses to compile.
pub(crate) const SYNTAX_ERROR: &str = "SYNTAX ERROR";

/// Marks source the scripted validator asks to have fixed.
pub(crate) const NEEDS_FIX: &str = "NEEDS FIX";

/// Every collaborator, answering from a script and recording its calls.
pub(crate) struct ScriptedLlm {
    pub calls: Mutex<Vec<&'static str>>,
    pub fail_codegen: AtomicBool,
    pub fail_visual: AtomicBool,
    pub code: Mutex<String>,
    /// Converter generations that return code that does not compile.
    pub broken_converters: AtomicUsize,
    /// Documents whose analysis fails.
    pub failing_documents: Vec<String>,
}

impl Default for ScriptedLlm {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_codegen: AtomicBool::new(false),
            fail_visual: AtomicBool::new(false),
            code: Mutex::new(EXTRACTOR_SOURCE.to_string()),
            broken_converters: AtomicUsize::new(0),
            failing_documents: Vec::new(),
        }
    }
}

impl ScriptedLlm {
    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == call).count()
    }

    pub fn set_code(&self, code: &str) {
        *self.code.lock().unwrap() = code.to_string();
    }
}

#[async_trait]
impl DocumentAnalyzer for ScriptedLlm {
    async fn analyze(&self, document: &InputDocument) -> Result<Decoded<StructureReport>> {
        self.record("analyze");
        if self.failing_documents.contains(&document.name) {
            return Err(ExtractflowError::Api {
                status: 500,
                message: "analysis backend error".into(),
            });
        }
        Ok(Decoded::Structured(StructureReport {
            file: Some(document.identifier.clone()),
            ..StructureReport::default()
        }))
    }
}

#[async_trait]
impl VisualAnalyzer for ScriptedLlm {
    async fn analyze(&self, document: &InputDocument, _workdir: &Path) -> Result<Decoded<Value>> {
        self.record("visual");
        if self.fail_visual.load(Ordering::SeqCst) {
            return Err(ExtractflowError::Plugin("renderer exited with 1".into()));
        }
        Ok(Decoded::Structured(
            serde_json::json!({ "layout_structure": document.name }),
        ))
    }
}

#[async_trait]
impl Synthesizer for ScriptedLlm {
    async fn synthesize(
        &self,
        identifiers: &[String],
        _analyses: &[DocumentAnalysis],
        visuals: &[VisualAnalysis],
    ) -> Result<Decoded<Synthesis>> {
        self.record("synthesize");
        Ok(Decoded::Structured(Synthesis {
            common_patterns: vec![Value::from(identifiers.len()), Value::from(visuals.len())],
            ..Synthesis::default()
        }))
    }
}

#[async_trait]
impl SchemaGenerator for ScriptedLlm {
    async fn generate_schema(
        &self,
        _synthesis: &Decoded<Synthesis>,
    ) -> Result<Decoded<ExtractionSchema>> {
        self.record("schema");
        Ok(Decoded::Structured(ExtractionSchema {
            schema_version: "1.0".into(),
            sections: vec![SchemaSection {
                name: "title".into(),
                xpath: Some("//h1".into()),
                ..SchemaSection::default()
            }],
            ..ExtractionSchema::default()
        }))
    }
}

#[async_trait]
impl CodeGenerator for ScriptedLlm {
    async fn generate_code(&self, _schema: &Decoded<ExtractionSchema>) -> Result<String> {
        self.record("codegen");
        if self.fail_codegen.load(Ordering::SeqCst) {
            return Err(ExtractflowError::Api {
                status: 401,
                message: "invalid API key".into(),
            });
        }
        Ok(self.code.lock().unwrap().clone())
    }
}

#[async_trait]
impl CodeValidator for ScriptedLlm {
    async fn validate(
        &self,
        source: &str,
        _schema: &Decoded<ExtractionSchema>,
    ) -> Result<ValidationReport> {
        self.record("validate");
        if source.contains(NEEDS_FIX) {
            let mut report = ValidationReport::from_issues(vec![ValidationIssue::new(
                IssueCategory::Robustness,
                "extraction code has no try/except error handling",
            )]);
            report.suggestions = vec!["wrap extraction in try/except".into()];
            report.fixed_source = Some(EXTRACTOR_SOURCE.to_string());
            return Ok(report);
        }
        Ok(ValidationReport::from_issues(vec![]))
    }
}

#[async_trait]
impl ConverterGenerator for ScriptedLlm {
    async fn analyze_content(&self, samples: &[Value]) -> Result<Decoded<ContentAnalysis>> {
        self.record("content_analysis");
        Ok(Decoded::Structured(ContentAnalysis {
            main_content_fields: vec!["title".into()],
            recommendations: Some(format!("{} samples", samples.len())),
            ..ContentAnalysis::default()
        }))
    }

    async fn generate_converter(
        &self,
        _analysis: &Decoded<ContentAnalysis>,
        _sample: &Value,
        strict: bool,
    ) -> Result<String> {
        self.record(if strict { "converter_strict" } else { "converter" });
        let broken = self
            .broken_converters
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if broken {
            Ok(format!("class MarkdownConverter  # {SYNTAX_ERROR}"))
        } else {
            Ok(CONVERTER_SOURCE.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Fake plugin loader
// ---------------------------------------------------------------------------

fn param(name: &str, required: bool) -> ParamInfo {
    ParamInfo {
        name: name.into(),
        kind: "positional_or_keyword".into(),
        required,
    }
}

/// A rough static reading of the scripted sources.
fn describe_source(source: &str) -> PluginDescription {
    let mut classes = Vec::new();
    if source.contains("class HTMLExtractor") {
        let mut methods = vec![MethodInfo {
            name: "__init__".into(),
            params: vec![param("schema", true)],
            returns: Some("None".into()),
        }];
        if source.contains("def extract(") {
            methods.push(MethodInfo {
                name: "extract".into(),
                params: vec![param("html_content", false), param("file_path", false)],
                returns: Some("Dict[str, Any]".into()),
            });
        }
        classes.push(ClassInfo {
            name: "HTMLExtractor".into(),
            methods,
        });
    }
    if source.contains("class MarkdownConverter") && source.contains("def convert(") {
        classes.push(ClassInfo {
            name: "MarkdownConverter".into(),
            methods: vec![MethodInfo {
                name: "convert".into(),
                params: vec![param("json_data", true)],
                returns: Some("str".into()),
            }],
        });
    }
    PluginDescription { classes }
}

/// Loads the scripted sources without an interpreter.
#[derive(Default)]
pub(crate) struct FakeLoader {
    pub loads: AtomicUsize,
    /// Schemas extractors were constructed with, in load order.
    pub schemas: Mutex<Vec<Value>>,
}

impl FakeLoader {
    fn read(source: &Path) -> Result<String> {
        std::fs::read_to_string(source).map_err(|e| ExtractflowError::io(source, e))
    }
}

impl PluginLoader for FakeLoader {
    fn describe(&self, source: &Path) -> Result<PluginDescription> {
        Ok(describe_source(&Self::read(source)?))
    }

    fn load_extractor(&self, source: &Path, schema: &Value) -> Result<Box<dyn Extractor>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.schemas.lock().unwrap().push(schema.clone());
        verify_contract(PluginKind::Extractor, &self.describe(source)?)?;
        Ok(Box::new(TitleExtractor))
    }

    fn load_converter(&self, source: &Path) -> Result<Box<dyn Converter>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        verify_contract(PluginKind::Converter, &self.describe(source)?)?;
        Ok(Box::new(TitleConverter))
    }

    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck> {
        if source.contains(SYNTAX_ERROR) {
            return Ok(SyntaxCheck {
                ok: false,
                error: Some("invalid syntax".into()),
                line: Some(1),
                classes: vec![],
            });
        }
        Ok(SyntaxCheck {
            ok: true,
            classes: describe_source(source).classes,
            ..SyntaxCheck::default()
        })
    }
}

/// Returns the whole document as its `title`; fails on documents containing `BROKEN`.
struct TitleExtractor;

impl Extractor for TitleExtractor {
    fn extract(&mut self, html: &str, _file_path: Option<&Path>) -> Result<ExtractedRecord> {
        if html.contains("BROKEN") {
            return Err(ExtractflowError::Plugin("AttributeError: 'NoneType'".into()));
        }
        Ok(BTreeMap::from([(
            "title".to_string(),
            ExtractedValue::Text(html.to_string()),
        )]))
    }
}

struct TitleConverter;

impl Converter for TitleConverter {
    fn convert(&mut self, record: &Value) -> Result<String> {
        Ok(format!(
            "# {}\n",
            record.get("title").and_then(Value::as_str).unwrap_or("untitled")
        ))
    }
}
