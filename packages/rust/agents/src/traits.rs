//! Collaborator contracts used by the pipeline stages.
//!
//! Each trait is implemented by an LLM-backed type in this crate and by
//! scripted mocks in tests.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use extractflow_shared::{
    ContentAnalysis, Decoded, DocumentAnalysis, ExtractionSchema, InputDocument, Result,
    StructureReport, Synthesis, ValidationReport, VisualAnalysis,
};

/// Structural analysis of one HTML document.
#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    async fn analyze(&self, document: &InputDocument) -> Result<Decoded<StructureReport>>;
}

/// Visual analysis of one rendered document.
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    /// Render `document` below `workdir` and describe the rendering.
    async fn analyze(&self, document: &InputDocument, workdir: &Path) -> Result<Decoded<Value>>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        identifiers: &[String],
        analyses: &[DocumentAnalysis],
        visuals: &[VisualAnalysis],
    ) -> Result<Decoded<Synthesis>>;
}

#[async_trait]
pub trait SchemaGenerator: Send + Sync {
    async fn generate_schema(
        &self,
        synthesis: &Decoded<Synthesis>,
    ) -> Result<Decoded<ExtractionSchema>>;
}

/// Writes extractor source for a schema.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate_code(&self, schema: &Decoded<ExtractionSchema>) -> Result<String>;
}

/// Checks extractor source and may propose a corrected version.
#[async_trait]
pub trait CodeValidator: Send + Sync {
    async fn validate(
        &self,
        source: &str,
        schema: &Decoded<ExtractionSchema>,
    ) -> Result<ValidationReport>;
}

/// Analyzes extraction results and writes Markdown converter source.
#[async_trait]
pub trait ConverterGenerator: Send + Sync {
    async fn analyze_content(&self, samples: &[Value]) -> Result<Decoded<ContentAnalysis>>;

    /// `strict` asks for extra care after a previous attempt did not compile.
    async fn generate_converter(
        &self,
        analysis: &Decoded<ContentAnalysis>,
        sample: &Value,
        strict: bool,
    ) -> Result<String>;
}
