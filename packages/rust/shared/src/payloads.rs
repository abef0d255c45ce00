//! Typed payloads exchanged between stages.
//!
//! Collaborator responses are decoded leniently: every field has a default,
//! unknown fields are kept in `extra`, and a response that is not a JSON
//! object at all becomes [`Decoded::Raw`].

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Decoded
// ---------------------------------------------------------------------------

/// A collaborator response that either decoded into `T` or was kept verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decoded<T> {
    /// The response could not be decoded; the text is preserved.
    Raw { raw_response: String },
    Structured(T),
}

impl<T: DeserializeOwned> Decoded<T> {
    /// Decode a JSON value, falling back to its textual form.
    pub fn from_value(value: Value) -> Self {
        if !value.is_object() {
            return Self::raw(value_text(&value));
        }
        match serde_json::from_value::<T>(value.clone()) {
            Ok(decoded) => Self::Structured(decoded),
            Err(e) => {
                tracing::warn!(error = %e, "response does not match the expected shape");
                Self::raw(value.to_string())
            }
        }
    }
}

impl<T> Decoded<T> {
    pub fn raw(text: impl Into<String>) -> Self {
        Self::Raw {
            raw_response: text.into(),
        }
    }

    /// The decoded value, if any.
    pub fn structured(&self) -> Option<&T> {
        match self {
            Self::Structured(value) => Some(value),
            Self::Raw { .. } => None,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Analysis payloads
// ---------------------------------------------------------------------------

/// One content section identified by the structural analysis of a document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzedSection {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list_xpath: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_sample: Option<String>,
}

/// Structural analysis of a single document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StructureReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub sections: Vec<AnalyzedSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patterns: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Text analysis result for one input document.
///
/// Exactly one of `analysis` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Decoded<StructureReport>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Visual analysis result for one input document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    pub document: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<Decoded<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cross-document synthesis of the individual analyses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Synthesis {
    pub common_patterns: Vec<Value>,
    pub content_sections: Vec<Value>,
    pub xpath_patterns: Vec<Value>,
    pub inconsistencies: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ---------------------------------------------------------------------------
// Extraction schema
// ---------------------------------------------------------------------------

/// The extraction schema the generated extractor must implement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSchema {
    pub schema_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sections: Vec<SchemaSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ExtractionSchema {
    fn default() -> Self {
        Self {
            schema_version: "1.0".into(),
            description: None,
            sections: Vec::new(),
            metadata: None,
            extra: Map::new(),
        }
    }
}

/// One named section of the extraction schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaSection {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub xpath_list: Vec<String>,
    pub is_list: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Category of a code validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Syntax,
    Robustness,
    Interface,
    Warning,
}

/// A single finding from code validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub category: IssueCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl ValidationIssue {
    pub fn new(category: IssueCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            line: None,
        }
    }

    /// Warnings never make code invalid.
    pub fn is_blocking(&self) -> bool {
        self.category != IssueCategory::Warning
    }
}

/// Outcome of validating generated extractor code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub suggestions: Vec<String>,
    /// Corrected source proposed by the reviewer, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_source: Option<String>,
    /// Whether `fixed_source` replaced the generated code.
    pub fixed_applied: bool,
}

impl ValidationReport {
    /// Build a report whose validity follows from its blocking issues.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            is_valid: !issues.iter().any(ValidationIssue::is_blocking),
            issues,
            ..Self::default()
        }
    }

    pub fn count(&self, category: IssueCategory) -> usize {
        self.issues.iter().filter(|i| i.category == category).count()
    }
}

// ---------------------------------------------------------------------------
// Extraction and conversion summaries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Success,
    Failed,
}

/// Per-document outcome of running generated code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub file: String,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileRecord {
    pub fn success(file: impl Into<String>, output_file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: RecordStatus::Success,
            output_file: Some(output_file.into()),
            error: None,
        }
    }

    pub fn failed(file: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            status: RecordStatus::Failed,
            output_file: None,
            error: Some(error.into()),
        }
    }
}

/// Summary of running the validated extractor over the target documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    pub results_dir: PathBuf,
    pub total_files: usize,
    pub processed_files: usize,
    pub failed_files: usize,
    pub results: Vec<FileRecord>,
}

impl ExtractionSummary {
    pub fn new(results_dir: PathBuf, results: Vec<FileRecord>) -> Self {
        let processed_files = results
            .iter()
            .filter(|r| r.status == RecordStatus::Success)
            .count();
        Self {
            results_dir,
            total_files: results.len(),
            processed_files,
            failed_files: results.len() - processed_files,
            results,
        }
    }
}

/// Which extracted fields carry content and which carry metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentAnalysis {
    pub main_content_fields: Vec<String>,
    pub metadata_fields: Vec<String>,
    pub structural_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hierarchy: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_types: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Summary of converting extraction results to Markdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionSummary {
    pub output_dir: PathBuf,
    pub total_files: usize,
    pub converted_files: usize,
    pub failed_files: usize,
    pub results: Vec<FileRecord>,
}

impl ConversionSummary {
    pub fn new(output_dir: PathBuf, results: Vec<FileRecord>) -> Self {
        let converted_files = results
            .iter()
            .filter(|r| r.status == RecordStatus::Success)
            .count();
        Self {
            output_dir,
            total_files: results.len(),
            converted_files,
            failed_files: results.len() - converted_files,
            results,
        }
    }
}
