//! Loading generated code as typed extractor and converter plugins.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use extractflow_shared::{ExtractflowError, Result};

use crate::contract::{PluginDescription, PluginKind, verify_contract};
use crate::session::{PluginSession, SyntaxCheck, check_syntax};

// ---------------------------------------------------------------------------
// Extracted values
// ---------------------------------------------------------------------------

/// One section value returned by an extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedValue {
    Missing,
    Text(String),
    List(Vec<String>),
    /// Anything richer (nested objects, numbers), kept as returned.
    Structured(Value),
}

impl From<Value> for ExtractedValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Missing,
            Value::String(s) => Self::Text(s),
            Value::Array(items) if items.iter().all(Value::is_string) => Self::List(
                items
                    .into_iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s),
                        _ => None,
                    })
                    .collect(),
            ),
            other => Self::Structured(other),
        }
    }
}

/// Section name to extracted value.
pub type ExtractedRecord = BTreeMap<String, ExtractedValue>;

/// Decode an extractor's return value; anything but a mapping is an error.
pub fn decode_record(value: Value) -> Result<ExtractedRecord> {
    match value {
        Value::Object(map) => Ok(map
            .into_iter()
            .map(|(k, v)| (k, ExtractedValue::from(v)))
            .collect()),
        other => Err(ExtractflowError::Plugin(format!(
            "extract() must return a mapping, got {}",
            json_type(&other)
        ))),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

// ---------------------------------------------------------------------------
// Plugin traits
// ---------------------------------------------------------------------------

/// A loaded, contract-verified extractor.
pub trait Extractor: Send {
    fn extract(&mut self, html: &str, file_path: Option<&Path>) -> Result<ExtractedRecord>;
}

/// A loaded, contract-verified converter.
pub trait Converter: Send {
    fn convert(&mut self, record: &Value) -> Result<String>;
}

/// Turns generated source files into running plugins.
///
/// Implementations must verify the interface contract before the first call
/// and fail closed.
pub trait PluginLoader: Send + Sync {
    /// Introspect a source file without instantiating anything.
    fn describe(&self, source: &Path) -> Result<PluginDescription>;

    fn load_extractor(&self, source: &Path, schema: &Value) -> Result<Box<dyn Extractor>>;

    fn load_converter(&self, source: &Path) -> Result<Box<dyn Converter>>;

    /// Compile without executing.
    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck>;
}

// ---------------------------------------------------------------------------
// Subprocess implementation
// ---------------------------------------------------------------------------

/// Runs plugins in a Python subprocess through the embedded host.
#[derive(Debug, Clone)]
pub struct SubprocessLoader {
    interpreter: String,
}

impl SubprocessLoader {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    /// Verify the interface from the syntax tree; no module code runs.
    fn check_contract(&self, source: &Path, kind: PluginKind) -> Result<()> {
        let text = std::fs::read_to_string(source).map_err(|e| ExtractflowError::io(source, e))?;
        let check = check_syntax(&self.interpreter, &text)?;
        if !check.ok {
            return Err(ExtractflowError::Plugin(format!(
                "{} does not compile: {} (line {})",
                source.display(),
                check.error.as_deref().unwrap_or("syntax error"),
                check.line.map_or_else(|| "?".to_string(), |l| l.to_string()),
            )));
        }
        verify_contract(kind, &check.description())
    }

    fn open(&self, source: &Path, kind: PluginKind, kwargs: &Value) -> Result<PluginSession> {
        self.check_contract(source, kind)?;
        // Runtime introspection still gets the last word.
        let mut session = PluginSession::spawn(&self.interpreter, source)?;
        let description = session.describe()?;
        verify_contract(kind, &description)?;
        session.init(kind.contract().class_name, kwargs)?;
        debug!(?kind, source = %source.display(), "plugin loaded");
        Ok(session)
    }
}

impl PluginLoader for SubprocessLoader {
    fn describe(&self, source: &Path) -> Result<PluginDescription> {
        let mut session = PluginSession::spawn(&self.interpreter, source)?;
        let description = session.describe();
        session.shutdown();
        description
    }

    #[instrument(skip_all, fields(source = %source.display()))]
    fn load_extractor(&self, source: &Path, schema: &Value) -> Result<Box<dyn Extractor>> {
        let session = self.open(source, PluginKind::Extractor, &json!({ "schema": schema }))?;
        Ok(Box::new(SubprocessExtractor { session }))
    }

    #[instrument(skip_all, fields(source = %source.display()))]
    fn load_converter(&self, source: &Path) -> Result<Box<dyn Converter>> {
        let session = self.open(source, PluginKind::Converter, &json!({}))?;
        Ok(Box::new(SubprocessConverter { session }))
    }

    fn check_syntax(&self, source: &str) -> Result<SyntaxCheck> {
        check_syntax(&self.interpreter, source)
    }
}

struct SubprocessExtractor {
    session: PluginSession,
}

impl Extractor for SubprocessExtractor {
    fn extract(&mut self, html: &str, file_path: Option<&Path>) -> Result<ExtractedRecord> {
        let kwargs = json!({
            "html_content": html,
            "file_path": file_path.map(|p| p.display().to_string()),
        });
        decode_record(self.session.invoke("extract", &kwargs)?)
    }
}

struct SubprocessConverter {
    session: PluginSession,
}

impl Converter for SubprocessConverter {
    fn convert(&mut self, record: &Value) -> Result<String> {
        match self.session.invoke("convert", &json!({ "json_data": record }))? {
            Value::String(markdown) => Ok(markdown),
            other => Err(ExtractflowError::Plugin(format!(
                "convert() must return a string, got {}",
                json_type(&other)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_decode_by_shape() {
        assert_eq!(ExtractedValue::from(Value::Null), ExtractedValue::Missing);
        assert_eq!(
            ExtractedValue::from(json!("Title")),
            ExtractedValue::Text("Title".into())
        );
        assert_eq!(
            ExtractedValue::from(json!(["a", "b"])),
            ExtractedValue::List(vec!["a".into(), "b".into()])
        );
        assert_eq!(
            ExtractedValue::from(json!([{"author": "x"}])),
            ExtractedValue::Structured(json!([{"author": "x"}]))
        );
    }

    #[test]
    fn record_must_be_a_mapping() {
        let record = decode_record(json!({"title": "T", "comments": null})).unwrap();
        assert_eq!(record["title"], ExtractedValue::Text("T".into()));
        assert_eq!(record["comments"], ExtractedValue::Missing);

        let err = decode_record(json!(["not", "a", "mapping"])).unwrap_err();
        assert!(err.to_string().contains("got list"));
    }

    const INTERPRETER: &str = "python3";

    /// These tests need a local interpreter; they pass vacuously without one.
    fn interpreter_available() -> bool {
        std::process::Command::new(INTERPRETER)
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn temp_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ef-loader-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn extractor_without_extract_is_a_contract_violation() {
        if !interpreter_available() {
            return;
        }
        let dir = temp_dir();
        let path = dir.join("extractor.py");
        std::fs::write(
            &path,
            "class HTMLExtractor:\n    def __init__(self, schema):\n        self.schema = schema\n\n    def parse(self, html_content=None, file_path=None):\n        return {}\n",
        )
        .unwrap();

        let err = SubprocessLoader::new(INTERPRETER)
            .load_extractor(&path, &json!({"sections": []}))
            .err()
            .unwrap();
        assert!(matches!(err, ExtractflowError::Contract { .. }));
        assert!(err.to_string().contains("no method `extract`"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn contract_is_checked_before_module_code_runs() {
        if !interpreter_available() {
            return;
        }
        let dir = temp_dir();
        let marker = dir.join("executed");
        let path = dir.join("extractor.py");
        std::fs::write(
            &path,
            format!(
                "open({:?}, 'w').write('ran')\n\nclass HTMLExtractor:\n    def __init__(self, schema):\n        self.schema = schema\n",
                marker.display().to_string()
            ),
        )
        .unwrap();

        let err = SubprocessLoader::new(INTERPRETER)
            .load_extractor(&path, &json!({}))
            .err()
            .unwrap();
        assert!(matches!(err, ExtractflowError::Contract { .. }));
        assert!(!marker.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn uncompilable_source_is_rejected_before_spawn() {
        if !interpreter_available() {
            return;
        }
        let dir = temp_dir();
        let path = dir.join("converter.py");
        std::fs::write(&path, "class MarkdownConverter:\n    def convert(self, json_data:\n").unwrap();

        let err = SubprocessLoader::new(INTERPRETER)
            .load_converter(&path)
            .err()
            .unwrap();
        assert!(matches!(err, ExtractflowError::Plugin(_)));
        assert!(err.to_string().contains("does not compile"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn record_serializes_back_to_plain_json() {
        let record = decode_record(json!({"body": ["p1", "p2"], "title": null})).unwrap();
        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({"body": ["p1", "p2"], "title": null})
        );
    }
}
