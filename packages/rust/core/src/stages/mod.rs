//! The concrete pipeline stages, in execution order.

pub mod analysis;
pub mod codegen;
pub mod markdown;
pub mod schema;
pub mod synthesis;
pub mod validation;
pub mod visual;

pub use analysis::TextAnalysisStage;
pub use codegen::{CodeGenerationStage, EXTRACTION_CODE_FILE};
pub use markdown::{
    MARKDOWN_CONVERTER_FILE, MARKDOWN_DIR, MARKDOWN_SUMMARY_FILE, MarkdownConversionStage,
};
pub use schema::{EXTRACTION_SCHEMA_FILE, SchemaStage};
pub use synthesis::SynthesisStage;
pub use validation::{
    CodeValidationStage, EXTRACTION_RESULTS_DIR, EXTRACTION_SUMMARY_FILE, VALIDATED_MARKER,
    VALIDATION_RESULT_FILE, mark_validated,
};
pub use visual::VisualAnalysisStage;

use std::sync::Arc;

use extractflow_plugin::{PluginLoader, SyntaxCheck};
use extractflow_shared::{ExtractflowError, Result};

/// Compile `source` through the loader off the async runtime.
pub(crate) async fn check_syntax(loader: &Arc<dyn PluginLoader>, source: &str) -> Result<SyntaxCheck> {
    let loader = Arc::clone(loader);
    let source = source.to_string();
    tokio::task::spawn_blocking(move || loader.check_syntax(&source))
        .await
        .map_err(|e| ExtractflowError::Plugin(format!("syntax check task failed: {e}")))?
}
