//! Visual analysis: render a page with an external headless renderer, then
//! describe the screenshot with a vision model.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use tracing::{debug, info, instrument};

use extractflow_documents::result_stem;
use extractflow_shared::{Decoded, ExtractflowError, InputDocument, Result};

use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::decode::decode_response;
use crate::prompts;
use crate::traits::VisualAnalyzer;

/// Subdirectory of the stage's slot holding rendered pages.
pub const SCREENSHOT_DIR: &str = "screenshots";

/// Where the screenshot of `document` is written below `workdir`.
pub fn screenshot_path(workdir: &Path, document: &InputDocument) -> PathBuf {
    workdir
        .join(SCREENSHOT_DIR)
        .join(format!("{}.png", result_stem(&document.name)))
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// A headless renderer command such as
/// `chromium --headless --screenshot={output} file://{input}`.
///
/// The template is split on whitespace; `{input}` and `{output}` are
/// substituted inside each argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Renderer {
    program: String,
    args: Vec<String>,
}

impl Renderer {
    /// Parse a command template. An empty template means no renderer.
    pub fn parse(template: &str) -> Option<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    fn command_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output = output.display().to_string();
        self.args
            .iter()
            .map(|a| a.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }

    /// Render `input` (an HTML file) into the PNG at `output`.
    pub async fn render(&self, input: &Path, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ExtractflowError::io(parent, e))?;
        }

        let args = self.command_args(input, output);
        debug!(program = %self.program, ?args, "rendering page");

        let result = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|e| {
                ExtractflowError::Plugin(format!(
                    "failed to run renderer `{}`: {e}",
                    self.program
                ))
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ExtractflowError::Plugin(format!(
                "renderer exited with {}: {}",
                result.status,
                stderr.trim()
            )));
        }
        if !output.is_file() {
            return Err(ExtractflowError::Plugin(format!(
                "renderer produced no image at {}",
                output.display()
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Renders each document and sends the PNG to the vision endpoint.
#[derive(Debug, Clone)]
pub struct LlmVisualAnalyzer {
    client: LlmClient,
    renderer: Renderer,
}

impl LlmVisualAnalyzer {
    pub fn new(client: LlmClient, renderer: Renderer) -> Self {
        Self { client, renderer }
    }

    /// The document as a file the renderer can open.
    fn source_file(document: &InputDocument, workdir: &Path) -> Result<PathBuf> {
        if let Some(path) = document.path.as_ref().filter(|p| p.is_file()) {
            return Ok(path.clone());
        }
        let dir = workdir.join(SCREENSHOT_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| ExtractflowError::io(&dir, e))?;
        let path = dir.join(format!("{}.html", result_stem(&document.name)));
        std::fs::write(&path, &document.content).map_err(|e| ExtractflowError::io(&path, e))?;
        Ok(path)
    }
}

#[async_trait]
impl VisualAnalyzer for LlmVisualAnalyzer {
    #[instrument(skip_all, fields(document = %document.name))]
    async fn analyze(&self, document: &InputDocument, workdir: &Path) -> Result<Decoded<Value>> {
        let input = Self::source_file(document, workdir)?;
        let screenshot = screenshot_path(workdir, document);
        self.renderer.render(&input, &screenshot).await?;

        let bytes = std::fs::read(&screenshot).map_err(|e| ExtractflowError::io(&screenshot, e))?;
        info!(bytes = bytes.len(), path = %screenshot.display(), "page rendered");
        let data_uri = format!("data:image/png;base64,{}", STANDARD.encode(&bytes));

        let request = ChatRequest::new(vec![ChatMessage::user_with_image(
            prompts::visual_analysis(&document.identifier),
            data_uri,
        )]);
        let text = self.client.complete(&request).await?;
        Ok(decode_response(&text))
    }
}
