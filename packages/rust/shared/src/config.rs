//! Application configuration for extractflow.
//!
//! Lookup order: an explicit `--config` path, `./extractflow.toml`, then
//! `~/.extractflow/extractflow.toml`. CLI flags override config file values,
//! which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExtractflowError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "extractflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".extractflow";

// ---------------------------------------------------------------------------
// Config structs (matching extractflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub pipeline: PipelineSettings,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub visual: VisualConfig,

    #[serde(default)]
    pub download: DownloadConfig,
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root under which `flow{N}` slots are allocated.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Documents the pipeline learns from (`urls.txt` or `html/`).
    #[serde(default = "default_typical_dir")]
    pub typical_dir: String,

    /// Documents the generated extractor runs over. Defaults to the input batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spread_dir: Option<String>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            typical_dir: default_typical_dir(),
            spread_dir: None,
        }
    }
}

fn default_output_dir() -> String {
    "data/output".into()
}
fn default_typical_dir() -> String {
    "data/input/typical".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Run the visual analysis stage.
    #[serde(default = "default_true")]
    pub visual: bool,

    /// Run the markdown conversion stage.
    #[serde(default = "default_true")]
    pub markdown: bool,

    /// Resume from existing checkpoints.
    #[serde(default = "default_true")]
    pub resume: bool,

    /// Interpreter used to host generated code.
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Per-document HTML budget for analysis prompts, in characters.
    #[serde(default = "default_max_prompt_chars")]
    pub max_prompt_chars: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            visual: true,
            markdown: true,
            resume: true,
            interpreter: default_interpreter(),
            max_prompt_chars: default_max_prompt_chars(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_interpreter() -> String {
    "python3".into()
}
fn default_max_prompt_chars() -> usize {
    500_000
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// HTTP timeout per request.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on every further retry.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Synthesis, schema and code generation.
    #[serde(default = "EndpointConfig::orchestrator")]
    pub orchestrator: EndpointConfig,

    /// Per-document analysis, validation review and markdown conversion.
    #[serde(default = "EndpointConfig::analyzer")]
    pub analyzer: EndpointConfig,

    /// Screenshot analysis.
    #[serde(default = "EndpointConfig::vision")]
    pub vision: EndpointConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_llm_timeout(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            orchestrator: EndpointConfig::orchestrator(),
            analyzer: EndpointConfig::analyzer(),
            vision: EndpointConfig::vision(),
        }
    }
}

fn default_llm_timeout() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    2000
}

/// One OpenAI-compatible chat completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Name of the env var holding the API key (never store the key itself).
    pub api_key_env: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl EndpointConfig {
    fn orchestrator() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            model: "gpt-4o".into(),
            temperature: default_temperature(),
        }
    }

    fn analyzer() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "ANALYZER_API_KEY".into(),
            model: "gpt-4o".into(),
            temperature: default_temperature(),
        }
    }

    fn vision() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "VISION_API_KEY".into(),
            model: "gpt-4o".into(),
            temperature: default_temperature(),
        }
    }
}

fn default_temperature() -> f64 {
    0.3
}

/// `[visual]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualConfig {
    /// Headless renderer command with `{input}` and `{output}` placeholders,
    /// e.g. `chromium --headless --screenshot={output} --window-size=1920,4000 {input}`.
    /// Empty disables visual analysis.
    #[serde(default)]
    pub renderer: String,
}

/// `[download]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_timeout")]
    pub timeout_secs: u64,

    /// Attempts per URL, including the first.
    #[serde(default = "default_download_retries")]
    pub retries: u32,

    /// Pause between consecutive downloads.
    #[serde(default = "default_download_delay")]
    pub delay_ms: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_download_timeout(),
            retries: default_download_retries(),
            delay_ms: default_download_delay(),
        }
    }
}

fn default_download_timeout() -> u64 {
    30
}
fn default_download_retries() -> u32 {
    3
}
fn default_download_delay() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Runtime config (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime pipeline options, merged from config file and CLI flags.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub input_dir: PathBuf,
    pub spread_dir: Option<PathBuf>,
    pub visual: bool,
    pub markdown: bool,
    pub resume: bool,
    pub interpreter: String,
    pub max_prompt_chars: usize,
}

impl From<&AppConfig> for RunOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            output_dir: PathBuf::from(&config.paths.output_dir),
            input_dir: PathBuf::from(&config.paths.typical_dir),
            spread_dir: config.paths.spread_dir.as_ref().map(PathBuf::from),
            // No renderer means nothing to look at.
            visual: config.pipeline.visual && !config.visual.renderer.trim().is_empty(),
            markdown: config.pipeline.markdown,
            resume: config.pipeline.resume,
            interpreter: config.pipeline.interpreter.clone(),
            max_prompt_chars: config.pipeline.max_prompt_chars,
        }
    }
}

/// Retry policy for collaborator requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): initial, then doubling.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl From<&LlmConfig> for RetryPolicy {
    fn from(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
        }
    }
}

/// API keys resolved from the environment, one per endpoint.
#[derive(Clone, Default)]
pub struct LlmCredentials {
    pub orchestrator: String,
    pub analyzer: String,
    pub vision: String,
}

impl std::fmt::Debug for LlmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmCredentials")
            .field("orchestrator", &"<redacted>")
            .field("analyzer", &"<redacted>")
            .field("vision", &"<redacted>")
            .finish()
    }
}

impl LlmCredentials {
    /// Resolve every endpoint's key from its configured env var.
    ///
    /// The orchestrator key is required; the other endpoints fall back to it.
    pub fn from_env(config: &LlmConfig) -> Result<Self> {
        let orchestrator = read_key(&config.orchestrator.api_key_env).ok_or_else(|| {
            ExtractflowError::config(format!(
                "API key not found. Set the {} environment variable.",
                config.orchestrator.api_key_env
            ))
        })?;
        let analyzer =
            read_key(&config.analyzer.api_key_env).unwrap_or_else(|| orchestrator.clone());
        let vision = read_key(&config.vision.api_key_env).unwrap_or_else(|| orchestrator.clone());

        Ok(Self {
            orchestrator,
            analyzer,
            vision,
        })
    }
}

fn read_key(var_name: &str) -> Option<String> {
    std::env::var(var_name).ok().filter(|v| !v.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.extractflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ExtractflowError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the user config file (`~/.extractflow/extractflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Find the config file to use: `./extractflow.toml` first, then the user file.
pub fn locate_config() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.is_file() {
        return Some(local);
    }
    config_file_path().ok().filter(|p| p.is_file())
}

/// Load the application config. Returns defaults if no file exists.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        return load_config_from(path);
    }

    match locate_config() {
        Some(path) => load_config_from(&path),
        None => {
            tracing::debug!("config file not found, using defaults");
            Ok(AppConfig::default())
        }
    }
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ExtractflowError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ExtractflowError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Write a default config file at `path` (or the user config path).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ExtractflowError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| ExtractflowError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ExtractflowError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
