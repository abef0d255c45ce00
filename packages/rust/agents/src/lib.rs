//! LLM-backed collaborators for the extraction pipeline.
//!
//! Every stage talks to its model through a trait from [`traits`], so the
//! pipeline can be driven by scripted fakes in tests. The implementations in
//! this crate speak the OpenAI-compatible chat completions protocol.

pub mod analyzer;
pub mod client;
pub mod converter;
pub mod decode;
pub mod orchestrator;
pub mod prompts;
pub mod traits;
pub mod validator;
pub mod visual;

pub use analyzer::LlmDocumentAnalyzer;
pub use client::{ChatMessage, ChatRequest, LlmClient};
pub use converter::LlmConverterGenerator;
pub use decode::{bullet_points, decode_response, extract_code, extract_json};
pub use orchestrator::{LlmOrchestrator, SCHEMA_PROMPT_LIMIT, reduce_schema};
pub use traits::{
    CodeGenerator, CodeValidator, ConverterGenerator, DocumentAnalyzer, SchemaGenerator,
    Synthesizer, VisualAnalyzer,
};
pub use validator::{LlmCodeValidator, robustness_issues, static_issues};
pub use visual::{LlmVisualAnalyzer, Renderer, SCREENSHOT_DIR, screenshot_path};
