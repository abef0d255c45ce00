//! The orchestrator endpoint: synthesis, schema design and extractor code.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use extractflow_shared::{
    Decoded, DocumentAnalysis, ExtractflowError, ExtractionSchema, Result, Synthesis,
    VisualAnalysis,
};

use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::decode::{decode_response, extract_code};
use crate::prompts;
use crate::traits::{CodeGenerator, SchemaGenerator, Synthesizer};

/// Schemas larger than this are reduced to their essentials in code prompts.
pub const SCHEMA_PROMPT_LIMIT: usize = 100_000;

/// Fallback XPaths kept per section in a reduced schema.
const REDUCED_XPATH_LIST: usize = 3;

const SCHEMA_TEMPERATURE: f64 = 0.2;
const CODEGEN_TEMPERATURE: f64 = 0.2;
const CODEGEN_MAX_TOKENS: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct LlmOrchestrator {
    client: LlmClient,
}

impl LlmOrchestrator {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

/// Pretty JSON for prompts; a raw payload is embedded as its text.
pub(crate) fn prompt_json<T: Serialize>(value: &Decoded<T>) -> Result<String> {
    match value {
        Decoded::Raw { raw_response } => Ok(raw_response.clone()),
        Decoded::Structured(inner) => serde_json::to_string_pretty(inner)
            .map_err(|e| ExtractflowError::parse(format!("failed to serialize prompt input: {e}"))),
    }
}

/// Keep only what code generation needs from an oversized schema.
pub fn reduce_schema(schema: &ExtractionSchema) -> Value {
    let sections: Vec<Value> = schema
        .sections
        .iter()
        .map(|s| {
            let mut section = json!({
                "name": s.name,
                "description": s.description,
                "xpath": s.xpath,
                "is_list": s.is_list,
            });
            let fallbacks: Vec<&String> = s
                .xpath_list
                .iter()
                .filter(|x| Some(x.as_str()) != s.xpath.as_deref())
                .take(REDUCED_XPATH_LIST)
                .collect();
            if !fallbacks.is_empty() {
                section["xpath_list"] = json!(fallbacks);
            }
            section
        })
        .collect();

    json!({
        "schema_version": schema.schema_version,
        "description": schema.description,
        "sections": sections,
    })
}

#[async_trait]
impl Synthesizer for LlmOrchestrator {
    #[instrument(skip_all, fields(documents = identifiers.len()))]
    async fn synthesize(
        &self,
        identifiers: &[String],
        analyses: &[DocumentAnalysis],
        visuals: &[VisualAnalysis],
    ) -> Result<Decoded<Synthesis>> {
        let combined = json!({
            "text_analysis": analyses,
            "visual_analysis": visuals,
        });
        let combined = serde_json::to_string_pretty(&combined)
            .map_err(|e| ExtractflowError::parse(format!("failed to serialize analyses: {e}")))?;

        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::SYNTHESIS_SYSTEM),
            ChatMessage::user(prompts::synthesis(identifiers, &combined)),
        ])
        .json_object();
        let text = self.client.complete(&request).await?;
        Ok(decode_response(&text))
    }
}

#[async_trait]
impl SchemaGenerator for LlmOrchestrator {
    #[instrument(skip_all)]
    async fn generate_schema(
        &self,
        synthesis: &Decoded<Synthesis>,
    ) -> Result<Decoded<ExtractionSchema>> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::SCHEMA_SYSTEM),
            ChatMessage::user(prompts::schema(&prompt_json(synthesis)?)),
        ])
        .temperature(SCHEMA_TEMPERATURE)
        .json_object();
        let text = self.client.complete(&request).await?;

        let schema: Decoded<ExtractionSchema> = decode_response(&text);
        if let Some(s) = schema.structured() {
            info!(sections = s.sections.len(), "schema generated");
        }
        Ok(schema)
    }
}

#[async_trait]
impl CodeGenerator for LlmOrchestrator {
    #[instrument(skip_all)]
    async fn generate_code(&self, schema: &Decoded<ExtractionSchema>) -> Result<String> {
        let mut schema_json = prompt_json(schema)?;
        let section_count = schema.structured().map_or(0, |s| s.sections.len());

        if let Some(s) = schema.structured() {
            if schema_json.len() > SCHEMA_PROMPT_LIMIT {
                warn!(
                    chars = schema_json.len(),
                    limit = SCHEMA_PROMPT_LIMIT,
                    "schema too large for the prompt, reducing it"
                );
                schema_json = serde_json::to_string_pretty(&reduce_schema(s)).map_err(|e| {
                    ExtractflowError::parse(format!("failed to serialize schema: {e}"))
                })?;
            }
        }

        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::CODEGEN_SYSTEM),
            ChatMessage::user(prompts::extractor_code(&schema_json, section_count)),
        ])
        .temperature(CODEGEN_TEMPERATURE)
        .max_tokens(CODEGEN_MAX_TOKENS);
        let text = self.client.complete(&request).await?;

        let code = extract_code(&text);
        if code.is_empty() {
            return Err(ExtractflowError::parse("code generation returned no code"));
        }
        info!(lines = code.lines().count(), "extractor code generated");
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{completion, test_client};
    use extractflow_shared::SchemaSection;
    use wiremock::matchers::{body_partial_json, body_string_contains, method};
    use wiremock::{Mock, MockServer};

    fn schema_with(sections: Vec<SchemaSection>) -> ExtractionSchema {
        ExtractionSchema {
            sections,
            ..ExtractionSchema::default()
        }
    }

    #[tokio::test]
    async fn synthesis_requests_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .and(body_string_contains("a.html, b.html"))
            .respond_with(completion("{\"common_patterns\": [\"article > h1\"]}"))
            .expect(1)
            .mount(&server)
            .await;

        let orchestrator = LlmOrchestrator::new(test_client(&server));
        let synthesis = orchestrator
            .synthesize(&["a.html".into(), "b.html".into()], &[], &[])
            .await
            .unwrap();
        assert_eq!(
            synthesis.structured().unwrap().common_patterns,
            vec![json!("article > h1")]
        );
    }

    #[tokio::test]
    async fn schema_from_raw_synthesis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("free-form synthesis"))
            .and(body_partial_json(json!({"temperature": 0.2})))
            .respond_with(completion(
                "{\"schema_version\": \"1.0\", \"sections\": [{\"name\": \"title\", \"xpath\": \"//h1\"}]}",
            ))
            .mount(&server)
            .await;

        let orchestrator = LlmOrchestrator::new(test_client(&server));
        let schema = orchestrator
            .generate_schema(&Decoded::raw("free-form synthesis"))
            .await
            .unwrap();
        let schema = schema.structured().unwrap();
        assert_eq!(schema.sections[0].name, "title");
        assert_eq!(schema.sections[0].xpath.as_deref(), Some("//h1"));
    }

    #[tokio::test]
    async fn code_is_unfenced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion(
                "Here is the module:\n```python\nclass HTMLExtractor:\n    pass\n```",
            ))
            .mount(&server)
            .await;

        let orchestrator = LlmOrchestrator::new(test_client(&server));
        let code = orchestrator
            .generate_code(&Decoded::Structured(schema_with(vec![])))
            .await
            .unwrap();
        assert_eq!(code, "class HTMLExtractor:\n    pass");
    }

    #[tokio::test]
    async fn empty_code_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion("```python\n```"))
            .mount(&server)
            .await;

        let orchestrator = LlmOrchestrator::new(test_client(&server));
        let err = orchestrator
            .generate_code(&Decoded::Structured(schema_with(vec![])))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractflowError::Parse { .. }));
    }

    #[test]
    fn reduced_schema_keeps_essentials() {
        let schema = schema_with(vec![SchemaSection {
            name: "comments".into(),
            description: Some("reader comments".into()),
            xpath: Some("//div[@class='c']".into()),
            xpath_list: vec![
                "//div[@class='c']".into(),
                "//li[@class='c']".into(),
                "//p[@class='c']".into(),
                "//span[@class='c']".into(),
                "//section[@class='c']".into(),
            ],
            is_list: true,
            attributes: Some(json!({"class": "c"})),
            notes: Some("long notes".into()),
        }]);

        let reduced = reduce_schema(&schema);
        let section = &reduced["sections"][0];
        assert_eq!(section["name"], "comments");
        assert_eq!(section["is_list"], true);
        assert!(section.get("notes").is_none());
        assert!(section.get("attributes").is_none());
        assert_eq!(
            section["xpath_list"],
            json!(["//li[@class='c']", "//p[@class='c']", "//span[@class='c']"])
        );
    }
}
