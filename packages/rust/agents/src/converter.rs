//! Markdown converter generation from extraction results.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use extractflow_shared::{ContentAnalysis, Decoded, ExtractflowError, Result};

use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::decode::{decode_response, extract_code};
use crate::orchestrator::prompt_json;
use crate::prompts;
use crate::traits::ConverterGenerator;

const ANALYSIS_TEMPERATURE: f64 = 0.3;
const CONVERTER_TEMPERATURE: f64 = 0.2;
const CONVERTER_MAX_TOKENS: u32 = 8_000;

#[derive(Debug, Clone)]
pub struct LlmConverterGenerator {
    client: LlmClient,
}

impl LlmConverterGenerator {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

fn pretty(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| ExtractflowError::parse(format!("failed to serialize samples: {e}")))
}

#[async_trait]
impl ConverterGenerator for LlmConverterGenerator {
    #[instrument(skip_all, fields(samples = samples.len()))]
    async fn analyze_content(&self, samples: &[Value]) -> Result<Decoded<ContentAnalysis>> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::CONVERTER_SYSTEM),
            ChatMessage::user(prompts::content_analysis(&pretty(&samples)?)),
        ])
        .temperature(ANALYSIS_TEMPERATURE)
        .json_object();
        let text = self.client.complete(&request).await?;

        let analysis: Decoded<ContentAnalysis> = decode_response(&text);
        if let Some(a) = analysis.structured() {
            info!(
                main = a.main_content_fields.len(),
                metadata = a.metadata_fields.len(),
                "content analyzed"
            );
        }
        Ok(analysis)
    }

    #[instrument(skip_all, fields(strict = strict))]
    async fn generate_converter(
        &self,
        analysis: &Decoded<ContentAnalysis>,
        sample: &Value,
        strict: bool,
    ) -> Result<String> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(prompts::CONVERTER_SYSTEM),
            ChatMessage::user(prompts::converter_code(
                &prompt_json(analysis)?,
                &pretty(sample)?,
                strict,
            )),
        ])
        .temperature(CONVERTER_TEMPERATURE)
        .max_tokens(CONVERTER_MAX_TOKENS);
        let text = self.client.complete(&request).await?;

        let code = extract_code(&text);
        if code.is_empty() {
            return Err(ExtractflowError::parse("converter generation returned no code"));
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::{completion, test_client};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, method};
    use wiremock::{Mock, MockServer};

    #[tokio::test]
    async fn samples_are_analyzed_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"response_format": {"type": "json_object"}})))
            .and(body_string_contains("Quarterly report"))
            .respond_with(completion(
                "{\"main_content_fields\": [\"body\"], \"metadata_fields\": [\"title\"]}",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmConverterGenerator::new(test_client(&server));
        let analysis = generator
            .analyze_content(&[json!({"title": "Quarterly report", "body": "<p>Up</p>"})])
            .await
            .unwrap();
        let analysis = analysis.structured().unwrap();
        assert_eq!(analysis.main_content_fields, vec!["body"]);
        assert_eq!(analysis.metadata_fields, vec!["title"]);
    }

    #[tokio::test]
    async fn strict_prompt_is_sent_on_regeneration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("DID NOT COMPILE"))
            .respond_with(completion(
                "```python\nclass MarkdownConverter:\n    def convert(self, json_data):\n        return ''\n```",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let generator = LlmConverterGenerator::new(test_client(&server));
        let code = generator
            .generate_converter(&Decoded::raw("body holds the text"), &json!({}), true)
            .await
            .unwrap();
        assert!(code.starts_with("class MarkdownConverter:"));
    }

    #[tokio::test]
    async fn empty_converter_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion("```python\n```"))
            .mount(&server)
            .await;

        let generator = LlmConverterGenerator::new(test_client(&server));
        let err = generator
            .generate_converter(
                &Decoded::Structured(ContentAnalysis::default()),
                &json!({}),
                false,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractflowError::Parse { .. }));
    }
}
