//! OpenAI-compatible chat completions client.
//!
//! One [`LlmClient`] per configured endpoint. Transient failures (transport
//! errors, 408, 429, 5xx) are retried with exponential backoff; any other
//! HTTP error fails immediately. A request asking for JSON output is resent
//! without `response_format` when the endpoint rejects it.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use extractflow_shared::{EndpointConfig, ExtractflowError, Result, RetryPolicy};

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("extractflow/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const ERROR_BODY_PREVIEW: usize = 500;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user message carrying text followed by an image.
    pub fn user_with_image(text: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: MessageContent::Parts(vec![
                ContentPart::Text { text: text.into() },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: image_url.into(),
                    },
                },
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// A chat completion request, before the model is filled in.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Overrides the endpoint's configured temperature.
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Ask for `response_format: json_object`.
    pub json_object: bool,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
            max_tokens: None,
            json_object: false,
        }
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json_object(mut self) -> Self {
        self.json_object = true;
        self
    }
}

#[derive(Debug, Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client bound to one endpoint, model and API key.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    endpoint: EndpointConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.endpoint.base_url)
            .field("model", &self.endpoint.model)
            .field("retry", &self.retry)
            .finish()
    }
}

impl LlmClient {
    pub fn new(
        endpoint: &EndpointConfig,
        api_key: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractflowError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: endpoint.clone(),
            api_key: api_key.into(),
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.endpoint.model
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.endpoint.base_url.trim_end_matches('/')
        )
    }

    /// Send `request` and return the first choice's text.
    #[instrument(skip_all, fields(model = %self.endpoint.model))]
    pub async fn complete(&self, request: &ChatRequest) -> Result<String> {
        if !request.json_object {
            return self.send_with_retry(request, false).await;
        }
        match self.send_with_retry(request, true).await {
            Err(ExtractflowError::Api { status: 400, message }) => {
                warn!(%message, "endpoint rejected response_format, retrying without it");
                self.send_with_retry(request, false).await
            }
            other => other,
        }
    }

    async fn send_with_retry(&self, request: &ChatRequest, json_object: bool) -> Result<String> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(request, json_object).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(attempt, attempts, error = %e, ?delay, "completion failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, request: &ChatRequest, json_object: bool) -> Result<String> {
        let body = RequestBody {
            model: &self.endpoint.model,
            messages: &request.messages,
            temperature: request.temperature.unwrap_or(self.endpoint.temperature),
            max_tokens: request.max_tokens,
            response_format: json_object.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractflowError::Network(format!("chat completion request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let preview: String = text.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(ExtractflowError::Api {
                status: status.as_u16(),
                message: preview,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractflowError::parse(format!("invalid chat completion response: {e}")))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ExtractflowError::parse("chat completion returned no content"))?;

        debug!(chars = content.len(), "completion received");
        Ok(content)
    }
}
