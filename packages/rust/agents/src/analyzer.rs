//! LLM-backed structural analysis of single documents.

use async_trait::async_trait;
use tracing::{debug, instrument};

use extractflow_documents::prepare_for_prompt;
use extractflow_shared::{Decoded, InputDocument, Result, StructureReport};

use crate::client::{ChatMessage, ChatRequest, LlmClient};
use crate::decode::decode_response;
use crate::prompts;
use crate::traits::DocumentAnalyzer;

/// Sends each document's compacted HTML to the analyzer endpoint.
#[derive(Debug, Clone)]
pub struct LlmDocumentAnalyzer {
    client: LlmClient,
    max_prompt_chars: usize,
}

impl LlmDocumentAnalyzer {
    pub fn new(client: LlmClient, max_prompt_chars: usize) -> Self {
        Self {
            client,
            max_prompt_chars,
        }
    }
}

#[async_trait]
impl DocumentAnalyzer for LlmDocumentAnalyzer {
    #[instrument(skip_all, fields(document = %document.name))]
    async fn analyze(&self, document: &InputDocument) -> Result<Decoded<StructureReport>> {
        let html = prepare_for_prompt(&document.content, self.max_prompt_chars);
        debug!(
            original = document.content.len(),
            prompt = html.len(),
            "prepared document for analysis"
        );

        let request = ChatRequest::new(vec![ChatMessage::user(prompts::document_analysis(
            &document.identifier,
            &html,
        ))]);
        let text = self.client.complete(&request).await?;
        Ok(decode_response(&text))
    }
}
