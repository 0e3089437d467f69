// Context-providing language model (Ollama chat API)

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use super::http::{build_client, send_with_retry, RetryPolicy};
use crate::core::errors::TranslationError;

/// A language model asked to translate a snippet and explain it.
///
/// Returns the raw reply; parsing happens in the orchestrator.
pub trait ContextProvider: Send + Sync {
    fn request_context(&self, text: &str, source_language: &str) -> Result<String, TranslationError>;
}

pub fn build_prompt(text: &str, source_language: &str) -> String {
    format!(
        "Translate the following text from {source_language} into English and provide small amount of context for the translation. \
         The response should be structured as follows:\n\
         - \"Translation\": <Provide the translation here>.\n\
         - \"Context\": <Provide a brief context or explanation here>.\n\n\
         Here is the text to translate:\n\
         \"{text}\""
    )
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Ollama `/api/chat` client. The model is fixed at construction.
pub struct OllamaContextClient {
    http_client: Client,
    chat_url: String,
    model: String,
    retry: RetryPolicy,
}

impl OllamaContextClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> reqwest::Result<Self> {
        let model = model.into();
        let chat_url = format!("{}/api/chat", base_url.trim_end_matches('/'));
        info!("✓ Context LLM: {} at {}", model, chat_url);

        Ok(Self {
            http_client: build_client(timeout)?,
            chat_url,
            model,
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ContextProvider for OllamaContextClient {
    #[instrument(skip(self, text), fields(model = %self.model, chars = text.chars().count()))]
    fn request_context(&self, text: &str, source_language: &str) -> Result<String, TranslationError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(text, source_language),
            }],
            stream: false,
        };

        let start = Instant::now();
        let response = send_with_retry("Ollama", &self.retry, || {
            self.http_client.post(&self.chat_url).json(&request)
        })?;

        let body: ChatResponse = response
            .json()
            .map_err(|e| TranslationError::InvalidResponse(format!("Ollama chat response: {}", e)))?;

        debug!(
            "Ollama: {} chars in {:.2}s",
            body.message.content.chars().count(),
            start.elapsed().as_secs_f64()
        );
        Ok(body.message.content)
    }
}
