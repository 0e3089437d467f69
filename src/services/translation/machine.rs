// Plain machine translation (LibreTranslate-compatible API)

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

use super::http::{build_client, send_with_retry, RetryPolicy};
use crate::core::errors::TranslationError;
use crate::core::types::LanguagePair;

/// Translates text for a supported language pair without any context
pub trait MachineTranslator: Send + Sync {
    fn translate(&self, text: &str, pair: LanguagePair) -> Result<String, TranslationError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// `POST {endpoint}/translate` client
pub struct HttpMachineTranslator {
    http_client: Client,
    translate_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpMachineTranslator {
    pub fn new(
        endpoint: &str,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> reqwest::Result<Self> {
        let translate_url = format!("{}/translate", endpoint.trim_end_matches('/'));
        info!("✓ Machine translation: {}", translate_url);

        Ok(Self {
            http_client: build_client(timeout)?,
            translate_url,
            api_key,
            retry,
        })
    }
}

impl MachineTranslator for HttpMachineTranslator {
    #[instrument(skip(self, text), fields(pair = %pair, chars = text.chars().count()))]
    fn translate(&self, text: &str, pair: LanguagePair) -> Result<String, TranslationError> {
        let request = TranslateRequest {
            q: text,
            source: pair.source_code(),
            target: pair.target_code(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let start = Instant::now();
        let response = send_with_retry("MT", &self.retry, || {
            self.http_client.post(&self.translate_url).json(&request)
        })?;

        let body: TranslateResponse = response
            .json()
            .map_err(|e| TranslationError::InvalidResponse(format!("MT response: {}", e)))?;

        debug!(
            "MT: translated {} chars in {:.2}ms",
            text.chars().count(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(body.translated_text)
    }
}
