/*!
 * Machine-translation provider.
 *
 * Talks to LibreTranslate-compatible JSON APIs. These services are
 * language-pair based: the batch call sends all lines in one request and
 * the response must answer them in order, so a partial batch can only come
 * back from the LLM variants.
 */

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use super::{escape_text, unescape_text, BatchItem, Provider};

/// Request timeout for translation calls
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// LibreTranslate-compatible client
pub struct MachineProvider {
    client: Client,
    name: String,
    endpoint: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TranslatedPayload {
    /// Response to a single string query
    One { #[serde(rename = "translatedText")] translated_text: String },
    /// Response to an array query
    Many { #[serde(rename = "translatedText")] translated_text: Vec<String> },
}

#[derive(Debug, Deserialize)]
struct LanguageEntry {
    code: String,
}

impl MachineProvider {
    /// Create a new machine-translation client
    pub fn new(name: String, endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            name,
            endpoint,
            api_key,
        }
    }

    fn translate_url(&self) -> String {
        format!("{}/translate", self.endpoint.trim_end_matches('/'))
    }

    async fn post_translate(
        &self,
        query: serde_json::Value,
        source_language: &str,
        target_language: &str,
        token: &CancellationToken,
    ) -> Result<TranslatedPayload, ProviderError> {
        let body = serde_json::json!({
            "q": query,
            "source": source_language,
            "target": target_language,
            "format": "text",
            "api_key": self.api_key,
        });

        let response = tokio::select! {
            response = self.client.post(self.translate_url()).json(&body).send() => response,
            _ = token.cancelled() => {
                return Err(ProviderError::Transient("request cancelled".to_string()));
            }
        };

        let response = response.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::Transient(format!("connection failure: {}", e))
            } else {
                ProviderError::Transient(format!("request failed: {}", e))
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let detail: String = response
                .text()
                .await
                .unwrap_or_default()
                .chars()
                .take(500)
                .collect();
            return Err(match status.as_u16() {
                402 => ProviderError::PaymentRequired(detail),
                401 | 403 => ProviderError::Authentication(format!("{}: {}", status, detail)),
                429 => ProviderError::Transient(format!("rate limited: {}", detail)),
                500..=599 => ProviderError::Transient(format!("{}: {}", status, detail)),
                _ => ProviderError::InvalidResponse(format!("{}: {}", status, detail)),
            });
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("unparseable body: {}", e)))
    }
}

#[async_trait]
impl Provider for MachineProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn translate_single(
        &self,
        line: &str,
        source_language: &str,
        target_language: &str,
        token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let payload = self
            .post_translate(
                serde_json::json!(escape_text(line)),
                source_language,
                target_language,
                token,
            )
            .await?;

        match payload {
            TranslatedPayload::One { translated_text } => Ok(unescape_text(&translated_text)),
            TranslatedPayload::Many { .. } => Err(ProviderError::InvalidResponse(
                "expected a single translation, got an array".to_string(),
            )),
        }
    }

    async fn translate_batch(
        &self,
        items: &[BatchItem],
        source_language: &str,
        target_language: &str,
        _pre_context: &[String],
        _post_context: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<usize, String>, ProviderError> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let query: Vec<String> = items.iter().map(|i| escape_text(&i.line)).collect();
        let payload = self
            .post_translate(
                serde_json::json!(query),
                source_language,
                target_language,
                token,
            )
            .await?;

        let translations = match payload {
            TranslatedPayload::Many { translated_text } => translated_text,
            TranslatedPayload::One { .. } => {
                return Err(ProviderError::InvalidResponse(
                    "expected an array of translations, got a single string".to_string(),
                ));
            }
        };

        if translations.len() != items.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} translations, got {}",
                items.len(),
                translations.len()
            )));
        }

        Ok(items
            .iter()
            .zip(translations)
            .filter(|(_, t)| !t.trim().is_empty())
            .map(|(item, translated)| (item.position, unescape_text(&translated)))
            .collect())
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        // Language-pair based service; no model enumeration
        Ok(Vec::new())
    }

    async fn list_languages(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/languages", self.endpoint.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Transient(format!(
                "language listing failed: {}",
                response.status()
            )));
        }

        let entries: Vec<LanguageEntry> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("unparseable body: {}", e)))?;
        Ok(entries.into_iter().map(|l| l.code).collect())
    }
}
