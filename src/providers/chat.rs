/*!
 * Chat-style LLM provider.
 *
 * Talks to OpenAI-compatible chat completion endpoints (OpenAI, Ollama,
 * LM Studio). Batches are rendered as numbered lines so the model can keep
 * position identifiers intact; the response parser correlates them back
 * and tolerates partially answered batches.
 */

use async_trait::async_trait;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use super::{escape_text, retain_known_positions, unescape_text, BatchItem, Provider};

/// Request timeout for chat completions
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Lines of the form `#12: translated text`
static NUMBERED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*#?(\d+)\s*[:.)-]\s*(.*)$").unwrap());

/// Configuration for a chat provider instance
#[derive(Debug, Clone)]
pub struct ChatProviderConfig {
    /// Service name used in logs (`ollama`, `openai`, ...)
    pub name: String,
    /// Base endpoint, e.g. `http://localhost:11434`
    pub endpoint: String,
    /// Bearer token; empty for local services
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Prompt template with `{sourceLanguage}` / `{targetLanguage}`
    pub prompt_template: String,
    /// Whether to add the wrapper-context instruction
    pub context_prompt_enabled: bool,
    /// Instruction explaining that context lines are advisory
    pub context_prompt: String,
    /// Extra body parameters (temperature etc.) from settings
    pub custom_parameters: HashMap<String, serde_json::Value>,
}

/// Chat completion client
pub struct ChatProvider {
    client: Client,
    config: ChatProviderConfig,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    data: Vec<ModelEntry>,
}

impl ChatProvider {
    /// Create a new chat provider
    pub fn new(config: ChatProviderConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            config,
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.endpoint.trim_end_matches('/')
        )
    }

    /// Substitute the language placeholders in the prompt template
    fn system_prompt(&self, source_language: &str, target_language: &str) -> String {
        let mut prompt = self
            .config
            .prompt_template
            .replace("{sourceLanguage}", source_language)
            .replace("{targetLanguage}", target_language);

        if self.config.context_prompt_enabled && !self.config.context_prompt.is_empty() {
            prompt.push('\n');
            prompt.push_str(&self.config.context_prompt);
        }

        prompt
    }

    /// Render a batch as numbered lines plus advisory context
    fn render_batch(
        items: &[BatchItem],
        pre_context: &[String],
        post_context: &[String],
    ) -> String {
        let mut body = String::new();

        if !pre_context.is_empty() {
            body.push_str("[context before]\n");
            for line in pre_context {
                body.push_str(&escape_text(line));
                body.push('\n');
            }
        }

        body.push_str("[translate]\n");
        for item in items {
            body.push_str(&format!("#{}: {}\n", item.position, escape_text(&item.line)));
        }

        if !post_context.is_empty() {
            body.push_str("[context after]\n");
            for line in post_context {
                body.push_str(&escape_text(line));
                body.push('\n');
            }
        }

        body
    }

    /// Parse numbered lines back into a position map
    fn parse_batch_response(content: &str, items: &[BatchItem]) -> HashMap<usize, String> {
        let mut result: HashMap<usize, String> = HashMap::new();

        for line in content.lines() {
            let Some(captures) = NUMBERED_LINE.captures(line) else {
                continue;
            };
            let Ok(position) = captures[1].parse::<usize>() else {
                continue;
            };
            let text = unescape_text(captures[2].trim());
            if text.is_empty() {
                continue;
            }
            // First answer wins on duplicated positions
            result.entry(position).or_insert(text);
        }

        retain_known_positions(result, items)
    }

    async fn send_chat(
        &self,
        messages: Vec<ChatMessage>,
        token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(map) = body.as_object_mut() {
            for (key, value) in &self.config.custom_parameters {
                map.insert(key.clone(), value.clone());
            }
        }

        let mut request = self.client.post(self.completions_url()).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = tokio::select! {
            response = request.send() => response,
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
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("unparseable body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".to_string()))
    }
}

/// Map an HTTP error status to the provider error kind
fn classify_status(status: StatusCode, detail: &str) -> ProviderError {
    let detail: String = detail.chars().take(500).collect();
    let detail = detail.as_str();

    match status {
        StatusCode::PAYMENT_REQUIRED => ProviderError::PaymentRequired(detail.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Authentication(format!("{}: {}", status, detail))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Transient(format!("rate limited: {}", detail))
        }
        s if s.is_server_error() => ProviderError::Transient(format!("{}: {}", s, detail)),
        s => ProviderError::InvalidResponse(format!("{}: {}", s, detail)),
    }
}

#[async_trait]
impl Provider for ChatProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn translate_single(
        &self,
        line: &str,
        source_language: &str,
        target_language: &str,
        token: &CancellationToken,
    ) -> Result<String, ProviderError> {
        let messages = vec![
            ChatMessage {
                role: "system",
                content: self.system_prompt(source_language, target_language),
            },
            ChatMessage {
                role: "user",
                content: escape_text(line),
            },
        ];

        let content = self.send_chat(messages, token).await?;
        let translated = unescape_text(content.trim());
        if translated.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "empty translation".to_string(),
            ));
        }
        Ok(translated)
    }

    async fn translate_batch(
        &self,
        items: &[BatchItem],
        source_language: &str,
        target_language: &str,
        pre_context: &[String],
        post_context: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<usize, String>, ProviderError> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let messages = vec![
            ChatMessage {
                role: "system",
                content: self.system_prompt(source_language, target_language),
            },
            ChatMessage {
                role: "user",
                content: Self::render_batch(items, pre_context, post_context),
            },
        ];

        let content = self.send_chat(messages, token).await?;
        let result = Self::parse_batch_response(&content, items);

        if result.is_empty() {
            warn!(
                "{}: batch of {} produced no correlatable lines",
                self.config.name,
                items.len()
            );
            return Err(ProviderError::InvalidResponse(
                "no positions could be correlated".to_string(),
            ));
        }

        debug!(
            "{}: batch of {} returned {} positions",
            self.config.name,
            items.len(),
            result.len()
        );
        Ok(result)
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/v1/models", self.config.endpoint.trim_end_matches('/'));
        let mut request = self.client.get(url);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: ModelListResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("unparseable body: {}", e)))?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    async fn list_languages(&self) -> Result<Vec<String>, ProviderError> {
        // Chat models are not language-pair constrained
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items() -> Vec<BatchItem> {
        vec![
            BatchItem::new(0, "Hello"),
            BatchItem::new(1, "How are you?"),
            BatchItem::new(2, "Goodbye"),
        ]
    }

    #[test]
    fn test_render_batch_numbers_lines_and_isolates_context() {
        let rendered = ChatProvider::render_batch(
            &items(),
            &["previous line".to_string()],
            &["next line".to_string()],
        );

        assert!(rendered.contains("[context before]\nprevious line\n"));
        assert!(rendered.contains("#0: Hello\n"));
        assert!(rendered.contains("#2: Goodbye\n"));
        assert!(rendered.contains("[context after]\nnext line\n"));
    }

    #[test]
    fn test_parse_batch_response_correlates_positions() {
        let content = "#0: Salut\n#1: Ce mai faci?\n#2: La revedere";
        let result = ChatProvider::parse_batch_response(content, &items());

        assert_eq!(result.len(), 3);
        assert_eq!(result[&0], "Salut");
        assert_eq!(result[&1], "Ce mai faci?");
    }

    #[test]
    fn test_parse_batch_response_accepts_subset() {
        let content = "#1: Ce mai faci?";
        let result = ChatProvider::parse_batch_response(content, &items());

        assert_eq!(result.len(), 1);
        assert!(result.contains_key(&1));
    }

    #[test]
    fn test_parse_batch_response_drops_invented_positions() {
        let content = "#0: Salut\n#42: hallucinated";
        let result = ChatProvider::parse_batch_response(content, &items());

        assert_eq!(result.len(), 1);
        assert!(!result.contains_key(&42));
    }

    #[test]
    fn test_parse_batch_response_tolerates_marker_variants() {
        let content = "0: zero\n#1. one\n 2) two";
        let result = ChatProvider::parse_batch_response(content, &items());

        assert_eq!(result.len(), 3);
        assert_eq!(result[&2], "two");
    }

    #[test]
    fn test_parse_batch_response_first_answer_wins() {
        let content = "#0: first\n#0: second";
        let result = ChatProvider::parse_batch_response(content, &items());
        assert_eq!(result[&0], "first");
    }

    #[test]
    fn test_parse_batch_response_skips_empty_translations() {
        let content = "#0:\n#1: ok";
        let result = ChatProvider::parse_batch_response(content, &items());
        assert!(!result.contains_key(&0));
        assert_eq!(result[&1], "ok");
    }

    #[test]
    fn test_system_prompt_substitutes_placeholders() {
        let provider = ChatProvider::new(ChatProviderConfig {
            name: "ollama".into(),
            endpoint: "http://localhost:11434".into(),
            api_key: String::new(),
            model: "llama3.1".into(),
            prompt_template: "Translate from {sourceLanguage} to {targetLanguage}.".into(),
            context_prompt_enabled: true,
            context_prompt: "Context lines are advisory.".into(),
            custom_parameters: HashMap::new(),
        });

        let prompt = provider.system_prompt("English", "Romanian");
        assert!(prompt.contains("from English to Romanian"));
        assert!(prompt.ends_with("Context lines are advisory."));
    }

    #[test]
    fn test_classify_status_maps_error_kinds() {
        assert!(matches!(
            classify_status(StatusCode::PAYMENT_REQUIRED, ""),
            ProviderError::PaymentRequired(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, ""),
            ProviderError::Transient(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            ProviderError::Authentication(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            ProviderError::InvalidResponse(_)
        ));
    }
}
