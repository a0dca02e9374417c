/*!
 * Provider implementations for translation services.
 *
 * Two variants exist behind one trait: machine-translation APIs
 * (language-pair based) and chat-style LLM APIs (model based,
 * prompt driven). Batches address lines by stable positions; a provider
 * may return a strict subset of the requested positions but must never
 * invent new ones.
 */

pub mod chat;
pub mod gate;
pub mod machine;
pub mod mock;

use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use crate::errors::ProviderError;
use crate::settings::TranslationSettings;

/// One line of a batch, tagged with its position in the subtitle file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// Cue position the translation must be correlated back to
    pub position: usize,
    /// Source text
    pub line: String,
}

impl BatchItem {
    /// Create a batch item
    pub fn new(position: usize, line: impl Into<String>) -> Self {
        Self {
            position,
            line: line.into(),
        }
    }
}

/// Uniform interface over translation services
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider name for logs and audit entries
    fn name(&self) -> &str;

    /// Translate one line
    async fn translate_single(
        &self,
        line: &str,
        source_language: &str,
        target_language: &str,
        token: &CancellationToken,
    ) -> Result<String, ProviderError>;

    /// Translate an ordered batch. The returned map covers a subset of the
    /// requested positions; wrapper context influences the translation but
    /// never appears in the output.
    async fn translate_batch(
        &self,
        items: &[BatchItem],
        source_language: &str,
        target_language: &str,
        pre_context: &[String],
        post_context: &[String],
        token: &CancellationToken,
    ) -> Result<HashMap<usize, String>, ProviderError>;

    /// Models offered by the service (empty for language-pair services)
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Languages offered by the service (empty when unrestricted)
    async fn list_languages(&self) -> Result<Vec<String>, ProviderError>;
}

/// Escape line breaks and control characters so one cue stays one line on
/// the wire
pub fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}

/// Reverse of `escape_text` applied to translated output
pub fn unescape_text(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '\\' && chars.peek().is_some() {
            match chars.next().unwrap_or_default() {
                'n' => result.push('\n'),
                'r' => result.push('\r'),
                't' => result.push('\t'),
                '\\' => result.push('\\'),
                c => result.push(c),
            }
        } else {
            result.push(ch);
        }
    }

    result
}

/// Drop response positions that were never requested. Providers must not
/// invent positions; anything unknown is discarded before correlation.
pub fn retain_known_positions(
    mut response: HashMap<usize, String>,
    items: &[BatchItem],
) -> HashMap<usize, String> {
    let known: std::collections::HashSet<usize> = items.iter().map(|i| i.position).collect();
    response.retain(|position, _| known.contains(position));
    response
}

/// Reject endpoints that are not valid absolute URLs before a client is
/// built around them
fn validate_endpoint(endpoint: &str) -> Result<(), ProviderError> {
    url::Url::parse(endpoint)
        .map(|_| ())
        .map_err(|e| ProviderError::InvalidResponse(format!("bad endpoint {:?}: {}", endpoint, e)))
}

/// Build the provider selected by the settings snapshot
pub fn create_provider(
    settings: &TranslationSettings,
) -> Result<std::sync::Arc<dyn Provider>, ProviderError> {
    match settings.service_type.as_str() {
        "libretranslate" => {
            validate_endpoint(&settings.mt_endpoint)?;
            Ok(std::sync::Arc::new(machine::MachineProvider::new(
                settings.service_type.clone(),
                settings.mt_endpoint.clone(),
                settings.mt_api_key.clone(),
            )))
        }
        "ollama" | "openai" | "lmstudio" => {
            validate_endpoint(&settings.ai_endpoint)?;
            Ok(std::sync::Arc::new(chat::ChatProvider::new(
                chat::ChatProviderConfig {
                    name: settings.service_type.clone(),
                    endpoint: settings.ai_endpoint.clone(),
                    api_key: settings.ai_api_key.clone(),
                    model: settings.ai_model.clone(),
                    prompt_template: settings.ai_prompt.clone(),
                    context_prompt_enabled: settings.ai_context_prompt_enabled,
                    context_prompt: settings.ai_context_prompt.clone(),
                    custom_parameters: settings.custom_ai_parameters.clone(),
                },
            )))
        }
        other => Err(ProviderError::InvalidResponse(format!(
            "unknown service type: {}",
            other
        ))),
    }
}
