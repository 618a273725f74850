//! Remote generation: send a [`GenerationRequest`], get a completion back.
//!
//! All prompt construction lives in [`crate::catalog`]; this module only
//! moves requests over the wire and classifies what comes back:
//!
//! | Outcome | Returned as |
//! |---------|-------------|
//! | completion with text | `Ok(Some(text))` |
//! | HTTP success, zero choices or blank content | `Ok(None)` (sentinel) |
//! | HTTP success, body is not a chat-completion document | `Err(MalformedResponse)` |
//! | non-success status | `Err(RemoteStatus)` |
//! | network / TLS / timeout | `Err(RemoteTransport)` |
//!
//! There is no retry here: the orchestrator stops a run on the first
//! transport failure, and a retry loop hidden inside the backend would make
//! it impossible to tell which groups were actually attempted.

use crate::catalog::{GenerationRequest, Role};
use crate::config::{DescriberConfig, API_KEY_ENV};
use crate::error::DescriberError;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// A single request/response call to a text-generation endpoint.
pub trait GenerationBackend: Send + Sync {
    /// `Ok(None)` means the call succeeded but produced no usable content.
    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> impl Future<Output = Result<Option<String>, DescriberError>> + Send;
}

// ── OpenAI-compatible HTTP backend ───────────────────────────────────────

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Classify a successful response body.
///
/// Separate from the HTTP call so the sentinel/malformed boundary is unit
/// tested without a server.
pub fn parse_completion(body: &str) -> Result<Option<String>, DescriberError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| DescriberError::MalformedResponse {
            detail: e.to_string(),
        })?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty()))
}

/// Chat-completions client for OpenAI and compatible servers.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiBackend {
    /// Build a client for `{base_url}/chat/completions`.
    pub fn new(
        api_key: impl Into<String>,
        base_url: &str,
        timeout_secs: u64,
    ) -> Result<Self, DescriberError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(DescriberError::MissingCredential {
                var: API_KEY_ENV.to_string(),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DescriberError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Read the credential from [`API_KEY_ENV`] once, failing before any
    /// network activity when it is absent.
    pub fn from_env(config: &DescriberConfig) -> Result<Self, DescriberError> {
        let key = std::env::var(API_KEY_ENV).unwrap_or_default();
        Self::new(key, &config.api_base_url, config.api_timeout_secs)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>, DescriberError> {
        let start = Instant::now();
        let body = serde_json::to_vec(request)
            .map_err(|e| DescriberError::Internal(format!("request encoding: {e}")))?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| DescriberError::RemoteTransport {
                detail: e.to_string(),
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DescriberError::RemoteTransport {
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(DescriberError::RemoteStatus {
                status: status.as_u16(),
                body: truncate(&text, 300),
            });
        }

        debug!(
            "{}: HTTP {} in {:?} ({} bytes)",
            request.model,
            status.as_u16(),
            start.elapsed(),
            text.len()
        );
        parse_completion(&text)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}\u{2026}")
    }
}

// ── edgequake-llm provider backend ───────────────────────────────────────

/// Backend for any provider supported by `edgequake-llm`.
///
/// The provider is bound to one model at construction; `request.model` is
/// only logged.
#[derive(Clone)]
pub struct ProviderBackend {
    provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for ProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderBackend")
            .field("provider", &"<dyn LLMProvider>")
            .finish()
    }
}

impl ProviderBackend {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Instantiate a named provider (`"anthropic"`, `"gemini"`, `"ollama"`…).
    ///
    /// The provider reads its own API key from the environment; a missing
    /// key surfaces here as [`DescriberError::ProviderNotConfigured`].
    pub fn from_name(provider_name: &str, model: &str) -> Result<Self, DescriberError> {
        let provider = ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
            DescriberError::ProviderNotConfigured {
                provider: provider_name.to_string(),
                hint: format!("{e}"),
            }
        })?;
        Ok(Self::new(provider))
    }
}

fn to_chat_messages(request: &GenerationRequest) -> Vec<ChatMessage> {
    request
        .messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(m.content.as_str()),
            Role::User => ChatMessage::user(m.content.as_str()),
            Role::Assistant => ChatMessage::assistant(m.content.as_str()),
        })
        .collect()
}

impl GenerationBackend for ProviderBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>, DescriberError> {
        let messages = to_chat_messages(request);
        let options = CompletionOptions {
            temperature: Some(request.temperature),
            max_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| DescriberError::LlmApiError {
                message: e.to_string(),
            })?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            request.model, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            Ok(None)
        } else {
            Ok(Some(response.content))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn completion_text_is_returned() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Zippy little Cooper."}}]}"#;
        assert_eq!(
            parse_completion(body).unwrap().as_deref(),
            Some("Zippy little Cooper.")
        );
    }

    #[test]
    fn zero_choices_is_sentinel_not_error() {
        assert_eq!(parse_completion(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(parse_completion(r#"{"id":"x"}"#).unwrap(), None);
    }

    #[test]
    fn blank_or_null_content_is_sentinel() {
        let body = r#"{"choices":[{"message":{"content":"   "}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), None);
        let body = r#"{"choices":[{"message":{"content":null}}]}"#;
        assert_eq!(parse_completion(body).unwrap(), None);
    }

    #[test]
    fn malformed_body_is_remote_error() {
        let err = parse_completion("<html>gateway</html>").unwrap_err();
        assert!(matches!(err, DescriberError::MalformedResponse { .. }));
        assert_eq!(err.kind(), ErrorKind::Remote);
    }

    #[test]
    fn blank_key_is_configuration_error() {
        let err = OpenAiBackend::new("  ", "https://api.openai.com/v1", 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn endpoint_joins_base_url() {
        let b = OpenAiBackend::new("sk-test", "http://localhost:8080/v1/", 5).unwrap();
        assert_eq!(b.endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn truncate_marks_cut() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc\u{2026}");
    }

    #[test]
    fn chat_messages_keep_order() {
        use crate::catalog::{AuxiliaryParams, DocumentTypeKey, PromptCatalog};
        let req = PromptCatalog::built_in().build_refinement_request(
            "old",
            "new",
            &DocumentTypeKey::Mini,
        );
        assert_eq!(to_chat_messages(&req).len(), 3);
        let req = PromptCatalog::built_in().build_request(
            "doc",
            &DocumentTypeKey::Mini,
            &AuxiliaryParams::default(),
        );
        assert_eq!(to_chat_messages(&req).len(), 2);
    }
}
