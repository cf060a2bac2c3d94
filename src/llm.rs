//! LLM provider abstraction: one trait, two interchangeable backends.
//! The variant is chosen once per run from available credentials (Anthropic
//! preferred, OpenAI as fallback) and injected into the orchestrator.

use crate::types::{DigestError, Result};
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{info, warn};

pub const MAX_OUTPUT_TOKENS: u32 = 1024;
const LLM_MAX_RETRIES: u32 = 3;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_ANTHROPIC_MODEL: &str = "claude-haiku-4-5-20251001";
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Provider-reported failure categories. Everything except `Contract` is
/// worth retrying; `Contract` means our request (or the response shape) is
/// wrong and a retry cannot help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    RateLimited,
    Timeout,
    Connection,
    Server,
    Contract,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
}

impl LlmError {
    fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind != LlmErrorKind::Contract
    }
}

fn status_error_kind(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        s if s >= 500 => LlmErrorKind::Server,
        _ => LlmErrorKind::Contract,
    }
}

fn transport_error(err: reqwest::Error) -> LlmError {
    let kind = if err.is_timeout() {
        LlmErrorKind::Timeout
    } else {
        LlmErrorKind::Connection
    };
    LlmError::new(kind, err.to_string())
}

/// A single completion backend. `complete_once` is one raw call; retry policy
/// lives in [`complete_with_retry`].
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete_once(
        &self,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, LlmError>;

    /// Identifying name of the model, persisted alongside each summary.
    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &'static str;
}

/// Pick the provider for this run from the environment. Primary: Anthropic.
/// Fallback: OpenAI. No credential at all is a configuration error and
/// aborts the run before any item is touched.
pub fn select_provider() -> Result<Box<dyn LlmClient>> {
    if let Ok(key) = env::var("ANTHROPIC_API_KEY") {
        if !key.is_empty() {
            return Ok(Box::new(AnthropicClient::new(key)));
        }
    }
    if let Ok(key) = env::var("OPENAI_API_KEY") {
        if !key.is_empty() {
            return Ok(Box::new(OpenAiClient::new(key)));
        }
    }
    Err(DigestError::NoProvider)
}

/// Call the provider with the same bounded backoff schedule the fetch client
/// uses (1s, 2s). Contract errors propagate immediately.
pub async fn complete_with_retry(
    client: &dyn LlmClient,
    system: &str,
    user: &str,
) -> Result<String> {
    let mut schedule = ExponentialBackoff {
        current_interval: Duration::from_secs(1),
        initial_interval: Duration::from_secs(1),
        randomization_factor: 0.0,
        multiplier: 2.0,
        max_interval: Duration::from_secs(60),
        max_elapsed_time: None,
        ..Default::default()
    };
    let mut last = String::new();

    for attempt in 1..=LLM_MAX_RETRIES {
        match client.complete_once(system, user).await {
            Ok(text) => return Ok(text),
            Err(e) if e.is_retryable() => {
                last = e.to_string();
                if attempt < LLM_MAX_RETRIES {
                    if let Some(wait) = schedule.next_backoff() {
                        warn!(
                            "LLM attempt {}/{} failed: {} (retry in {:?})",
                            attempt, LLM_MAX_RETRIES, last, wait
                        );
                        tokio::time::sleep(wait).await;
                    }
                }
            }
            Err(e) => return Err(DigestError::Llm(e.to_string())),
        }
    }
    Err(DigestError::Llm(format!(
        "all {LLM_MAX_RETRIES} attempts failed: {last}"
    )))
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Anthropic (primary)
// ---------------------------------------------------------------------------

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String) -> Self {
        let model =
            env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_ANTHROPIC_MODEL.to_string());
        info!("Using LLM provider: anthropic ({})", model);
        Self {
            http: http_client(),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete_once(
        &self,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, LlmError> {
        let request = AnthropicRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            system,
            messages: vec![ChatMessage {
                role: "user",
                content: user,
            }],
        };

        let response = self
            .http
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::new(
                status_error_kind(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        let body: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::Server, format!("bad response body: {e}")))?;
        body.content
            .first()
            .map(|c| c.text.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LlmError::new(LlmErrorKind::Contract, "empty completion"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &'static str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// OpenAI (fallback)
// ---------------------------------------------------------------------------

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        let model = env::var("OPENAI_MODEL").unwrap_or_else(|_| DEFAULT_OPENAI_MODEL.to_string());
        info!("Using LLM provider: openai ({})", model);
        Self {
            http: http_client(),
            api_key,
            model,
        }
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: String,
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_once(
        &self,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, LlmError> {
        let request = OpenAiRequest {
            model: &self.model,
            max_tokens: MAX_OUTPUT_TOKENS,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let response = self
            .http
            .post(OPENAI_API_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::new(
                status_error_kind(status),
                format!("HTTP {status}: {body}"),
            ));
        }

        let body: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::new(LlmErrorKind::Server, format!("bad response body: {e}")))?;
        body.choices
            .first()
            .map(|c| c.message.content.clone())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| LlmError::new(LlmErrorKind::Contract, "empty completion"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

// ---------------------------------------------------------------------------
// Scripted client for tests
// ---------------------------------------------------------------------------

/// Deterministic in-process client: pops scripted responses in order and
/// records every call it receives.
pub struct MockLlmClient {
    responses: std::sync::Mutex<std::collections::VecDeque<String>>,
    calls: std::sync::Mutex<Vec<(String, String)>>,
}

impl MockLlmClient {
    pub fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: std::sync::Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock calls lock").len()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().expect("mock calls lock").clone()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete_once(
        &self,
        system: &str,
        user: &str,
    ) -> std::result::Result<String, LlmError> {
        self.calls
            .lock()
            .expect("mock calls lock")
            .push((system.to_string(), user.to_string()));
        self.responses
            .lock()
            .expect("mock responses lock")
            .pop_front()
            .ok_or_else(|| LlmError::new(LlmErrorKind::Contract, "mock script exhausted"))
    }

    fn model_name(&self) -> &str {
        "mock-model"
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}
