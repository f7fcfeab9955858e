//! Text-completion capability
//!
//! The pipeline only needs "send a system prompt and some messages, get text
//! back". [`Completer`] is that seam; [`AnthropicClient`] talks to a Messages API
//! endpoint over a blocking reqwest client, [`ScriptedCompleter`] replays canned
//! replies for offline runs and tests.

use crate::config::ModelConfig;
use crate::error::{Classify, FailureKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const API_VERSION: &str = "2023-06-01";
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_MS: u64 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Single user message, no system prompt
    pub fn prompt(text: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            system: None,
            messages: vec![Message::user(text)],
            max_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no API key configured (set {0})")]
    MissingApiKey(String),
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected response shape: {0}")]
    Malformed(String),
    #[error("empty response")]
    Empty,
}

impl Classify for CompletionError {
    fn kind(&self) -> FailureKind {
        FailureKind::ModelUnusable
    }
}

/// Anything that can turn a prompt into text
pub trait Completer: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError>;
}

/// Messages API client
pub struct AnthropicClient {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
}

impl AnthropicClient {
    /// A missing key is only reported when a completion is attempted, so the
    /// ticket commands keep working without one.
    pub fn new(config: &ModelConfig, api_key: Option<String>) -> Result<Self, CompletionError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| CompletionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            api_key_env: config.api_key_env.clone(),
        })
    }

    fn payload(&self, request: &CompletionRequest) -> Value {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
        });
        if let Some(system) = &request.system {
            payload["system"] = json!(system);
        }
        payload
    }
}

fn is_transient(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 529)
}

/// Concatenate the text blocks of a Messages API response.
///
/// A reply cut off by the token ceiling is rejected rather than returned half
/// written.
pub fn extract_text(body: &Value) -> Result<String, CompletionError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| CompletionError::Malformed("missing content array".to_string()))?;
    if body.get("stop_reason").and_then(Value::as_str) == Some("max_tokens") {
        return Err(CompletionError::Malformed("truncated at max_tokens".to_string()));
    }

    let text: String = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        Err(CompletionError::Empty)
    } else {
        Ok(text)
    }
}

impl Completer for AnthropicClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| CompletionError::MissingApiKey(self.api_key_env.clone()))?;
        let payload = self.payload(request);

        let mut attempt = 0;
        loop {
            debug!(model = %self.model, max_tokens = request.max_tokens, attempt, "completion request");
            let result = self
                .client
                .post(&self.endpoint)
                .header("x-api-key", api_key)
                .header("anthropic-version", API_VERSION)
                .json(&payload)
                .send();

            let error = match result {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response
                        .text()
                        .map_err(|e| CompletionError::Transport(e.to_string()))?;
                    if (200..300).contains(&status) {
                        let value: Value = serde_json::from_str(&body)
                            .map_err(|e| CompletionError::Malformed(e.to_string()))?;
                        return extract_text(&value);
                    }
                    CompletionError::Api {
                        status,
                        body: clip(body, 500),
                    }
                }
                Err(e) if e.is_timeout() => CompletionError::Timeout,
                Err(e) => CompletionError::Transport(e.to_string()),
            };

            let retryable = match &error {
                CompletionError::Api { status, .. } => is_transient(*status),
                CompletionError::Timeout | CompletionError::Transport(_) => true,
                _ => false,
            };
            if !retryable || attempt >= MAX_RETRIES {
                return Err(error);
            }
            warn!(error = %error, attempt, "completion failed, retrying");
            thread::sleep(Duration::from_millis(RETRY_BASE_MS * 2u64.pow(attempt)));
            attempt += 1;
        }
    }
}

fn clip(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

/// Replays queued replies in order and records every request it saw.
///
/// Used for offline runs and throughout the test suite. An exhausted script
/// answers with [`CompletionError::Empty`].
#[derive(Default)]
pub struct ScriptedCompleter {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompleter {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Ok(reply.into()));
        }
    }

    pub fn push_error(&self, error: CompletionError) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(Err(error));
        }
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Completer for ScriptedCompleter {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.clone());
        }
        self.replies
            .lock()
            .map_err(|_| CompletionError::Transport("script lock poisoned".to_string()))?
            .pop_front()
            .unwrap_or(Err(CompletionError::Empty))
    }
}

impl<T: Completer + ?Sized> Completer for std::sync::Arc<T> {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        (**self).complete(request)
    }
}
