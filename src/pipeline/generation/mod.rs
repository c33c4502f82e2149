#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OpenAiConfig;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Causes are kept distinct for logging even though every one of them
/// resolves to the same user-visible fallback answer.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request timed out")]
    Timeout,
    #[error("generation API error: HTTP {status}")]
    Api { status: u16 },
    #[error("generation credentials missing or rejected: {0}")]
    Auth(String),
    #[error("generation transport error: {0}")]
    Transport(String),
    #[error("generation response malformed: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

impl ChatMessage {
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Blocking OpenAI chat-completions client. The request timeout is baked
/// into the agent so a hung generation call resolves into
/// `GenerationError::Timeout` instead of stalling a conversation forever.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
    retry_attempts: u32,
}

impl ChatClient {
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_seconds)))
            .build()
            .into();

        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.chat_model.clone(),
            api_key: config.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_completion_tokens,
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| {
                std::env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
    }

    /// One generation call with bounded retries for transient errors.
    #[inline]
    pub fn complete(&self, messages: &[ChatMessage]) -> Result<String, GenerationError> {
        let api_key = self.resolve_api_key().ok_or_else(|| {
            GenerationError::Auth(
                "no OpenAI API key configured (set OPENAI_API_KEY or [openai] api_key)".to_string(),
            )
        })?;

        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| GenerationError::Malformed(format!("request serialization: {}", e)))?;

        let url = format!("{}/v1/chat/completions", self.base_url);
        let auth_header = format!("Bearer {}", api_key);
        let mut last_error = GenerationError::Transport("no request attempted".to_string());

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Generation request attempt {}/{}",
                attempt, self.retry_attempts
            );

            let outcome = self
                .agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", auth_header.as_str())
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string());

            match outcome {
                Ok(response_text) => return parse_completion(&response_text),
                Err(error) => {
                    let (mapped, retryable) = classify(&error);
                    if !retryable {
                        return Err(mapped);
                    }

                    warn!(
                        "Transient generation failure ({}), attempt {}/{}",
                        mapped, attempt, self.retry_attempts
                    );
                    last_error = mapped;

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        Err(last_error)
    }
}

fn parse_completion(response_text: &str) -> Result<String, GenerationError> {
    let response: ChatResponse = serde_json::from_str(response_text)
        .map_err(|e| GenerationError::Malformed(format!("response parse: {}", e)))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| GenerationError::Malformed("no choices in response".to_string()))
}

fn classify(error: &ureq::Error) -> (GenerationError, bool) {
    match error {
        ureq::Error::StatusCode(status) if *status >= 500 => {
            (GenerationError::Api { status: *status }, true)
        }
        ureq::Error::StatusCode(status) if *status == 401 || *status == 403 => (
            GenerationError::Auth(format!("generation API rejected credentials: HTTP {}", status)),
            false,
        ),
        ureq::Error::StatusCode(status) => (GenerationError::Api { status: *status }, false),
        ureq::Error::Timeout(_) => (GenerationError::Timeout, true),
        ureq::Error::ConnectionFailed | ureq::Error::HostNotFound | ureq::Error::Io(_) => (
            GenerationError::Transport(error.to_string()),
            true,
        ),
        _ => (GenerationError::Transport(error.to_string()), false),
    }
}
