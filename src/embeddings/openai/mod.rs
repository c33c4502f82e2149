#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::{EmbeddingError, EmbeddingStrategy, StrategyKind};
use crate::config::{EmbeddingConfig, OpenAiConfig};

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Remote embedding strategy backed by the OpenAI embeddings API.
///
/// Construction never touches the network and never requires credentials;
/// the API key is resolved on first actual use so processes that never
/// embed can start without it.
#[derive(Debug, Clone)]
pub struct RemoteEmbeddings {
    base_url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    api_key: Option<String>,
    agent: ureq::Agent,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedItem>,
}

#[derive(Debug, Deserialize)]
struct EmbedItem {
    index: usize,
    embedding: Vec<f32>,
}

impl RemoteEmbeddings {
    #[inline]
    pub fn new(openai: &OpenAiConfig, embedding: &EmbeddingConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(openai.timeout_seconds)))
            .build()
            .into();

        Self {
            base_url: openai.base_url.trim_end_matches('/').to_string(),
            model: embedding.model.clone(),
            dimension: embedding.dimension as usize,
            batch_size: embedding.batch_size as usize,
            api_key: openai.api_key.clone(),
            agent,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    /// Whether a key is resolvable right now, without making any request.
    #[inline]
    pub fn has_credentials(&self) -> bool {
        self.resolve_api_key().is_some()
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

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let api_key = self.resolve_api_key().ok_or_else(|| {
            EmbeddingError::Unavailable(
                "no OpenAI API key configured (set OPENAI_API_KEY or [openai] api_key)".to_string(),
            )
        })?;

        let cleaned: Vec<String> = texts
            .iter()
            .map(|t| {
                let flat = t.replace('\n', " ");
                let flat = flat.trim();
                if flat.is_empty() { "empty" } else { flat }.to_string()
            })
            .collect();

        let request = EmbedRequest {
            model: &self.model,
            input: &cleaned,
        };
        let request_json = serde_json::to_string(&request)
            .map_err(|e| EmbeddingError::Malformed(format!("request serialization: {}", e)))?;

        let url = format!("{}/v1/embeddings", self.base_url);
        let auth_header = format!("Bearer {}", api_key);
        debug!("Requesting {} embeddings from {}", cleaned.len(), url);

        let response_text = self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .header("Authorization", auth_header.as_str())
                .send(&request_json)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;

        let mut response: EmbedResponse = serde_json::from_str(&response_text)
            .map_err(|e| EmbeddingError::Malformed(format!("response parse: {}", e)))?;

        if response.data.len() != cleaned.len() {
            return Err(EmbeddingError::Malformed(format!(
                "requested {} embeddings, received {}",
                cleaned.len(),
                response.data.len()
            )));
        }

        // The API returns items carrying their input index; order by it
        // rather than trusting response order.
        response.data.sort_by_key(|item| item.index);

        let mut vectors = Vec::with_capacity(response.data.len());
        for item in response.data {
            if item.embedding.len() != self.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimension,
                    actual: item.embedding.len(),
                });
            }
            vectors.push(item.embedding);
        }

        Ok(vectors)
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String, EmbeddingError>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!(
                "Embedding request attempt {}/{}",
                attempt, self.retry_attempts
            );

            match request_fn() {
                Ok(response_text) => return Ok(response_text),
                Err(error) => {
                    match &error {
                        ureq::Error::StatusCode(status) if *status >= 500 => {
                            warn!(
                                "Embedding server error (status {}), attempt {}/{}",
                                status, attempt, self.retry_attempts
                            );
                        }
                        ureq::Error::StatusCode(status) => {
                            return Err(EmbeddingError::Unavailable(format!(
                                "embedding API rejected request: HTTP {}",
                                status
                            )));
                        }
                        ureq::Error::ConnectionFailed
                        | ureq::Error::HostNotFound
                        | ureq::Error::Timeout(_)
                        | ureq::Error::Io(_) => {
                            warn!(
                                "Embedding transport error: {}, attempt {}/{}",
                                error, attempt, self.retry_attempts
                            );
                        }
                        _ => {
                            return Err(EmbeddingError::Unavailable(format!(
                                "embedding request failed: {}",
                                error
                            )));
                        }
                    }

                    last_error = Some(EmbeddingError::Unavailable(format!(
                        "embedding request failed: {}",
                        error
                    )));

                    if attempt < self.retry_attempts {
                        let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                        std::thread::sleep(Duration::from_millis(delay_ms));
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            EmbeddingError::Unavailable("embedding request failed after retries".to_string())
        }))
    }
}

impl EmbeddingStrategy for RemoteEmbeddings {
    #[inline]
    fn kind(&self) -> StrategyKind {
        StrategyKind::Remote
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let input = [text.to_string()];
        let mut vectors = self.embed_single_batch(&input)?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".to_string()))
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            results.extend(self.embed_single_batch(batch)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }
}
