#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 1536;

const DEFAULT_FALLBACK_RESPONSE: &str = "I don't have that specific information right now. \
Let me connect you with a human agent who can help you better. \
Please tap the 'Talk to Agent' button below.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub business: BusinessConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusinessConfig {
    pub name: String,
    pub tone: Tone,
    pub fallback_response: String,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            name: "Dana's Beauty Salon".to_string(),
            tone: Tone::Friendly,
            fallback_response: DEFAULT_FALLBACK_RESPONSE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Friendly,
    Formal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OpenAiConfig {
    pub base_url: String,
    pub chat_model: String,
    /// Overrides the OPENAI_API_KEY environment variable when set.
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub max_completion_tokens: u32,
    pub temperature: f32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            chat_model: "gpt-4.1-mini".to_string(),
            api_key: None,
            timeout_seconds: 30,
            max_completion_tokens: 500,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimension: u32,
    pub batch_size: u32,
    /// Allow falling back to the local hash strategy when the remote
    /// provider has no credentials. Evaluated once at strategy selection,
    /// never mid-query.
    pub fallback_to_local: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Openai,
            model: "text-embedding-3-small".to_string(),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
            batch_size: 100,
            fallback_to_local: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Openai,
    Local,
}

/// Chunking knobs. The token estimate is a character-ratio heuristic tuned
/// for Latin scripts; `chars_per_token` is the calibration point for other
/// scripts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
    pub chars_per_token: f32,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens: 300,
            overlap_tokens: 30,
            chars_per_token: 4.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    pub top_k: usize,
    pub min_similarity: f32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_similarity: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IndexConfig {
    pub staleness_policy: StalenessPolicy,
}

/// What retrieval does when the loaded index is older than the knowledge base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StalenessPolicy {
    /// Log a warning and serve from the stale index.
    #[default]
    Warn,
    /// Refuse to serve stale results; the turn proceeds without context.
    Block,
    /// Rebuild the index before retrieving.
    Rebuild,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub history_limit: usize,
    pub max_concurrent_llm_calls: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            history_limit: 10,
            max_concurrent_llm_calls: 4,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Data directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid business name (cannot be empty)")]
    InvalidBusinessName,
    #[error("Invalid fallback response (cannot be empty)")]
    InvalidFallbackResponse,
    #[error("Invalid chat model name (cannot be empty)")]
    InvalidChatModel,
    #[error("Invalid embedding model name (cannot be empty)")]
    InvalidEmbeddingModel,
    #[error("Invalid timeout: {0} (must be between 1 and 300 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid max chunk tokens: {0} (must be between 50 and 2048)")]
    InvalidMaxTokens(usize),
    #[error("Overlap of {0} tokens exceeds half the chunk budget of {1} tokens")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid chars-per-token ratio: {0} (must be positive)")]
    InvalidCharsPerToken(f32),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid minimum similarity: {0} (must be between 0.0 and 1.0)")]
    InvalidMinSimilarity(f32),
    #[error("Invalid history limit: {0} (must be between 1 and 50)")]
    InvalidHistoryLimit(usize),
    #[error("Invalid concurrent call limit: {0} (must be between 1 and 64)")]
    InvalidConcurrencyLimit(usize),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    #[inline]
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let config_path = data_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: data_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = data_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        fs::create_dir_all(&self.base_dir).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                self.base_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.business.name.trim().is_empty() {
            return Err(ConfigError::InvalidBusinessName);
        }

        if self.business.fallback_response.trim().is_empty() {
            return Err(ConfigError::InvalidFallbackResponse);
        }

        self.openai.validate()?;
        self.embedding.validate()?;
        self.chunking.validate()?;
        self.rag.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.base_dir.join("config.toml")
    }

    /// Path of the SQLite database holding the knowledge base and
    /// conversation history
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.base_dir.join("frontdesk.db")
    }

    /// Directory holding the persisted vector index
    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.base_dir.join("index")
    }
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            business: BusinessConfig::default(),
            openai: OpenAiConfig::default(),
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingSettings::default(),
            rag: RagConfig::default(),
            index: IndexConfig::default(),
            pipeline: PipelineConfig::default(),
            base_dir: PathBuf::new(),
        }
    }
}

impl OpenAiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.base_url).map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidChatModel);
        }

        if self.timeout_seconds == 0 || self.timeout_seconds > 300 {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        Ok(())
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidEmbeddingModel);
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        Ok(())
    }
}

impl ChunkingSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(50..=2048).contains(&self.max_tokens) {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        // Larger overlaps make adjacent chunks degenerate into duplicates.
        if self.overlap_tokens > self.max_tokens / 2 {
            return Err(ConfigError::OverlapTooLarge(
                self.overlap_tokens,
                self.max_tokens,
            ));
        }

        if !self.chars_per_token.is_finite() || self.chars_per_token <= 0.0 {
            return Err(ConfigError::InvalidCharsPerToken(self.chars_per_token));
        }

        Ok(())
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 || self.top_k > 100 {
            return Err(ConfigError::InvalidTopK(self.top_k));
        }

        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(ConfigError::InvalidMinSimilarity(self.min_similarity));
        }

        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_limit == 0 || self.history_limit > 50 {
            return Err(ConfigError::InvalidHistoryLimit(self.history_limit));
        }

        if self.max_concurrent_llm_calls == 0 || self.max_concurrent_llm_calls > 64 {
            return Err(ConfigError::InvalidConcurrencyLimit(
                self.max_concurrent_llm_calls,
            ));
        }

        Ok(())
    }
}
