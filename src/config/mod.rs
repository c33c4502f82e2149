// Configuration management module
// TOML-backed settings with validation, stored under the data directory

pub mod settings;

pub use settings::{
    BusinessConfig, ChunkingSettings, Config, ConfigError, EmbeddingConfig, EmbeddingProvider,
    IndexConfig, OpenAiConfig, PipelineConfig, RagConfig, StalenessPolicy, Tone,
};

/// Resolve the default data directory when `--data-dir` is not given
#[inline]
pub fn default_data_dir() -> Result<std::path::PathBuf, ConfigError> {
    dirs::data_dir()
        .map(|d| d.join("frontdesk"))
        .ok_or(ConfigError::DirectoryError)
}
