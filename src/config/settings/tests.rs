use super::*;
use tempfile::TempDir;

#[test]
fn default_config_is_valid() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.embedding.dimension, DEFAULT_EMBEDDING_DIMENSION);
    assert_eq!(config.rag.top_k, 10);
    assert_eq!(config.index.staleness_policy, StalenessPolicy::Warn);
}

#[test]
fn load_missing_file_returns_defaults() {
    let temp_dir = TempDir::new().expect("tempdir");
    let config = Config::load(temp_dir.path()).expect("load should succeed");

    assert_eq!(config, Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    });
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("tempdir");

    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.business.name = "Corner Barber".to_string();
    config.business.tone = Tone::Formal;
    config.rag.top_k = 5;
    config.embedding.provider = EmbeddingProvider::Local;
    config.index.staleness_policy = StalenessPolicy::Rebuild;
    config.save().expect("save should succeed");

    let loaded = Config::load(temp_dir.path()).expect("load should succeed");
    assert_eq!(loaded, config);
}

#[test]
fn rejects_empty_business_name() {
    let mut config = Config::default();
    config.business.name = "  ".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidBusinessName)
    ));
}

#[test]
fn rejects_overlap_above_half_budget() {
    let mut config = Config::default();
    config.chunking.max_tokens = 100;
    config.chunking.overlap_tokens = 51;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(51, 100))
    ));

    config.chunking.overlap_tokens = 50;
    assert!(config.validate().is_ok());
}

#[test]
fn rejects_bad_similarity_floor() {
    let mut config = Config::default();
    config.rag.min_similarity = 1.5;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidMinSimilarity(_))
    ));
}

#[test]
fn rejects_bad_embedding_dimension() {
    let mut config = Config::default();
    config.embedding.dimension = 32;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(32))
    ));
}

#[test]
fn rejects_zero_timeout() {
    let mut config = Config::default();
    config.openai.timeout_seconds = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTimeout(0))
    ));
}

#[test]
fn rejects_malformed_base_url() {
    let mut config = Config::default();
    config.openai.base_url = "not a url".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
}

#[test]
fn staleness_policy_parses_from_toml() {
    let parsed: Config = toml::from_str(
        r#"
        [index]
        staleness_policy = "block"
        "#,
    )
    .expect("should parse");
    assert_eq!(parsed.index.staleness_policy, StalenessPolicy::Block);
}
