// Embeddings module
// Text-to-vector strategies plus the chunking of knowledge entries

pub mod chunking;
pub mod local;
pub mod openai;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, EmbeddingProvider};

pub use chunking::{CharsPerToken, Chunk, TokenEstimator, chunk_text, contextual_text};
pub use local::HashEmbeddings;
pub use openai::RemoteEmbeddings;

/// Which algorithm produced a vector. Vectors from different strategies are
/// not comparable, so the strategy is recorded on the persisted index and
/// checked before every query embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Remote,
    LocalHash,
}

impl std::fmt::Display for StrategyKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            StrategyKind::Remote => write!(f, "remote"),
            StrategyKind::LocalHash => write!(f, "local_hash"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    #[error("embedding response malformed: {0}")]
    Malformed(String),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A text-to-vector strategy. Calls may block on network I/O; async callers
/// run them through `tokio::task::spawn_blocking`.
pub trait EmbeddingStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Dimensionality of every vector this strategy produces.
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Batch form, preferred at index-build time to amortize round trips.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Select the process-wide embedding strategy. Happens once; the choice is
/// immutable for the process lifetime so index/query compatibility stays an
/// invariant rather than a runtime race.
///
/// With `fallback_to_local` set, a remote provider with no resolvable
/// credentials degrades to the hash strategy here, at selection time —
/// never silently in the middle of a query.
#[inline]
pub fn select_strategy(config: &Config) -> Arc<dyn EmbeddingStrategy> {
    match config.embedding.provider {
        EmbeddingProvider::Local => Arc::new(HashEmbeddings::new(
            config.embedding.dimension as usize,
        )),
        EmbeddingProvider::Openai => {
            let remote = RemoteEmbeddings::new(&config.openai, &config.embedding);
            if config.embedding.fallback_to_local && !remote.has_credentials() {
                warn!(
                    "No OpenAI credentials available; falling back to local hash embeddings. \
                     These are NOT semantically meaningful and exist for offline/testing use."
                );
                return Arc::new(HashEmbeddings::new(config.embedding.dimension as usize));
            }
            Arc::new(remote)
        }
    }
}
