
use sha2::{Digest, Sha256};
use std::sync::Once;
use tracing::warn;

use super::{EmbeddingError, EmbeddingStrategy, StrategyKind};

static FALLBACK_WARNING: Once = Once::new();

/// Deterministic hash-derived vectors requiring no network access.
///
/// Dimensionally compatible with the remote strategy so index code stays
/// strategy-agnostic, but the distances it produces carry no semantic
/// meaning. It keeps the system functional for offline and test use, not
/// for production relevance.
#[derive(Debug, Clone)]
pub struct HashEmbeddings {
    dimension: usize,
}

impl HashEmbeddings {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl EmbeddingStrategy for HashEmbeddings {
    #[inline]
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalHash
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        FALLBACK_WARNING.call_once(|| {
            warn!(
                "Using local hash embeddings. These are NOT semantically meaningful; \
                 configure the remote provider for production relevance."
            );
        });

        let cleaned = text.replace('\n', " ");
        let cleaned = cleaned.trim();
        let input = if cleaned.is_empty() { "empty" } else { cleaned };

        let mut vector = Vec::with_capacity(self.dimension);
        let mut round: u32 = 0;

        while vector.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(input.as_bytes());
            hasher.update(round.to_be_bytes());

            for byte in hasher.finalize() {
                if vector.len() == self.dimension {
                    break;
                }
                vector.push((f32::from(byte) / 255.0) * 2.0 - 1.0);
            }
            round += 1;
        }

        normalize(&mut vector);
        Ok(vector)
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
