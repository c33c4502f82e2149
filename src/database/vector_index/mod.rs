
use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::embeddings::StrategyKind;

pub const INDEX_FILE_NAME: &str = "index.json";
const INDEX_TEMP_FILE_NAME: &str = "index.json.tmp";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(
        "query embedding strategy '{query}' does not match index strategy '{index}'; \
         rebuild the index with the active strategy"
    )]
    StrategyMismatch {
        index: StrategyKind,
        query: StrategyKind,
    },
    #[error("query vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Metadata stored alongside each vector: enough to render a citation and
/// inject the chunk into a prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub entry_id: i64,
    pub chunk_index: usize,
    pub category: String,
    pub title: String,
    pub source_label: String,
    pub text: String,
}

/// One nearest-neighbor match.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: IndexedChunk,
    pub score: f32,
}

/// On-disk schema. Deliberately plain structured data — the file may be
/// tampered with, so deserialization must never construct anything beyond
/// these records.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    strategy: StrategyKind,
    dimension: usize,
    built_from_revision: i64,
    built_at: NaiveDateTime,
    chunks: Vec<IndexedChunk>,
    vectors: Vec<Vec<f32>>,
}

/// Flat cosine-similarity index over chunk embeddings.
///
/// Vectors are unit-normalized at build time so similarity is a dot
/// product. The whole structure is immutable after build; a rebuild
/// produces a complete replacement rather than patching in place.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    strategy: StrategyKind,
    dimension: usize,
    built_from_revision: i64,
    built_at: NaiveDateTime,
    chunks: Vec<IndexedChunk>,
    vectors: Vec<Vec<f32>>,
}

impl VectorIndex {
    /// Assemble an index from parallel chunk/vector lists. Vector count and
    /// dimensionality are contract requirements, not recoverable conditions.
    #[inline]
    pub fn build(
        strategy: StrategyKind,
        dimension: usize,
        built_from_revision: i64,
        chunks: Vec<IndexedChunk>,
        mut vectors: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }

        for vector in &vectors {
            if vector.len() != dimension {
                anyhow::bail!(
                    "vector dimension {} does not match declared dimension {}",
                    vector.len(),
                    dimension
                );
            }
        }

        for vector in &mut vectors {
            normalize(vector);
        }

        info!(
            "Built vector index: {} chunks, dimension {}, strategy {}",
            chunks.len(),
            dimension,
            strategy
        );

        Ok(Self {
            strategy,
            dimension,
            built_from_revision,
            built_at: chrono::Utc::now().naive_utc(),
            chunks,
            vectors,
        })
    }

    #[inline]
    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn built_from_revision(&self) -> i64 {
        self.built_from_revision
    }

    #[inline]
    pub fn built_at(&self) -> NaiveDateTime {
        self.built_at
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of distinct knowledge entries represented in the index.
    #[inline]
    pub fn entry_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.entry_id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// k nearest chunks by cosine similarity, floor-filtered, descending by
    /// score with ties in original insertion order.
    #[inline]
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut normalized_query = query.to_vec();
        normalize(&mut normalized_query);

        let mut hits: Vec<SearchHit> = self
            .vectors
            .iter()
            .zip(&self.chunks)
            .map(|(vector, chunk)| SearchHit {
                chunk: chunk.clone(),
                score: dot(&normalized_query, vector),
            })
            .filter(|hit| hit.score >= min_similarity)
            .collect();

        // Stable sort keeps insertion order for equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);

        Ok(hits)
    }

    /// Persist to `dir` as a single unit: serialized to a temporary file,
    /// then atomically renamed over the previous index so a concurrent
    /// reader never observes a half-written file.
    #[inline]
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let persisted = PersistedIndex {
            strategy: self.strategy,
            dimension: self.dimension,
            built_from_revision: self.built_from_revision,
            built_at: self.built_at,
            chunks: self.chunks.clone(),
            vectors: self.vectors.clone(),
        };

        let payload =
            serde_json::to_vec(&persisted).context("Failed to serialize vector index")?;

        let temp_path = dir.join(INDEX_TEMP_FILE_NAME);
        let final_path = dir.join(INDEX_FILE_NAME);

        fs::write(&temp_path, payload)
            .with_context(|| format!("Failed to write index file: {}", temp_path.display()))?;
        fs::rename(&temp_path, &final_path)
            .with_context(|| format!("Failed to replace index file: {}", final_path.display()))?;

        info!(
            "Saved vector index ({} chunks) to {}",
            self.chunks.len(),
            final_path.display()
        );
        Ok(())
    }

    /// Restore from `dir`. A missing file is `Ok(None)`; a file that fails
    /// structural validation is logged and also treated as absent, which
    /// forces a rebuild instead of attempting partial recovery.
    #[inline]
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(INDEX_FILE_NAME);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No persisted index at {}", path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read index file: {}", path.display()));
            }
        };

        let persisted: PersistedIndex = match serde_json::from_str(&content) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(
                    "Persisted index at {} is corrupt ({}); treating as empty",
                    path.display(),
                    e
                );
                return Ok(None);
            }
        };

        if let Err(reason) = validate_persisted(&persisted) {
            warn!(
                "Persisted index at {} failed validation ({}); treating as empty",
                path.display(),
                reason
            );
            return Ok(None);
        }

        let mut index = Self {
            strategy: persisted.strategy,
            dimension: persisted.dimension,
            built_from_revision: persisted.built_from_revision,
            built_at: persisted.built_at,
            chunks: persisted.chunks,
            vectors: persisted.vectors,
        };

        // Stored vectors are already normalized; renormalizing costs little
        // and protects search against hand-edited files.
        for vector in &mut index.vectors {
            normalize(vector);
        }

        info!(
            "Loaded vector index: {} chunks, strategy {}, built from revision {}",
            index.chunks.len(),
            index.strategy,
            index.built_from_revision
        );
        Ok(Some(index))
    }
}

fn validate_persisted(persisted: &PersistedIndex) -> Result<(), String> {
    if persisted.vectors.len() != persisted.chunks.len() {
        return Err(format!(
            "{} vectors but {} chunks",
            persisted.vectors.len(),
            persisted.chunks.len()
        ));
    }

    if persisted.dimension == 0 {
        return Err("zero dimension".to_string());
    }

    for (i, vector) in persisted.vectors.iter().enumerate() {
        if vector.len() != persisted.dimension {
            return Err(format!(
                "vector {} has dimension {} (expected {})",
                i,
                vector.len(),
                persisted.dimension
            ));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(format!("vector {} contains non-finite values", i));
        }
    }

    Ok(())
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
