// Retrieval module
// Embeds the query and searches the current index for relevant chunks


use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::database::vector_index::IndexError;
use crate::embeddings::EmbeddingStrategy;
use crate::indexer::SharedIndex;

/// A chunk judged relevant to the query, ready for prompt injection.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub category: String,
    pub title: String,
    pub source_label: String,
    pub score: f32,
}

/// Query-time orchestration: embed with the active strategy, search the
/// shared index, drop candidates below the similarity floor.
pub struct Retriever {
    strategy: Arc<dyn EmbeddingStrategy>,
    shared: SharedIndex,
}

impl Retriever {
    #[inline]
    pub fn new(strategy: Arc<dyn EmbeddingStrategy>, shared: SharedIndex) -> Self {
        Self { strategy, shared }
    }

    /// Top-k retrieval above `min_similarity`, in rank order.
    ///
    /// An empty result is a valid outcome meaning "no relevant knowledge" —
    /// it also covers the not-yet-built and empty-index cases. Errors are
    /// reserved for real failures: an index/query strategy mismatch is fatal
    /// to the call rather than silently degrading into wrong-distance
    /// search.
    #[inline]
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        min_similarity: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let Some(index) = self.shared.current() else {
            debug!("No index loaded; retrieval returns no context");
            return Ok(Vec::new());
        };

        // Checked before any embedding or search work: vectors from
        // different strategies are dimensionally compatible but not
        // comparable.
        if index.strategy() != self.strategy.kind() {
            return Err(IndexError::StrategyMismatch {
                index: index.strategy(),
                query: self.strategy.kind(),
            }
            .into());
        }

        if index.is_empty() {
            debug!("Index is empty; retrieval returns no context");
            return Ok(Vec::new());
        }

        let strategy = Arc::clone(&self.strategy);
        let query_text = query.to_string();
        let query_vector = tokio::task::spawn_blocking(move || strategy.embed(&query_text))
            .await
            .context("Query embedding task failed")?
            .context("Failed to embed query")?;

        let hits = index.search(&query_vector, k, min_similarity)?;
        debug!(
            "Retrieved {} chunks for query '{}'",
            hits.len(),
            query.chars().take(50).collect::<String>()
        );

        Ok(hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                text: hit.chunk.text,
                category: hit.chunk.category,
                title: hit.chunk.title,
                source_label: hit.chunk.source_label,
                score: hit.score,
            })
            .collect())
    }
}
