// Indexer module
// Builds the vector index from the knowledge base and tracks staleness


use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use crate::config::{ChunkingSettings, Config, StalenessPolicy};
use crate::database::sqlite::models::encode_embedding;
use crate::database::sqlite::{
    ChunkQueries, Database, KnowledgeQueries, MetaQueries, NewStoredChunk, StoredChunk,
};
use crate::database::vector_index::{IndexedChunk, VectorIndex};
use crate::embeddings::{
    CharsPerToken, EmbeddingStrategy, StrategyKind, chunk_text, contextual_text, select_strategy,
};

/// Shared handle to the index currently being served.
///
/// Readers clone the inner `Arc` out under a short read lock; a rebuild
/// constructs a complete replacement index and swaps the reference, so a
/// reader never observes a partially built structure and never blocks on a
/// build.
#[derive(Clone, Default)]
pub struct SharedIndex {
    inner: Arc<RwLock<Option<Arc<VectorIndex>>>>,
}

impl SharedIndex {
    #[inline]
    pub fn current(&self) -> Option<Arc<VectorIndex>> {
        self.inner.read().expect("index lock poisoned").clone()
    }

    pub(crate) fn replace(&self, index: Arc<VectorIndex>) {
        *self.inner.write().expect("index lock poisoned") = Some(index);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    pub built: bool,
    pub entry_count: usize,
    pub chunk_count: usize,
    pub strategy: Option<StrategyKind>,
    pub built_from_revision: Option<i64>,
    pub built_at: Option<NaiveDateTime>,
    pub current_revision: i64,
    pub is_stale: bool,
}

/// Orchestrates index builds: chunk active entries, embed them (reusing
/// cached embeddings for unchanged entries), persist the new index and swap
/// it in atomically.
pub struct Indexer {
    database: Database,
    strategy: Arc<dyn EmbeddingStrategy>,
    shared: SharedIndex,
    index_dir: PathBuf,
    chunking: ChunkingSettings,
    staleness_policy: StalenessPolicy,
    build_lock: tokio::sync::Mutex<()>,
}

impl Indexer {
    #[inline]
    pub async fn new(config: &Config, database: Database) -> Result<Self> {
        let strategy = select_strategy(config);
        Self::with_strategy(config, database, strategy).await
    }

    /// Construction with an explicit strategy; the public constructor
    /// resolves it from configuration once per process.
    #[inline]
    pub async fn with_strategy(
        config: &Config,
        database: Database,
        strategy: Arc<dyn EmbeddingStrategy>,
    ) -> Result<Self> {
        let index_dir = config.index_dir();
        let shared = SharedIndex::default();

        let load_dir = index_dir.clone();
        let loaded = tokio::task::spawn_blocking(move || VectorIndex::load(&load_dir))
            .await
            .context("Index load task failed")??;

        if let Some(index) = loaded {
            if index.strategy() != strategy.kind() {
                warn!(
                    "Persisted index was built with strategy '{}' but the active strategy is \
                     '{}'; retrieval will fail until the index is rebuilt",
                    index.strategy(),
                    strategy.kind()
                );
            }
            shared.replace(Arc::new(index));
        }

        Ok(Self {
            database,
            strategy,
            shared,
            index_dir,
            chunking: config.chunking.clone(),
            staleness_policy: config.index.staleness_policy,
            build_lock: tokio::sync::Mutex::new(()),
        })
    }

    #[inline]
    pub fn shared(&self) -> SharedIndex {
        self.shared.clone()
    }

    #[inline]
    pub fn strategy(&self) -> Arc<dyn EmbeddingStrategy> {
        Arc::clone(&self.strategy)
    }

    /// Rebuild the index from all active knowledge entries and atomically
    /// replace the served index. Safe on an empty knowledge base, which
    /// yields a valid empty index.
    ///
    /// Entries whose chunk texts are unchanged since the last build reuse
    /// their cached embeddings; everything else is re-embedded. Any failure
    /// aborts the build with both the persisted and the served index
    /// untouched.
    #[inline]
    pub async fn build_index(&self) -> Result<IndexStatus> {
        let _guard = self.build_lock.lock().await;
        let pool = self.database.pool();

        // Read the revision before the entries: if the KB changes mid-build
        // the index is conservatively recorded as built from the older state.
        let revision = MetaQueries::kb_revision(pool).await?;
        let entries = KnowledgeQueries::list_active(pool).await?;
        info!(
            "Rebuilding vector index from {} active entries (revision {})",
            entries.len(),
            revision
        );

        let estimator = CharsPerToken::from_settings(&self.chunking);
        let mut indexed: Vec<IndexedChunk> = Vec::new();
        let mut texts_by_entry: HashMap<i64, Vec<String>> = HashMap::new();

        for entry in &entries {
            let chunks = chunk_text(&entry.content, &self.chunking, &estimator);
            let mut entry_texts = Vec::with_capacity(chunks.len());

            for chunk in &chunks {
                let text = contextual_text(chunk, &entry.category, &entry.title);
                entry_texts.push(text.clone());
                indexed.push(IndexedChunk {
                    entry_id: entry.id,
                    chunk_index: chunk.ordinal,
                    category: entry.category.clone(),
                    title: entry.title.clone(),
                    source_label: entry.source_label(),
                    text,
                });
            }

            texts_by_entry.insert(entry.id, entry_texts);
        }

        let entry_ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        let cached = ChunkQueries::get_for_entries(pool, &entry_ids).await?;
        let unchanged = self.unchanged_entries(&texts_by_entry, &cached);

        debug!(
            "Incremental rebuild: {} entries unchanged, {} need re-embedding",
            unchanged.len(),
            entries.len() - unchanged.len()
        );

        // Fill vectors from cache where possible, collect the rest.
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; indexed.len()];
        let mut to_embed: Vec<(usize, String)> = Vec::new();

        for (position, chunk) in indexed.iter().enumerate() {
            let reused = if unchanged.contains(&chunk.entry_id) {
                cached.get(&chunk.entry_id).and_then(|stored| {
                    stored
                        .iter()
                        .find(|s| s.chunk_index == chunk.chunk_index as i64)
                        .and_then(StoredChunk::decode_embedding)
                })
            } else {
                None
            };

            match reused {
                Some(vector) => vectors[position] = Some(vector),
                None => to_embed.push((position, chunk.text.clone())),
            }
        }

        if !to_embed.is_empty() {
            let strategy = Arc::clone(&self.strategy);
            let batch: Vec<String> = to_embed.iter().map(|(_, text)| text.clone()).collect();
            let embedded = tokio::task::spawn_blocking(move || strategy.embed_batch(&batch))
                .await
                .context("Embedding task failed")?
                .context("Failed to embed chunks")?;

            if embedded.len() != to_embed.len() {
                anyhow::bail!(
                    "embedding strategy returned {} vectors for {} inputs",
                    embedded.len(),
                    to_embed.len()
                );
            }

            info!(
                "Generated {} new embeddings ({} reused from cache)",
                to_embed.len(),
                indexed.len() - to_embed.len()
            );

            for ((position, _), vector) in to_embed.iter().zip(embedded) {
                vectors[*position] = Some(vector);
            }
        } else if !indexed.is_empty() {
            info!("All {} embeddings reused from cache", indexed.len());
        }

        let vectors: Vec<Vec<f32>> = vectors
            .into_iter()
            .map(|v| v.context("chunk missing its embedding after build"))
            .collect::<Result<_>>()?;

        // Refresh the cache for changed entries before swapping the index.
        let strategy_name = self.strategy.kind().to_string();
        for entry in &entries {
            if unchanged.contains(&entry.id) {
                continue;
            }

            let new_chunks: Vec<NewStoredChunk> = indexed
                .iter()
                .enumerate()
                .filter(|(_, c)| c.entry_id == entry.id)
                .map(|(position, c)| NewStoredChunk {
                    entry_id: c.entry_id,
                    chunk_index: c.chunk_index as i64,
                    chunk_text: c.text.clone(),
                    embedding: encode_embedding(&vectors[position]),
                    strategy: strategy_name.clone(),
                })
                .collect();

            ChunkQueries::replace_for_entry(pool, entry.id, new_chunks).await?;
        }

        let index = VectorIndex::build(
            self.strategy.kind(),
            self.strategy.dimension(),
            revision,
            indexed,
            vectors,
        )?;

        let index = Arc::new(index);
        let persist = Arc::clone(&index);
        let dir = self.index_dir.clone();
        tokio::task::spawn_blocking(move || persist.save(&dir))
            .await
            .context("Index save task failed")??;

        self.shared.replace(Arc::clone(&index));
        info!(
            "Index rebuild complete: {} chunks from {} entries",
            index.len(),
            index.entry_count()
        );

        self.status().await
    }

    fn unchanged_entries(
        &self,
        texts_by_entry: &HashMap<i64, Vec<String>>,
        cached: &HashMap<i64, Vec<StoredChunk>>,
    ) -> HashSet<i64> {
        let strategy_name = self.strategy.kind().to_string();
        let dimension = self.strategy.dimension();

        texts_by_entry
            .iter()
            .filter(|&(entry_id, new_texts)| {
                let Some(stored) = cached.get(entry_id) else {
                    return false;
                };

                let old_texts: Vec<&str> = stored.iter().map(|s| s.chunk_text.as_str()).collect();
                let matches_texts =
                    old_texts == new_texts.iter().map(String::as_str).collect::<Vec<_>>();

                // Cached vectors are only reusable when they were produced
                // by the active strategy at the right dimensionality.
                matches_texts
                    && stored.iter().all(|s| {
                        s.strategy == strategy_name
                            && s.decode_embedding()
                                .is_some_and(|v| v.len() == dimension)
                    })
            })
            .map(|(entry_id, _)| *entry_id)
            .collect()
    }

    #[inline]
    pub async fn status(&self) -> Result<IndexStatus> {
        let current_revision = MetaQueries::kb_revision(self.database.pool()).await?;
        let current = self.shared.current();

        Ok(match current {
            Some(index) => IndexStatus {
                built: true,
                entry_count: index.entry_count(),
                chunk_count: index.len(),
                strategy: Some(index.strategy()),
                built_from_revision: Some(index.built_from_revision()),
                built_at: Some(index.built_at()),
                current_revision,
                is_stale: index.built_from_revision() < current_revision,
            },
            None => IndexStatus {
                built: false,
                entry_count: 0,
                chunk_count: 0,
                strategy: None,
                built_from_revision: None,
                built_at: None,
                current_revision,
                is_stale: false,
            },
        })
    }

    /// Apply the configured staleness policy before retrieval. Returns
    /// whether the current index may be served from.
    #[inline]
    pub async fn ensure_fresh(&self) -> Result<bool> {
        let status = self.status().await?;

        if !status.built {
            return match self.staleness_policy {
                StalenessPolicy::Rebuild if status.current_revision > 0 => {
                    info!("No index built yet; building before retrieval");
                    self.build_index().await?;
                    Ok(true)
                }
                _ => Ok(true),
            };
        }

        if !status.is_stale {
            return Ok(true);
        }

        match self.staleness_policy {
            StalenessPolicy::Warn => {
                warn!(
                    "Index is stale (built from revision {:?}, knowledge base at {}); serving anyway",
                    status.built_from_revision, status.current_revision
                );
                Ok(true)
            }
            StalenessPolicy::Block => {
                warn!(
                    "Index is stale (built from revision {:?}, knowledge base at {}); refusing to serve stale context",
                    status.built_from_revision, status.current_revision
                );
                Ok(false)
            }
            StalenessPolicy::Rebuild => {
                info!("Index is stale; rebuilding before retrieval");
                self.build_index().await?;
                Ok(true)
            }
        }
    }
}
