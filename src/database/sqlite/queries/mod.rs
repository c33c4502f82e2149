
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::debug;

use super::models::{
    ConversationMessage, KnowledgeEntry, MessageRole, NewKnowledgeEntry, NewStoredChunk,
    StoredChunk, UnansweredQuestion,
};

pub struct KnowledgeQueries;

impl KnowledgeQueries {
    /// Insert a new entry and bump the knowledge base revision in the same
    /// transaction, so staleness reporting can never miss the change.
    #[inline]
    pub async fn create(pool: &SqlitePool, new_entry: NewKnowledgeEntry) -> Result<KnowledgeEntry> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let id = sqlx::query(
            "INSERT INTO kb_entries (category, title, content, is_active, created_at, updated_at) \
             VALUES (?, ?, ?, 1, ?, ?)",
        )
        .bind(&new_entry.category)
        .bind(&new_entry.title)
        .bind(&new_entry.content)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to create knowledge entry")?
        .last_insert_rowid();

        MetaQueries::bump_revision(&mut tx).await?;
        tx.commit().await.context("Failed to commit transaction")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created knowledge entry"))
    }

    #[inline]
    pub async fn update(
        pool: &SqlitePool,
        id: i64,
        update: NewKnowledgeEntry,
    ) -> Result<Option<KnowledgeEntry>> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let affected = sqlx::query(
            "UPDATE kb_entries SET category = ?, title = ?, content = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&update.category)
        .bind(&update.title)
        .bind(&update.content)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to update knowledge entry")?
        .rows_affected();

        if affected == 0 {
            return Ok(None);
        }

        MetaQueries::bump_revision(&mut tx).await?;
        tx.commit().await.context("Failed to commit transaction")?;

        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn deactivate(pool: &SqlitePool, id: i64) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        let affected = sqlx::query(
            "UPDATE kb_entries SET is_active = 0, updated_at = ? WHERE id = ? AND is_active = 1",
        )
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to deactivate knowledge entry")?
        .rows_affected();

        if affected == 0 {
            return Ok(false);
        }

        MetaQueries::bump_revision(&mut tx).await?;
        tx.commit().await.context("Failed to commit transaction")?;
        Ok(true)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<KnowledgeEntry>> {
        sqlx::query_as::<_, KnowledgeEntry>(
            "SELECT id, category, title, content, is_active, created_at, updated_at \
             FROM kb_entries WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get knowledge entry by id")
    }

    /// Active entries in insertion order; the source set for index builds.
    #[inline]
    pub async fn list_active(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
        sqlx::query_as::<_, KnowledgeEntry>(
            "SELECT id, category, title, content, is_active, created_at, updated_at \
             FROM kb_entries WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list active knowledge entries")
    }

    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<KnowledgeEntry>> {
        sqlx::query_as::<_, KnowledgeEntry>(
            "SELECT id, category, title, content, is_active, created_at, updated_at \
             FROM kb_entries ORDER BY id",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list knowledge entries")
    }

    #[inline]
    pub async fn count_active(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM kb_entries WHERE is_active = 1")
            .fetch_one(pool)
            .await
            .context("Failed to count active knowledge entries")
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Replace the cached chunks of one entry in a single transaction.
    #[inline]
    pub async fn replace_for_entry(
        pool: &SqlitePool,
        entry_id: i64,
        chunks: Vec<NewStoredChunk>,
    ) -> Result<()> {
        let now = Utc::now().naive_utc();
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM kb_chunks WHERE entry_id = ?")
            .bind(entry_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear cached chunks")?;

        for chunk in &chunks {
            sqlx::query(
                "INSERT INTO kb_chunks (entry_id, chunk_index, chunk_text, embedding, strategy, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.entry_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.chunk_text)
            .bind(&chunk.embedding)
            .bind(&chunk.strategy)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to insert cached chunk")?;
        }

        tx.commit().await.context("Failed to commit transaction")?;
        debug!("Cached {} chunks for entry {}", chunks.len(), entry_id);
        Ok(())
    }

    #[inline]
    pub async fn get_for_entries(
        pool: &SqlitePool,
        entry_ids: &[i64],
    ) -> Result<HashMap<i64, Vec<StoredChunk>>> {
        let mut by_entry: HashMap<i64, Vec<StoredChunk>> = HashMap::new();

        for &entry_id in entry_ids {
            let chunks = sqlx::query_as::<_, StoredChunk>(
                "SELECT id, entry_id, chunk_index, chunk_text, embedding, strategy, created_at \
                 FROM kb_chunks WHERE entry_id = ? ORDER BY chunk_index",
            )
            .bind(entry_id)
            .fetch_all(pool)
            .await
            .context("Failed to load cached chunks")?;

            if !chunks.is_empty() {
                by_entry.insert(entry_id, chunks);
            }
        }

        Ok(by_entry)
    }
}

pub struct ConversationQueries;

impl ConversationQueries {
    #[inline]
    pub async fn append(
        pool: &SqlitePool,
        user_id: &str,
        username: &str,
        role: MessageRole,
        message: &str,
        sources: &str,
    ) -> Result<ConversationMessage> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO conversations (user_id, username, role, message, sources, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(username)
        .bind(role)
        .bind(message)
        .bind(sources)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to append conversation message")?
        .last_insert_rowid();

        sqlx::query_as::<_, ConversationMessage>(
            "SELECT id, user_id, username, role, message, sources, created_at \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to read back conversation message")
    }

    /// The most recent messages for a user in chronological order.
    ///
    /// Ordered by the rowid rather than the timestamp: same-second inserts
    /// would otherwise have undefined relative order.
    #[inline]
    pub async fn recent_messages(
        pool: &SqlitePool,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>> {
        let mut messages = sqlx::query_as::<_, ConversationMessage>(
            "SELECT id, user_id, username, role, message, sources, created_at \
             FROM conversations WHERE user_id = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .context("Failed to load conversation history")?;

        messages.reverse();
        Ok(messages)
    }
}

pub struct UnansweredQueries;

impl UnansweredQueries {
    #[inline]
    pub async fn record(
        pool: &SqlitePool,
        user_id: &str,
        username: &str,
        question: &str,
    ) -> Result<UnansweredQuestion> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO unanswered_questions (user_id, username, question, status, created_at) \
             VALUES (?, ?, ?, 'open', ?)",
        )
        .bind(user_id)
        .bind(username)
        .bind(question)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to record unanswered question")?
        .last_insert_rowid();

        sqlx::query_as::<_, UnansweredQuestion>(
            "SELECT id, user_id, username, question, status, created_at, resolved_at \
             FROM unanswered_questions WHERE id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .context("Failed to read back unanswered question")
    }

    #[inline]
    pub async fn list_open(pool: &SqlitePool, limit: usize) -> Result<Vec<UnansweredQuestion>> {
        sqlx::query_as::<_, UnansweredQuestion>(
            "SELECT id, user_id, username, question, status, created_at, resolved_at \
             FROM unanswered_questions WHERE status = 'open' ORDER BY id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(pool)
        .await
        .context("Failed to list open questions")
    }

    #[inline]
    pub async fn count_open(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM unanswered_questions WHERE status = 'open'")
            .fetch_one(pool)
            .await
            .context("Failed to count open questions")
    }

    #[inline]
    pub async fn resolve(pool: &SqlitePool, id: i64) -> Result<bool> {
        let now = Utc::now().naive_utc();
        let affected = sqlx::query(
            "UPDATE unanswered_questions SET status = 'resolved', resolved_at = ? \
             WHERE id = ? AND status = 'open'",
        )
        .bind(now)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to resolve question")?
        .rows_affected();

        Ok(affected > 0)
    }
}

pub struct MetaQueries;

impl MetaQueries {
    /// Current knowledge base revision; increases with every KB mutation.
    #[inline]
    pub async fn kb_revision(pool: &SqlitePool) -> Result<i64> {
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'kb_revision'")
            .fetch_one(pool)
            .await
            .context("Failed to read knowledge base revision")
    }

    async fn bump_revision(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
        sqlx::query("UPDATE meta SET value = value + 1 WHERE key = 'kb_revision'")
            .execute(&mut **tx)
            .await
            .context("Failed to bump knowledge base revision")?;
        Ok(())
    }
}
