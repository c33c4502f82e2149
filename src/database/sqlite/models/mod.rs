#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct KnowledgeEntry {
    pub id: i64,
    pub category: String,
    pub title: String,
    pub content: String,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl KnowledgeEntry {
    /// Citation label tying retrieved chunks back to this entry.
    #[inline]
    pub fn source_label(&self) -> String {
        format!("{} — {}", self.category, self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewKnowledgeEntry {
    pub category: String,
    pub title: String,
    pub content: String,
}

/// Cached chunk from the last index build. The embedding is reused on
/// rebuild when the chunk text and strategy are unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoredChunk {
    pub id: i64,
    pub entry_id: i64,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Option<Vec<u8>>,
    pub strategy: String,
    pub created_at: NaiveDateTime,
}

impl StoredChunk {
    /// Decode the cached embedding from little-endian f32 bytes. `None`
    /// when absent or structurally invalid.
    #[inline]
    pub fn decode_embedding(&self) -> Option<Vec<f32>> {
        let bytes = self.embedding.as_deref()?;
        if bytes.is_empty() || bytes.len() % 4 != 0 {
            return None;
        }
        Some(
            bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        )
    }
}

/// Encode an embedding as little-endian f32 bytes for BLOB storage.
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewStoredChunk {
    pub entry_id: i64,
    pub chunk_index: i64,
    pub chunk_text: String,
    pub embedding: Vec<u8>,
    pub strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ConversationMessage {
    pub id: i64,
    pub user_id: String,
    pub username: String,
    pub role: MessageRole,
    pub message: String,
    pub sources: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UnansweredQuestion {
    pub id: i64,
    pub user_id: String,
    pub username: String,
    pub question: String,
    pub status: QuestionStatus,
    pub created_at: NaiveDateTime,
    pub resolved_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    Open,
    Resolved,
}

impl std::fmt::Display for QuestionStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            QuestionStatus::Open => write!(f, "open"),
            QuestionStatus::Resolved => write!(f, "resolved"),
        }
    }
}
