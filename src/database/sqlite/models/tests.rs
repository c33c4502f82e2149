use super::*;
use chrono::NaiveDate;

fn sample_datetime() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 8, 1)
        .expect("valid date")
        .and_hms_opt(12, 0, 0)
        .expect("valid time")
}

#[test]
fn source_label_joins_category_and_title() {
    let entry = KnowledgeEntry {
        id: 3,
        category: "Services".to_string(),
        title: "Hair Services".to_string(),
        content: "Haircuts and coloring.".to_string(),
        is_active: true,
        created_at: sample_datetime(),
        updated_at: sample_datetime(),
    };
    assert_eq!(entry.source_label(), "Services — Hair Services");
}

#[test]
fn message_role_display() {
    assert_eq!(MessageRole::User.to_string(), "user");
    assert_eq!(MessageRole::Assistant.to_string(), "assistant");
}

#[test]
fn question_status_display() {
    assert_eq!(QuestionStatus::Open.to_string(), "open");
    assert_eq!(QuestionStatus::Resolved.to_string(), "resolved");
}

#[test]
fn embedding_round_trips_through_blob_encoding() {
    let vector = vec![0.25_f32, -1.5, 3.75, 0.0];
    let chunk = StoredChunk {
        id: 1,
        entry_id: 1,
        chunk_index: 0,
        chunk_text: "text".to_string(),
        embedding: Some(encode_embedding(&vector)),
        strategy: "local_hash".to_string(),
        created_at: sample_datetime(),
    };

    assert_eq!(chunk.decode_embedding(), Some(vector));
}

#[test]
fn missing_or_malformed_embedding_decodes_to_none() {
    let mut chunk = StoredChunk {
        id: 1,
        entry_id: 1,
        chunk_index: 0,
        chunk_text: "text".to_string(),
        embedding: None,
        strategy: "remote".to_string(),
        created_at: sample_datetime(),
    };
    assert_eq!(chunk.decode_embedding(), None);

    chunk.embedding = Some(vec![1, 2, 3]); // not a multiple of four bytes
    assert_eq!(chunk.decode_embedding(), None);

    chunk.embedding = Some(Vec::new());
    assert_eq!(chunk.decode_embedding(), None);
}

#[test]
fn message_role_serde_uses_lowercase() {
    let json = serde_json::to_string(&MessageRole::Assistant).expect("serialize");
    assert_eq!(json, "\"assistant\"");
    let parsed: MessageRole = serde_json::from_str("\"user\"").expect("deserialize");
    assert_eq!(parsed, MessageRole::User);
}
