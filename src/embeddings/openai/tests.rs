use super::*;
use serial_test::serial;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn remote_for(server_uri: &str, dimension: u32) -> RemoteEmbeddings {
    let openai = OpenAiConfig {
        base_url: server_uri.to_string(),
        api_key: Some("test-key".to_string()),
        ..OpenAiConfig::default()
    };
    let embedding = EmbeddingConfig {
        dimension,
        batch_size: 2,
        ..EmbeddingConfig::default()
    };
    RemoteEmbeddings::new(&openai, &embedding).with_retry_attempts(1)
}

fn embedding_body(vectors: &[Vec<f32>]) -> serde_json::Value {
    let data: Vec<serde_json::Value> = vectors
        .iter()
        .enumerate()
        .map(|(index, embedding)| {
            serde_json::json!({ "index": index, "embedding": embedding, "object": "embedding" })
        })
        .collect();
    serde_json::json!({ "object": "list", "data": data, "model": "text-embedding-3-small" })
}

#[test]
fn client_configuration() {
    let openai = OpenAiConfig {
        base_url: "https://api.example.com/".to_string(),
        api_key: Some("abc".to_string()),
        ..OpenAiConfig::default()
    };
    let embedding = EmbeddingConfig {
        dimension: 256,
        batch_size: 8,
        ..EmbeddingConfig::default()
    };

    let client = RemoteEmbeddings::new(&openai, &embedding);
    assert_eq!(client.kind(), StrategyKind::Remote);
    assert_eq!(client.dimension(), 256);
    assert!(client.has_credentials());
}

#[tokio::test]
async fn embeds_a_single_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.6, 0.8]])))
        .expect(1)
        .mount(&server)
        .await;

    let client = remote_for(&server.uri(), 2);
    let vector = tokio::task::spawn_blocking(move || client.embed("what time do you open?"))
        .await
        .expect("task")
        .expect("embed should succeed");

    assert_eq!(vector, vec![0.6, 0.8]);
}

#[tokio::test]
async fn batches_respect_configured_batch_size() {
    let server = MockServer::start().await;
    // batch_size = 2, three inputs: two requests.
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(
            serde_json::json!({ "input": ["a", "b"] }),
        ))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(embedding_body(&[vec![1.0, 0.0], vec![0.0, 1.0]])),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .and(body_partial_json(serde_json::json!({ "input": ["c"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.5, 0.5]])))
        .expect(1)
        .mount(&server)
        .await;

    let client = remote_for(&server.uri(), 2);
    let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
    let vectors = tokio::task::spawn_blocking(move || client.embed_batch(&texts))
        .await
        .expect("task")
        .expect("batch embed should succeed");

    assert_eq!(vectors.len(), 3);
    assert_eq!(vectors[2], vec![0.5, 0.5]);
}

#[tokio::test]
async fn auth_failure_is_unavailable_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = remote_for(&server.uri(), 2).with_retry_attempts(3);
    let result = tokio::task::spawn_blocking(move || client.embed("hello"))
        .await
        .expect("task");

    assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));
}

#[tokio::test]
async fn dimension_mismatch_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[vec![0.1; 3]])))
        .mount(&server)
        .await;

    let client = remote_for(&server.uri(), 2);
    let result = tokio::task::spawn_blocking(move || client.embed("hello"))
        .await
        .expect("task");

    assert!(matches!(
        result,
        Err(EmbeddingError::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    ));
}

#[tokio::test]
async fn out_of_order_response_items_are_reordered() {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "object": "list",
        "data": [
            { "index": 1, "embedding": [0.0, 1.0], "object": "embedding" },
            { "index": 0, "embedding": [1.0, 0.0], "object": "embedding" },
        ],
        "model": "text-embedding-3-small",
    });
    Mock::given(method("POST"))
        .and(path("/v1/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;

    let client = remote_for(&server.uri(), 2);
    let texts = vec!["first".to_string(), "second".to_string()];
    let vectors = tokio::task::spawn_blocking(move || client.embed_batch(&texts))
        .await
        .expect("task")
        .expect("batch embed should succeed");

    assert_eq!(vectors[0], vec![1.0, 0.0]);
    assert_eq!(vectors[1], vec![0.0, 1.0]);
}

#[test]
#[serial]
fn missing_credentials_fail_before_any_request() {
    // SAFETY: guarded by #[serial]; no other test mutates this variable
    // concurrently.
    let saved = std::env::var("OPENAI_API_KEY").ok();
    unsafe { std::env::remove_var("OPENAI_API_KEY") };

    let openai = OpenAiConfig::default();
    let embedding = EmbeddingConfig::default();
    let client = RemoteEmbeddings::new(&openai, &embedding);

    assert!(!client.has_credentials());
    let result = client.embed("hello");
    assert!(matches!(result, Err(EmbeddingError::Unavailable(_))));

    if let Some(key) = saved {
        // SAFETY: see above.
        unsafe { std::env::set_var("OPENAI_API_KEY", key) };
    }
}
