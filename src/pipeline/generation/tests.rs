use super::*;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server_uri: &str) -> ChatClient {
    let config = OpenAiConfig {
        base_url: server_uri.to_string(),
        api_key: Some("test-key".to_string()),
        chat_model: "gpt-4.1-mini".to_string(),
        ..OpenAiConfig::default()
    };
    ChatClient::new(&config).with_retry_attempts(1)
}

fn completion_body(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
    })
}

#[test]
fn message_constructors_set_roles() {
    assert_eq!(ChatMessage::system("a").role, "system");
    assert_eq!(ChatMessage::user("b").role, "user");
    assert_eq!(ChatMessage::assistant("c").role, "assistant");
}

#[test]
fn request_serializes_openai_shape() {
    let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
    let request = ChatRequest {
        model: "gpt-4.1-mini",
        messages: &messages,
        temperature: 0.3,
        max_tokens: 500,
    };

    let value = serde_json::to_value(&request).expect("serialize");
    assert_eq!(value["model"], "gpt-4.1-mini");
    assert_eq!(value["messages"][0]["role"], "system");
    assert_eq!(value["messages"][1]["content"], "hi");
    assert_eq!(value["max_tokens"], 500);
}

#[tokio::test]
async fn returns_trimmed_completion_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(
            serde_json::json!({ "model": "gpt-4.1-mini" }),
        ))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(completion_body("  We open at 9am. \n")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let messages = vec![ChatMessage::user("when do you open?")];
    let answer = tokio::task::spawn_blocking(move || client.complete(&messages))
        .await
        .expect("task")
        .expect("completion should succeed");

    assert_eq!(answer, "We open at 9am.");
}

#[tokio::test]
async fn auth_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri()).with_retry_attempts(3);
    let messages = vec![ChatMessage::user("hi")];
    let result = tokio::task::spawn_blocking(move || client.complete(&messages))
        .await
        .expect("task");

    assert!(matches!(result, Err(GenerationError::Auth(_))));
}

#[tokio::test]
async fn server_errors_surface_after_bounded_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let messages = vec![ChatMessage::user("hi")];
    let result = tokio::task::spawn_blocking(move || client.complete(&messages))
        .await
        .expect("task");

    assert!(matches!(
        result,
        Err(GenerationError::Api { status: 503 })
    ));
}

#[tokio::test]
async fn quota_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server.uri()).with_retry_attempts(3);
    let messages = vec![ChatMessage::user("hi")];
    let result = tokio::task::spawn_blocking(move || client.complete(&messages))
        .await
        .expect("task");

    assert!(matches!(
        result,
        Err(GenerationError::Api { status: 429 })
    ));
}

#[tokio::test]
async fn empty_choice_list_is_malformed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "id": "x", "choices": [] })),
        )
        .mount(&server)
        .await;

    let client = client_for(&server.uri());
    let messages = vec![ChatMessage::user("hi")];
    let result = tokio::task::spawn_blocking(move || client.complete(&messages))
        .await
        .expect("task");

    assert!(matches!(result, Err(GenerationError::Malformed(_))));
}
