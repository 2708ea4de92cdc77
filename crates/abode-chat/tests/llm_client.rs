//! HTTP behaviour of the chat-completion client against a mock upstream.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use abode_chat::{ChatCompletion, CompletionParams, LlmClient, PromptMessage};
use abode_core::config::LlmConfig;

fn config_for(server: &MockServer) -> LlmConfig {
    LlmConfig {
        api_key: Some("test-key".to_string()),
        api_url: format!("{}/v1/chat/completions", server.uri()),
        model: "test-model".to_string(),
        timeout_secs: 1,
        ..LlmConfig::default()
    }
}

fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "cmpl-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

async fn ask(config: &LlmConfig) -> Result<String, abode_chat::LlmError> {
    let client = LlmClient::new(config).unwrap();
    client
        .complete(
            &[PromptMessage::system("be brief"), PromptMessage::user("hi")],
            &CompletionParams::from(config),
        )
        .await
}

#[tokio::test]
async fn test_completion_sends_bearer_and_returns_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("Hello there")))
        .expect(1)
        .mount(&server)
        .await;

    let reply = ask(&config_for(&server)).await.unwrap();
    assert_eq!(reply, "Hello there");
}

#[tokio::test]
async fn test_non_success_status_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
        .mount(&server)
        .await;

    let err = ask(&config_for(&server)).await.unwrap_err();
    assert_eq!(err.kind(), "llm_upstream_error");
    match err {
        abode_chat::LlmError::Upstream { status, body } => {
            assert_eq!(status, 429);
            assert_eq!(body, "slow down");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_other_2xx_status_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202).set_body_json(completion_body("queued")))
        .mount(&server)
        .await;

    let err = ask(&config_for(&server)).await.unwrap_err();
    assert!(matches!(
        err,
        abode_chat::LlmError::Upstream { status: 202, .. }
    ));
}

#[tokio::test]
async fn test_missing_choices_is_empty_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .mount(&server)
        .await;

    let err = ask(&config_for(&server)).await.unwrap_err();
    assert_eq!(err.kind(), "llm_empty_response");
}

#[tokio::test]
async fn test_non_json_body_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = ask(&config_for(&server)).await.unwrap_err();
    assert_eq!(err.kind(), "llm_upstream_error");
}

#[tokio::test]
async fn test_timeout_is_upstream_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("too late"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let err = ask(&config_for(&server)).await.unwrap_err();
    assert_eq!(err.kind(), "llm_upstream_error");
}

#[tokio::test]
async fn test_unconfigured_never_calls_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("nope")))
        .expect(0)
        .mount(&server)
        .await;

    let config = LlmConfig {
        api_key: None,
        ..config_for(&server)
    };
    let err = ask(&config).await.unwrap_err();
    assert_eq!(err.kind(), "llm_unconfigured");
}
