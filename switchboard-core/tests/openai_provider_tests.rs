//! Integration tests for the OpenAI-protocol adapter

use serde_json::json;
use std::time::Duration;
use switchboard_core::protocol::{ChatRequest, EventType, Message};
use switchboard_core::providers::openai::OpenAIProvider;
use switchboard_core::providers::{Provider, ProviderConfig, ProviderError};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn provider_for(server: &MockServer) -> OpenAIProvider {
    OpenAIProvider::new(ProviderConfig::new("sk-test").with_base_url(server.uri())).unwrap()
}

fn request() -> ChatRequest {
    ChatRequest::new("gpt-4o", vec![Message::user("Hi")])
}

fn chat_completion_body() -> serde_json::Value {
    json!({
        "id": "chatcmpl-123",
        "object": "chat.completion",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "Hello there!"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
    })
}

#[test]
fn construction_requires_an_api_key() {
    let err = OpenAIProvider::new(ProviderConfig::new("")).unwrap_err();
    assert!(matches!(err, ProviderError::Authentication { .. }));
}

#[tokio::test]
async fn chat_returns_a_normalized_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({"model": "gpt-4o", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let response = provider.chat(&request()).await.unwrap();

    assert_eq!(response.content, "Hello there!");
    assert_eq!(response.model, "gpt-4o");
    assert_eq!(response.provider, "openai");
    assert_eq!(response.finish_reason, "stop");

    let usage = response.usage.unwrap();
    assert_eq!(
        usage.total_tokens,
        usage.prompt_tokens + usage.completion_tokens
    );
}

#[tokio::test]
async fn organization_header_is_forwarded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("openai-organization", "org-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body()))
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAIProvider::new(
        ProviderConfig::new("sk-test")
            .with_base_url(server.uri())
            .with_organization("org-42"),
    )
    .unwrap();

    provider.chat(&request()).await.unwrap();
}

#[tokio::test]
async fn unknown_model_fails_fast_without_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion_body()))
        .expect(0)
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let req = ChatRequest::new("made-up-model", vec![Message::user("Hi")]);
    let err = provider.chat(&req).await.unwrap_err();

    match err {
        ProviderError::InvalidModel { model, supported, .. } => {
            assert_eq!(model, "made-up-model");
            assert!(supported.contains(&"gpt-4o".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn status_401_maps_to_authentication() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "Incorrect API key provided"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    match err {
        ProviderError::Authentication { reason, .. } => {
            assert!(reason.contains("Incorrect API key"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn status_429_captures_the_retry_after_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "2")
                .set_body_json(json!({
                    "error": {"type": "rate_limit_exceeded", "message": "Rate limit reached"}
                })),
        )
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    match err {
        ProviderError::RateLimit { retry_after, .. } => {
            assert_eq!(retry_after, Duration::from_secs(2));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn status_429_without_header_has_zero_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"type": "rate_limit_exceeded", "message": "Rate limit reached"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    match err {
        ProviderError::RateLimit { retry_after, .. } => assert_eq!(retry_after, Duration::ZERO),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn context_length_error_is_classified_from_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "type": "context_length_exceeded",
                "message": "This model's maximum context length is 8192 tokens"
            }
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::ContextLength { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn status_404_mentioning_the_model_maps_to_invalid_model() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"type": "invalid_request_error", "message": "The model `gpt-4o` has been deprecated"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidModel { .. }));
}

#[tokio::test]
async fn unknown_errors_carry_the_backend_type_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"type": "server_error", "message": "The server had an error"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider.chat(&request()).await.unwrap_err();
    match err {
        ProviderError::Generic { message, .. } => {
            assert!(message.contains("server_error"));
            assert!(message.contains("The server had an error"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn models_returns_the_catalog() {
    let server = MockServer::start().await;
    let provider = provider_for(&server);
    let models = provider.models().await.unwrap();

    assert!(!models.is_empty());
    let gpt4o = models.iter().find(|m| m.id == "gpt-4o").unwrap();
    assert_eq!(gpt4o.provider, "openai");
    assert!(gpt4o.capabilities.contains(&"streaming".to_string()));
}

fn sse_chunk(text: &str) -> String {
    format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": text}, "finish_reason": null}]})
    )
}

#[tokio::test]
async fn stream_yields_deltas_and_one_terminal_event() {
    let mut body = String::new();
    body.push_str(&sse_chunk("Hel"));
    body.push_str(&sse_chunk("lo"));
    body.push_str("data: [DONE]\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = stream.recv().await {
        events.push(event);
    }

    assert_eq!(events[0].event_type, EventType::MessageStart);
    assert_eq!(events[1].event_type, EventType::ContentStart);

    let deltas: Vec<&str> = events
        .iter()
        .filter(|e| e.event_type == EventType::TextDelta)
        .map(|e| e.content.as_str())
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo"]);

    let terminals: Vec<_> = events
        .iter()
        .filter(|e| e.event_type.is_terminal())
        .collect();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0].event_type, EventType::MessageStop);
    assert_eq!(terminals[0].content, "Hello");

    // Nothing after the terminal event.
    assert!(events.last().unwrap().event_type.is_terminal());
}

#[tokio::test]
async fn finish_reason_terminates_without_a_sentinel() {
    let mut body = String::new();
    body.push_str(&sse_chunk("Hi"));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})
    ));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = stream.recv().await {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.event_type, EventType::MessageStop);
    assert_eq!(last.content, "Hi");
}

#[tokio::test]
async fn unparseable_chunks_are_skipped_not_fatal() {
    let mut body = String::new();
    body.push_str(&sse_chunk("one"));
    body.push_str("data: {not json at all\n\n");
    body.push_str(&sse_chunk("two"));
    body.push_str("data: [DONE]\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap();

    let mut deltas = Vec::new();
    let mut terminal = None;
    while let Some(event) = stream.recv().await {
        match event.event_type {
            EventType::TextDelta => deltas.push(event.content),
            t if t.is_terminal() => terminal = Some(event),
            _ => {}
        }
    }

    assert_eq!(deltas, vec!["one", "two"]);
    assert_eq!(terminal.unwrap().event_type, EventType::MessageStop);
}

#[tokio::test]
async fn stream_usage_chunk_becomes_a_usage_event() {
    let mut body = String::new();
    body.push_str(&sse_chunk("x"));
    body.push_str(&format!(
        "data: {}\n\n",
        json!({"choices": [], "usage": {"prompt_tokens": 4, "completion_tokens": 1, "total_tokens": 5}})
    ));
    body.push_str("data: [DONE]\n\n");

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap();

    let mut usage = None;
    while let Some(event) = stream.recv().await {
        if event.event_type == EventType::Usage {
            usage = event.usage;
        }
    }
    let usage = usage.unwrap();
    assert_eq!(usage.total_tokens, 5);
    assert_eq!(usage.prompt_tokens + usage.completion_tokens, 5);
}

#[tokio::test]
async fn truncated_stream_ends_with_an_error_event() {
    // Two deltas, then the connection just ends: no sentinel, no finish.
    let mut body = String::new();
    body.push_str(&sse_chunk("a"));
    body.push_str(&sse_chunk("b"));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let mut stream = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap();

    let mut last = None;
    while let Some(event) = stream.recv().await {
        last = Some(event);
    }
    let last = last.unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert!(last.error.is_some());
}

#[tokio::test]
async fn initial_request_failure_is_an_error_not_a_stream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"type": "invalid_api_key", "message": "bad key"}
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server);
    let err = provider
        .stream(&request(), CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::Authentication { .. }));
}
