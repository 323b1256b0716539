// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use palaver::catalog::{ProviderDescriptor, ProviderKind, WireFormat};
use palaver::chat::{NoopObserver, StreamingSession, TurnOutcome, TurnResult};
use palaver::config::Settings;
use palaver::error::{ApiError, PalaverError};
use palaver::llm::create_backend;
use palaver::llm::message::Message;
use palaver::llm::provider::{ChatBackend, ChatRequest, StopReason};
use palaver::llm::providers::{AnthropicBackend, OllamaBackend, OpenAiCompatibleBackend};

fn request(stream: bool) -> ChatRequest {
    ChatRequest::new("test-model", vec![Message::user("Hi")])
        .with_system("Be brief.")
        .with_max_tokens(256)
        .with_temperature(0.5)
        .with_stream(stream)
}

async fn run_turn(backend: &dyn ChatBackend, request: ChatRequest) -> TurnOutcome {
    StreamingSession::new()
        .run(backend, request, &CancellationToken::new(), &mut NoopObserver)
        .await
}

fn completed(outcome: TurnOutcome) -> TurnResult {
    match outcome {
        TurnOutcome::Completed(result) => result,
        other => panic!("expected completion, got {:?}", other),
    }
}

fn sse(frames: &[serde_json::Value]) -> String {
    let mut body: String = frames
        .iter()
        .map(|frame| format!("data: {}\n\n", frame))
        .collect();
    body.push_str("data: [DONE]\n\n");
    body
}

// ==================== OpenAI-compatible ====================

#[tokio::test]
async fn test_openai_streams_content_reasoning_and_usage() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"id": "c1", "model": "test-model", "choices": [{"index": 0, "delta": {"reasoning_content": "thinking..."}}]}),
        json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": "Hello"}}]}),
        json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": " world"}, "finish_reason": "stop"}]}),
        json!({"id": "c1", "choices": [], "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": [{"role": "system", "content": "Be brief."}, {"role": "user", "content": "Hi"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("OpenAI", server.uri(), Some("sk-test".into()))
        .with_stream_usage();
    let result = completed(run_turn(&backend, request(true)).await);

    assert_eq!(result.content, "Hello world");
    assert_eq!(result.reasoning, "thinking...");
    assert_eq!(result.input_tokens, 9);
    assert_eq!(result.output_tokens, 2);
    assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
}

#[tokio::test]
async fn test_openai_streamed_tool_call() {
    let server = MockServer::start().await;
    let body = sse(&[
        json!({"id": "c2", "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "id": "call_1", "function": {"name": "search", "arguments": "{\"q\":"}}]}}]}),
        json!({"id": "c2", "choices": [{"index": 0, "delta": {"tool_calls": [{"index": 0, "function": {"arguments": "\"rust\"}"}}]}}]}),
        json!({"id": "c2", "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("DeepSeek", server.uri(), Some("k".into()));
    let result = completed(run_turn(&backend, request(true)).await);

    assert_eq!(result.stop_reason, Some(StopReason::ToolUse));
    assert_eq!(result.tool_calls.len(), 1);
    assert_eq!(result.tool_calls[0].name, "search");
    assert_eq!(result.tool_calls[0].input, json!({"q": "rust"}));
}

#[tokio::test]
async fn test_openai_non_streaming_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-123",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello there!"},
                "finish_reason": "length"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 12, "total_tokens": 21}
        })))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("OpenAI", server.uri(), Some("k".into()));
    let result = completed(run_turn(&backend, request(false)).await);

    assert_eq!(result.content, "Hello there!");
    assert_eq!(result.output_tokens, 12);
    assert_eq!(result.stop_reason, Some(StopReason::MaxTokens));
}

#[tokio::test]
async fn test_openai_invalid_key_maps_to_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"message": "Incorrect API key", "type": "invalid_request_error", "code": "invalid_api_key"}
        })))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("OpenAI", server.uri(), Some("bad".into()));
    let outcome = run_turn(&backend, request(true)).await;

    assert!(matches!(
        outcome.error(),
        Some(PalaverError::Api(ApiError::AuthenticationFailed))
    ));
    assert!(outcome.result().is_blank());
}

#[tokio::test]
async fn test_azure_uses_api_key_header_and_version() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(query_param("api-version", "2024-10-21"))
        .and(header("api-key", "az-key"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"id": "a", "choices": [{"index": 0, "delta": {"content": "ok"}, "finish_reason": "stop"}]}),
        ])))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("Azure", server.uri(), Some("az-key".into()))
        .azure("2024-10-21");
    let result = completed(run_turn(&backend, request(true)).await);
    assert_eq!(result.content, "ok");
}

#[tokio::test]
async fn test_lmstudio_without_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"id": "l", "choices": [{"index": 0, "delta": {"content": "<think>plan</think>local"}, "finish_reason": "stop"}]}),
        ])))
        .mount(&server)
        .await;

    let backend = OpenAiCompatibleBackend::new("LMStudio", server.uri(), None).without_api_key();
    assert!(backend.is_ready());
    let result = completed(run_turn(&backend, request(true)).await);

    let (reply, reasoning) = palaver::chat::split_reasoning(&result.content, &result.reasoning);
    assert_eq!(reply, "local");
    assert_eq!(reasoning, "plan");
}

// ==================== Anthropic ====================

#[tokio::test]
async fn test_anthropic_streams_thinking_and_text() {
    let server = MockServer::start().await;
    let frames = [
        ("message_start", json!({"type": "message_start", "message": {"id": "msg_1", "model": "claude", "usage": {"input_tokens": 25, "output_tokens": 1}}})),
        ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "thinking", "thinking": ""}})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "thinking_delta", "thinking": "Let me think."}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
        ("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "text", "text": ""}})),
        ("ping", json!({"type": "ping"})),
        ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "text_delta", "text": "Hi!"}})),
        ("content_block_stop", json!({"type": "content_block_stop", "index": 1})),
        ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 15}})),
        ("message_stop", json!({"type": "message_stop"})),
    ];
    let body: String = frames
        .iter()
        .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
        .collect();

    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let backend = AnthropicBackend::with_base_url(Some("sk-ant".into()), server.uri());
    let result = completed(run_turn(&backend, request(true)).await);

    assert_eq!(result.reasoning, "Let me think.");
    assert_eq!(result.content, "Hi!");
    assert_eq!(result.input_tokens, 25);
    assert_eq!(result.output_tokens, 15);
}

#[tokio::test]
async fn test_anthropic_in_stream_error_fails_turn() {
    let server = MockServer::start().await;
    let body = concat!(
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Par\"}}\n\n",
        "event: error\ndata: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let backend = AnthropicBackend::with_base_url(Some("k".into()), server.uri());
    let outcome = run_turn(&backend, request(true)).await;

    match outcome {
        TurnOutcome::Failed { error, partial } => {
            assert!(error.to_string().contains("Overloaded"));
            assert_eq!(partial.content, "Par");
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

// ==================== Ollama ====================

#[tokio::test]
async fn test_ollama_ndjson_stream() {
    let server = MockServer::start().await;
    let body = [
        json!({"model": "llama3", "message": {"role": "assistant", "content": "Hel"}, "done": false}),
        json!({"model": "llama3", "message": {"role": "assistant", "content": "lo"}, "done": false}),
        json!({"model": "llama3", "message": {"role": "assistant", "content": ""}, "done": true, "done_reason": "stop", "prompt_eval_count": 7, "eval_count": 3}),
    ]
    .iter()
    .map(|line| format!("{}\n", line))
    .collect::<String>();

    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .and(body_partial_json(json!({
            "model": "test-model",
            "stream": true,
            "options": {"num_predict": 256}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/x-ndjson")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_base_url(server.uri());
    let result = completed(run_turn(&backend, request(true)).await);

    assert_eq!(result.content, "Hello");
    assert_eq!(result.input_tokens, 7);
    assert_eq!(result.output_tokens, 3);
    assert_eq!(result.stop_reason, Some(StopReason::EndTurn));
}

#[tokio::test]
async fn test_ollama_model_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"error": "model \"nope\" not found, try pulling it first"})),
        )
        .mount(&server)
        .await;

    let backend = OllamaBackend::with_base_url(server.uri());
    let outcome = run_turn(&backend, request(true)).await;
    assert!(matches!(
        outcome.error(),
        Some(PalaverError::Api(ApiError::ModelNotFound(_)))
    ));
}

#[tokio::test]
async fn test_ollama_lists_local_models() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [{"name": "llama3:8b"}, {"name": "qwen2.5:7b"}]
        })))
        .mount(&server)
        .await;

    let models = OllamaBackend::with_base_url(server.uri())
        .list_local_models()
        .await
        .unwrap();
    assert_eq!(models, vec!["llama3:8b", "qwen2.5:7b"]);
}

// ==================== Factory dispatch ====================

#[tokio::test]
async fn test_factory_follows_descriptor_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(sse(&[
            json!({"id": "o", "choices": [{"index": 0, "delta": {"content": "via /v1"}, "finish_reason": "stop"}]}),
        ])))
        .mount(&server)
        .await;

    // Ollama's OpenAI-compatible endpoint instead of its native /api/chat.
    let descriptor = ProviderDescriptor::new(
        ProviderKind::Ollama,
        format!("{}/v1", server.uri()),
        WireFormat::OpenAiCompatible,
    )
    .without_api_key();
    let backend = create_backend(&descriptor, &Settings::default());

    assert!(backend.is_ready());
    let result = completed(run_turn(backend.as_ref(), request(true)).await);
    assert_eq!(result.content, "via /v1");
}
