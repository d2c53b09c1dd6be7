use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Json, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive};
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::post;
use axum::Router;
use chatrelay_agents::{
    AnthropicProvider, ChatMessage, LlmProvider, LlmRequest, ResponseAccumulator,
};
use chatrelay_common::{Error, Result};
use futures::stream;
use serde_json::{Value, json};
use tokio::sync::oneshot;

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<Value>>>,
}

// Mock server setup
async fn start_mock_server(events: Vec<Value>) -> (SocketAddr, Captured, oneshot::Sender<()>) {
    let (tx, rx) = oneshot::channel::<()>();
    let captured = Captured::default();

    let app = Router::new()
        .route(
            "/v1/messages",
            post({
                let events = events.clone();
                move |state: State<Captured>, headers: HeaderMap, body: Json<Value>| {
                    mock_messages(state, headers, body, events.clone())
                }
            }),
        )
        .with_state(captured.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                rx.await.ok();
            })
            .await
            .unwrap();
    });

    (addr, captured, tx)
}

async fn mock_messages(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
    events: Vec<Value>,
) -> Response {
    if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"type": "error", "error": {"type": "authentication_error", "message": "invalid x-api-key"}})),
        )
            .into_response();
    }

    captured.bodies.lock().unwrap().push(payload);

    let stream = stream::iter(events.into_iter().map(|event| {
        let name = event["type"].as_str().unwrap_or("message").to_string();
        Ok::<_, io::Error>(Event::default().event(name).data(event.to_string()))
    }));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn request() -> LlmRequest {
    LlmRequest {
        model: "claude-3-opus-20240229".to_string(),
        messages: vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user("Hello"),
        ],
        max_tokens: Some(100),
        temperature: None,
        tools: vec![],
    }
}

fn text_reply_events() -> Vec<Value> {
    vec![
        json!({
            "type": "message_start",
            "message": {
                "id": "msg_123",
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": "claude-3-opus-20240229",
                "usage": {"input_tokens": 10, "output_tokens": 1}
            }
        }),
        json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
        json!({"type": "ping"}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Hello"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": " there"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn", "stop_sequence": null},
            "usage": {"output_tokens": 5}
        }),
        json!({"type": "message_stop"}),
    ]
}

#[tokio::test]
async fn test_anthropic_stream_text_and_usage() -> Result<()> {
    let (addr, captured, _shutdown_tx) = start_mock_server(text_reply_events()).await;
    let provider =
        AnthropicProvider::new("test-key".to_string()).with_base_url(format!("http://{addr}"));

    let mut stream = provider.stream(&request()).await?;
    let mut acc = ResponseAccumulator::new();
    while stream.advance().await {
        acc.add_chunk(stream.current().unwrap());
    }

    assert!(stream.err().is_none());
    assert_eq!(acc.accumulated_text(), "Hello there");
    assert_eq!(acc.input_tokens(), 10);
    assert_eq!(acc.output_tokens(), 5);

    let bodies = captured.bodies.lock().unwrap();
    assert_eq!(bodies[0]["system"], "You are a helpful assistant.");
    assert_eq!(bodies[0]["stream"], true);
    let messages = bodies[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");

    Ok(())
}

#[tokio::test]
async fn test_anthropic_stream_tool_use() -> Result<()> {
    let events = vec![
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 30, "output_tokens": 1}}}),
        json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": {"type": "tool_use", "id": "toolu_01", "name": "save_memory", "input": {}}
        }),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "{\"key\": \"ci"}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "input_json_delta", "partial_json": "ty\", \"content\": \"Oslo\"}"}}),
        json!({"type": "content_block_stop", "index": 0}),
        json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 12}}),
        json!({"type": "message_stop"}),
    ];
    let (addr, _captured, _shutdown_tx) = start_mock_server(events).await;
    let provider =
        AnthropicProvider::new("test-key".to_string()).with_base_url(format!("http://{addr}"));

    let mut stream = provider.stream(&request()).await?;
    let mut acc = ResponseAccumulator::new();
    while stream.advance().await {
        acc.add_chunk(stream.current().unwrap());
    }

    let calls = acc.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "toolu_01");
    assert_eq!(
        calls[0].parsed_arguments()?,
        json!({"key": "city", "content": "Oslo"})
    );
    assert_eq!(acc.output_tokens(), 12);

    Ok(())
}

#[tokio::test]
async fn test_anthropic_error_event_fails_stream() -> Result<()> {
    let events = vec![
        json!({"type": "message_start", "message": {"usage": {"input_tokens": 3}}}),
        json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Par"}}),
        json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
    ];
    let (addr, _captured, _shutdown_tx) = start_mock_server(events).await;
    let provider =
        AnthropicProvider::new("test-key".to_string()).with_base_url(format!("http://{addr}"));

    let mut stream = provider.stream(&request()).await?;
    let mut acc = ResponseAccumulator::new();
    while stream.advance().await {
        acc.add_chunk(stream.current().unwrap());
    }

    assert_eq!(acc.accumulated_text(), "Par");
    assert!(stream.is_closed());
    match stream.take_err() {
        Some(Error::ProviderStream(msg)) => assert_eq!(msg, "Overloaded"),
        other => panic!("expected ProviderStream error, got {other:?}"),
    }

    Ok(())
}

#[tokio::test]
async fn test_anthropic_rejects_bad_key_at_open() {
    let (addr, _captured, _shutdown_tx) = start_mock_server(text_reply_events()).await;
    let provider =
        AnthropicProvider::new("wrong".to_string()).with_base_url(format!("http://{addr}"));

    match provider.stream(&request()).await {
        Err(Error::Agent(msg)) => assert!(msg.contains("invalid x-api-key")),
        Err(other) => panic!("expected Agent error, got {other}"),
        Ok(_) => panic!("expected an error"),
    }
}
