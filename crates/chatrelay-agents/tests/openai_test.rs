use chatrelay_agents::{
    ChatMessage, LlmProvider, LlmRequest, OpenAiProvider, ResponseAccumulator, StreamEvent,
    ToolDefinition, Transcriber,
};
use chatrelay_common::Error;
use serde_json::json;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request(text: &str) -> LlmRequest {
    LlmRequest {
        model: "gpt-4o".to_string(),
        messages: vec![
            ChatMessage::system("You are a helpful assistant."),
            ChatMessage::user(text),
        ],
        max_tokens: Some(256),
        temperature: None,
        tools: vec![],
    }
}

fn sse_body(chunks: &[serde_json::Value]) -> String {
    let mut body = String::new();
    for chunk in chunks {
        body.push_str(&format!("data: {chunk}\n\n"));
    }
    body.push_str("data: [DONE]\n\n");
    body
}

#[tokio::test]
async fn test_openai_stream_text_and_usage() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"role": "assistant", "content": "Hello"}, "finish_reason": null}]
        }),
        json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": " World"}, "finish_reason": null}]
        }),
        json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
        }),
        json!({
            "id": "chatcmpl-1",
            "choices": [],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": [{"role": "system"}, {"role": "user", "content": "Hi"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let mut stream = provider.stream(&request("Hi")).await.unwrap();

    let mut acc = ResponseAccumulator::new();
    while stream.advance().await {
        acc.add_chunk(stream.current().unwrap());
    }

    assert!(stream.err().is_none());
    assert!(stream.is_closed());
    assert_eq!(acc.accumulated_text(), "Hello World");
    assert_eq!(acc.input_tokens(), 5);
    assert_eq!(acc.output_tokens(), 7);
    assert!(!acc.has_tool_calls());
}

#[tokio::test]
async fn test_openai_stream_reassembles_tool_call() {
    let mock_server = MockServer::start().await;

    let body = sse_body(&[
        json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "id": "call_abc", "type": "function",
                "function": {"name": "save_memory", "arguments": ""}
            }]}}]
        }),
        json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "{\"key\":\"na"}
            }]}}]
        }),
        json!({
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "me\",\"content\":\"Bob\"}"}
            }]}}]
        }),
        json!({"choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
    ]);

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let mut req = request("My name is Bob");
    req.tools = vec![ToolDefinition {
        name: "save_memory".to_string(),
        description: "Remember a fact".to_string(),
        input_schema: json!({"type": "object", "properties": {}}),
    }];
    let mut stream = provider.stream(&req).await.unwrap();

    let mut acc = ResponseAccumulator::new();
    while stream.advance().await {
        acc.add_chunk(stream.current().unwrap());
    }

    let calls = acc.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_abc");
    assert_eq!(calls[0].name, "save_memory");
    assert_eq!(
        calls[0].parsed_arguments().unwrap(),
        json!({"key": "name", "content": "Bob"})
    );
}

#[tokio::test]
async fn test_openai_http_error_at_open() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("bad-key".to_string(), Some(mock_server.uri()));
    match provider.stream(&request("Hi")).await {
        Err(Error::Agent(msg)) => {
            assert!(msg.contains("401"));
            assert!(msg.contains("invalid api key"));
        }
        Err(other) => panic!("expected Agent error, got {other}"),
        Ok(_) => panic!("expected an error"),
    }
}

#[tokio::test]
async fn test_openai_stream_without_done_marker_ends_cleanly() {
    let mock_server = MockServer::start().await;

    let body = format!(
        "data: {}\n\n",
        json!({"choices": [{"index": 0, "delta": {"content": "cut"}}]})
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let mut stream = provider.stream(&request("Hi")).await.unwrap();

    assert!(stream.advance().await);
    assert_eq!(
        stream.current(),
        Some(&StreamEvent::TextDelta("cut".to_string()))
    );
    assert!(!stream.advance().await);
    assert!(stream.err().is_none());
}

#[tokio::test]
async fn test_openai_transcribes_voice_upload() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_string_contains("whisper-1"))
        .and(body_string_contains("filename=\"voice.ogg\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello there"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let text = provider
        .transcribe(b"OggS fake audio".to_vec(), "voice.ogg")
        .await
        .unwrap();

    assert_eq!(text, "hello there");
}

#[tokio::test]
async fn test_openai_transcription_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/audio/transcriptions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unsupported format"))
        .mount(&mock_server)
        .await;

    let provider = OpenAiProvider::new("test-key".to_string(), Some(mock_server.uri()));
    let err = provider
        .transcribe(b"not audio".to_vec(), "voice.ogg")
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Agent(ref m) if m.contains("400") && m.contains("unsupported format")));
}
