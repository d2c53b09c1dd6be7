use async_trait::async_trait;
use chatrelay_common::{Error, ImageAttachment, Result};
use futures::stream::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use super::sse::data_payloads;
use super::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart, ProviderStream,
    StreamEvent, ToolCallFragment,
};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Messages API adapter. Events are typed via the `type` field of each payload.
pub struct AnthropicProvider {
    api_key: String,
    client: Client,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
        }
    }

    /// Override the API root; requests go to `{base_url}/v1/messages`.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn create_request_body(&self, request: &LlmRequest) -> Value {
        let (system, messages) = split_messages(&request.messages);

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(system) = system {
            body["system"] = json!(system);
        }

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema
                    }))
                    .collect::<Vec<_>>()
            );
        }

        body
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        "anthropic"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream> {
        let body = self.create_request_body(request);

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "Anthropic API error ({status}): {error_text}"
            )));
        }

        let events = data_payloads(response.bytes_stream().boxed()).filter_map(|payload| {
            let event = match payload {
                Ok(data) => match serde_json::from_str::<Value>(&data) {
                    Ok(json) => parse_anthropic_event(&json).map(Ok),
                    Err(e) => {
                        debug!("skipping malformed Anthropic event: {e}");
                        None
                    }
                },
                Err(e) => Some(Err(e)),
            };
            futures::future::ready(event)
        });

        Ok(ProviderStream::new(events.boxed()))
    }
}

/// Lift system messages into the top-level `system` field and convert the rest
/// into Anthropic message objects. Tool results travel as `tool_result` blocks in
/// a user-role message; consecutive messages with the same role are merged.
fn split_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system_parts = Vec::new();
    let mut converted: Vec<(&'static str, Vec<Value>)> = Vec::new();

    for msg in messages {
        let role = match msg.role {
            ChatRole::System => {
                system_parts.push(msg.text());
                continue;
            }
            ChatRole::User | ChatRole::Tool => "user",
            ChatRole::Assistant => "assistant",
        };

        let blocks = content_blocks(&msg.content);
        if blocks.is_empty() {
            continue;
        }

        if let Some((last_role, last_blocks)) = converted.last_mut() {
            if *last_role == role {
                last_blocks.extend(blocks);
                continue;
            }
        }
        converted.push((role, blocks));
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let messages = converted
        .into_iter()
        .map(|(role, content)| json!({ "role": role, "content": content }))
        .collect();

    (system, messages)
}

fn content_blocks(content: &MessagePart) -> Vec<Value> {
    match content {
        MessagePart::Text(text) if text.is_empty() => Vec::new(),
        MessagePart::Text(text) => vec![json!({ "type": "text", "text": text })],
        MessagePart::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentBlock::Text { text } if text.is_empty() => None,
                ContentBlock::Text { text } => Some(json!({ "type": "text", "text": text })),
                ContentBlock::Image { url } => Some(json!({
                    "type": "image",
                    "source": image_source(url)
                })),
                ContentBlock::ToolUse { id, name, input } => Some(json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input
                })),
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                } => Some(json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content
                })),
            })
            .collect(),
    }
}

/// Inline data URLs go as base64 sources; anything else is passed by URL.
fn image_source(url: &str) -> Value {
    match ImageAttachment::from_data_url(url) {
        Some(image) => json!({
            "type": "base64",
            "media_type": image.media_type,
            "data": image.data
        }),
        None => json!({ "type": "url", "url": url }),
    }
}

fn parse_anthropic_event(json: &Value) -> Option<StreamEvent> {
    let type_ = json["type"].as_str().unwrap_or_default();
    match type_ {
        "message_start" => {
            let usage = &json["message"]["usage"];
            Some(StreamEvent::Usage {
                prompt_tokens: usage["input_tokens"].as_u64().unwrap_or(0),
                completion_tokens: 0,
            })
        }
        "content_block_start" => {
            let index = json["index"].as_u64().unwrap_or(0) as u32;
            let block = &json["content_block"];
            match block["type"].as_str().unwrap_or_default() {
                "tool_use" => Some(StreamEvent::ToolCallFragment(ToolCallFragment {
                    index,
                    id: block["id"].as_str().map(str::to_string),
                    name: block["name"].as_str().map(str::to_string),
                    arguments: None,
                })),
                "text" => block["text"]
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .map(|t| StreamEvent::TextDelta(t.to_string())),
                _ => None,
            }
        }
        "content_block_delta" => {
            let index = json["index"].as_u64().unwrap_or(0) as u32;
            let delta = &json["delta"];
            match delta["type"].as_str().unwrap_or_default() {
                "text_delta" => Some(StreamEvent::TextDelta(
                    delta["text"].as_str().unwrap_or_default().to_string(),
                )),
                "input_json_delta" => Some(StreamEvent::ToolCallFragment(ToolCallFragment {
                    index,
                    id: None,
                    name: None,
                    arguments: Some(
                        delta["partial_json"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    ),
                })),
                _ => None,
            }
        }
        "message_delta" => json["usage"]["output_tokens"]
            .as_u64()
            .map(|tokens| StreamEvent::Usage {
                prompt_tokens: 0,
                completion_tokens: tokens,
            }),
        "message_stop" => Some(StreamEvent::EndOfStream),
        "error" => Some(StreamEvent::Error(
            json["error"]["message"]
                .as_str()
                .unwrap_or("unknown Anthropic stream error")
                .to_string(),
        )),
        // ping, content_block_stop and future event types
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_start_carries_prompt_usage() {
        let event = parse_anthropic_event(&json!({
            "type": "message_start",
            "message": {"usage": {"input_tokens": 25, "output_tokens": 1}}
        }));
        assert_eq!(
            event,
            Some(StreamEvent::Usage {
                prompt_tokens: 25,
                completion_tokens: 0
            })
        );
    }

    #[test]
    fn message_delta_carries_completion_usage() {
        let event = parse_anthropic_event(&json!({
            "type": "message_delta",
            "delta": {"stop_reason": "end_turn"},
            "usage": {"output_tokens": 15}
        }));
        assert_eq!(
            event,
            Some(StreamEvent::Usage {
                prompt_tokens: 0,
                completion_tokens: 15
            })
        );
    }

    #[test]
    fn tool_use_block_then_json_deltas() {
        let start = parse_anthropic_event(&json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": "toolu_1", "name": "get_memory", "input": {}}
        }));
        assert_eq!(
            start,
            Some(StreamEvent::ToolCallFragment(ToolCallFragment {
                index: 1,
                id: Some("toolu_1".into()),
                name: Some("get_memory".into()),
                arguments: None,
            }))
        );

        let delta = parse_anthropic_event(&json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": {"type": "input_json_delta", "partial_json": "{\"key\":"}
        }));
        assert_eq!(
            delta,
            Some(StreamEvent::ToolCallFragment(ToolCallFragment {
                index: 1,
                id: None,
                name: None,
                arguments: Some("{\"key\":".into()),
            }))
        );
    }

    #[test]
    fn unknown_and_bookkeeping_events_are_ignored() {
        for type_ in ["ping", "content_block_stop", "future_event"] {
            assert_eq!(parse_anthropic_event(&json!({"type": type_, "index": 0})), None);
        }
    }

    #[test]
    fn error_event_becomes_stream_error() {
        let event = parse_anthropic_event(&json!({
            "type": "error",
            "error": {"type": "overloaded_error", "message": "Overloaded"}
        }));
        assert_eq!(event, Some(StreamEvent::Error("Overloaded".into())));
    }

    #[test]
    fn system_lifted_and_tool_results_merged() {
        let messages = vec![
            ChatMessage::system("be brief"),
            ChatMessage::user("remember my cat"),
            ChatMessage {
                role: ChatRole::Assistant,
                content: MessagePart::Parts(vec![
                    ContentBlock::Text { text: String::new() },
                    ContentBlock::ToolUse {
                        id: "t1".into(),
                        name: "save_memory".into(),
                        input: json!({"key": "pet", "content": "cat"}),
                    },
                    ContentBlock::ToolUse {
                        id: "t2".into(),
                        name: "list_memories".into(),
                        input: json!({}),
                    },
                ]),
            },
            ChatMessage::tool_result("t1", "Memory saved: pet = cat"),
            ChatMessage::tool_result("t2", "No memories found for this user"),
        ];

        let (system, converted) = split_messages(&messages);
        assert_eq!(system.as_deref(), Some("be brief"));
        assert_eq!(converted.len(), 3);
        assert_eq!(converted[1]["role"], "assistant");
        assert_eq!(converted[1]["content"].as_array().unwrap().len(), 2);
        assert_eq!(converted[2]["role"], "user");
        let results = converted[2]["content"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["type"], "tool_result");
        assert_eq!(results[1]["tool_use_id"], "t2");
    }

    #[test]
    fn inline_image_becomes_base64_source() {
        let image = ImageAttachment::jpeg("AAAA".into());
        let (_, converted) =
            split_messages(&[ChatMessage::user_with_image("what is this?", &image)]);
        let content = converted[0]["content"].as_array().unwrap();
        assert_eq!(content[0], json!({"type": "text", "text": "what is this?"}));
        assert_eq!(
            content[1],
            json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/jpeg", "data": "AAAA"}
            })
        );
    }

    #[test]
    fn remote_image_is_passed_by_url() {
        assert_eq!(
            image_source("https://example.com/cat.png"),
            json!({"type": "url", "url": "https://example.com/cat.png"})
        );
    }
}
