use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::sse::data_payloads;
use super::{
    ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart, ProviderStream,
    StreamEvent, ToolCallFragment,
};
use crate::transcription::Transcriber;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Chat Completions adapter. Each `data:` line carries one JSON chunk.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn convert_request(&self, request: &LlmRequest) -> Result<OpenAiRequest> {
        let messages = request
            .messages
            .iter()
            .map(convert_message)
            .collect::<Result<Vec<_>>>()?;

        let tools = if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|t| OpenAiTool {
                        kind: "function".to_string(),
                        function: OpenAiFunctionDefinition {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.input_schema.clone(),
                        },
                    })
                    .collect(),
            )
        };

        Ok(OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            stream: true,
            stream_options: OpenAiStreamOptions {
                include_usage: true,
            },
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.convert_request(request)?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error ({status}): {error_text}"
            )));
        }

        let events = data_payloads(response.bytes_stream().boxed()).flat_map(|payload| {
            let events: Vec<Result<StreamEvent>> = match payload {
                Ok(data) => parse_chunk(&data).into_iter().map(Ok).collect(),
                Err(e) => vec![Err(e)],
            };
            stream::iter(events)
        });

        Ok(ProviderStream::new(events.boxed()))
    }
}

fn convert_message(msg: &ChatMessage) -> Result<OpenAiMessage> {
    match msg.role {
        ChatRole::System => Ok(OpenAiMessage::System {
            content: msg.text(),
        }),
        ChatRole::User => Ok(OpenAiMessage::User {
            content: user_content(msg),
        }),
        ChatRole::Assistant => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            match &msg.content {
                MessagePart::Text(text) => text_parts.push(text.clone()),
                MessagePart::Parts(parts) => {
                    for part in parts {
                        match part {
                            ContentBlock::Text { text } => text_parts.push(text.clone()),
                            ContentBlock::ToolUse { id, name, input } => {
                                tool_calls.push(OpenAiToolCall {
                                    id: id.clone(),
                                    kind: "function".to_string(),
                                    function: OpenAiFunctionCall {
                                        name: name.clone(),
                                        arguments: serde_json::to_string(input)?,
                                    },
                                });
                            }
                            ContentBlock::Image { .. } | ContentBlock::ToolResult { .. } => {}
                        }
                    }
                }
            }

            let text = text_parts.join("\n");
            Ok(OpenAiMessage::Assistant {
                content: if text.is_empty() { None } else { Some(text) },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            })
        }
        ChatRole::Tool => {
            let MessagePart::Parts(parts) = &msg.content else {
                return Err(Error::Agent(
                    "tool message must carry a tool_result block".to_string(),
                ));
            };
            parts
                .iter()
                .find_map(|p| match p {
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                    } => Some(OpenAiMessage::Tool {
                        tool_call_id: tool_use_id.clone(),
                        content: content.clone(),
                    }),
                    _ => None,
                })
                .ok_or_else(|| Error::Agent("tool message missing tool_result".to_string()))
        }
    }
}

/// Plain string unless the turn carries an image, which needs the parts form.
fn user_content(msg: &ChatMessage) -> OpenAiUserContent {
    let parts = match &msg.content {
        MessagePart::Parts(parts) if parts.iter().any(|p| matches!(p, ContentBlock::Image { .. })) => {
            parts
        }
        _ => return OpenAiUserContent::Text(msg.text()),
    };

    OpenAiUserContent::Parts(
        parts
            .iter()
            .filter_map(|part| match part {
                ContentBlock::Text { text } => Some(OpenAiContentPart::Text { text: text.clone() }),
                ContentBlock::Image { url } => Some(OpenAiContentPart::ImageUrl {
                    image_url: OpenAiImageUrl {
                        url: url.clone(),
                        detail: "low",
                    },
                }),
                _ => None,
            })
            .collect(),
    )
}

#[async_trait]
impl Transcriber for OpenAiProvider {
    #[instrument(skip(self, audio), fields(bytes = audio.len()))]
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String> {
        let url = format!("{}/audio/transcriptions", self.base_url);
        let form = Form::new()
            .text("model", TRANSCRIPTION_MODEL)
            .part("file", Part::bytes(audio).file_name(file_name.to_string()));

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI transcription request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI transcription error ({status}): {error_text}"
            )));
        }

        let body: OpenAiTranscription = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("invalid transcription response: {e}")))?;
        debug!(chars = body.text.chars().count(), "voice message transcribed");
        Ok(body.text)
    }
}

/// Map one `data:` payload to normalized events. Malformed chunks are dropped.
fn parse_chunk(data: &str) -> Vec<StreamEvent> {
    if data.trim() == "[DONE]" {
        return vec![StreamEvent::EndOfStream];
    }

    let chunk: OpenAiStreamChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("skipping malformed OpenAI chunk: {e}");
            return Vec::new();
        }
    };

    if let Some(error) = chunk.error {
        return vec![StreamEvent::Error(error.message)];
    }

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(StreamEvent::TextDelta(content));
            }
        }

        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            events.push(StreamEvent::ToolCallFragment(ToolCallFragment {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }));
        }
    }

    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
        });
    }

    events
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    stream_options: OpenAiStreamOptions,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System {
        content: String,
    },
    User {
        content: OpenAiUserContent,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<OpenAiToolCall>>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Serialize)]
#[serde(untagged)]
enum OpenAiUserContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiContentPart {
    Text { text: String },
    ImageUrl { image_url: OpenAiImageUrl },
}

#[derive(Serialize)]
struct OpenAiImageUrl {
    url: String,
    detail: &'static str,
}

#[derive(Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionCall,
}

#[derive(Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: String,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
    error: Option<OpenAiError>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiError {
    message: String,
}

#[derive(Deserialize)]
struct OpenAiTranscription {
    text: String,
}
