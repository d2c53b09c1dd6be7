use async_trait::async_trait;
use chatrelay_common::{Error, ImageAttachment, Result};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};

pub mod anthropic;
pub mod openai;
pub mod registry;
mod sse;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use registry::{ModelRegistry, ModelRoute};

/// Trait for streaming LLM vendors (OpenAI, Anthropic).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g. "anthropic", "openai").
    fn provider_id(&self) -> &str;

    /// Open a streaming completion. HTTP-level failures surface here as `Error::Agent`;
    /// failures after the stream is open surface through [`ProviderStream::err`].
    async fn stream(&self, request: &LlmRequest) -> Result<ProviderStream>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    /// Full conversation, including the system preamble as a `System` message.
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessagePart,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: MessagePart::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: MessagePart::Text(text.into()),
        }
    }

    /// User turn carrying text plus an inline image.
    pub fn user_with_image(text: impl Into<String>, image: &ImageAttachment) -> Self {
        Self {
            role: ChatRole::User,
            content: MessagePart::Parts(vec![
                ContentBlock::Text { text: text.into() },
                ContentBlock::Image {
                    url: image.data_url(),
                },
            ]),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: MessagePart::Text(text.into()),
        }
    }

    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: MessagePart::Parts(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                content: content.into(),
            }]),
        }
    }

    /// Concatenated text blocks, ignoring tool and image blocks.
    pub fn text(&self) -> String {
        match &self.content {
            MessagePart::Text(text) => text.clone(),
            MessagePart::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessagePart {
    Text(String),
    Parts(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    /// An image by URL; inline images use the `data:` scheme.
    #[serde(rename = "image")]
    Image { url: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// One piece of a tool call. Fragments sharing `index` belong to the same call;
/// `id` and `name` usually arrive only on the first fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Vendor-neutral unit of incremental provider output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    TextDelta(String),
    ToolCallFragment(ToolCallFragment),
    Usage {
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    EndOfStream,
    Error(String),
}

pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Cursor over a provider's normalized events.
///
/// `advance` returns false at end of stream or on error; in both cases the
/// underlying connection has already been dropped. A stream that ends without
/// an explicit end marker counts as a clean end.
pub struct ProviderStream {
    inner: Option<EventStream>,
    current: Option<StreamEvent>,
    err: Option<Error>,
}

impl ProviderStream {
    pub fn new(inner: EventStream) -> Self {
        Self {
            inner: Some(inner),
            current: None,
            err: None,
        }
    }

    /// Stream over a fixed list of events, used by scripted providers.
    pub fn from_events(events: Vec<Result<StreamEvent>>) -> Self {
        Self::new(stream::iter(events).boxed())
    }

    pub async fn advance(&mut self) -> bool {
        let Some(inner) = self.inner.as_mut() else {
            return false;
        };

        match inner.next().await {
            Some(Ok(StreamEvent::EndOfStream)) | None => {
                self.current = None;
                self.close();
                false
            }
            Some(Ok(StreamEvent::Error(cause))) => {
                self.current = None;
                self.err = Some(Error::ProviderStream(cause));
                self.close();
                false
            }
            Some(Ok(event)) => {
                self.current = Some(event);
                true
            }
            Some(Err(e)) => {
                self.current = None;
                self.err = Some(e);
                self.close();
                false
            }
        }
    }

    pub fn current(&self) -> Option<&StreamEvent> {
        self.current.as_ref()
    }

    pub fn err(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    pub fn take_err(&mut self) -> Option<Error> {
        self.err.take()
    }

    /// Drop the underlying connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}
