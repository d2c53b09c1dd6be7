pub mod accumulator;
pub mod context;
pub mod providers;
pub mod runtime;
pub mod tools;
pub mod transcription;

pub use accumulator::{ResponseAccumulator, ToolCallRecord};
pub use context::ConversationContext;
pub use providers::{
    AnthropicProvider, ChatMessage, ChatRole, ContentBlock, LlmProvider, LlmRequest, MessagePart,
    ModelRegistry, ModelRoute, OpenAiProvider, ProviderStream, StreamEvent, ToolCallFragment,
    ToolDefinition,
};
pub use runtime::{ChatRuntime, ReplyOutcome, ReplyRequest, ReplySummary, RuntimeSettings};
pub use tools::{Tool, ToolContext, ToolDispatcher, ToolRegistry};
pub use transcription::Transcriber;
