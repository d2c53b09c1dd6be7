use chatrelay_common::{ImageAttachment, Interaction, Memory, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use crate::accumulator::ToolCallRecord;
use crate::providers::{ChatMessage, ChatRole, ContentBlock, LlmRequest, MessagePart, ToolDefinition};
use crate::tools::memory_context;

/// Build the system preamble sent at the head of every conversation.
pub fn system_preamble(
    assistant_name: &str,
    now: DateTime<Utc>,
    system_prompt: Option<&str>,
    memories: &[Memory],
) -> String {
    let mut preamble = format!(
        "You are a helpful assistant. Your name is {assistant_name}. Today is {}. \
         Give short concise answers.",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    if let Some(prompt) = system_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        preamble.push_str("\n\n");
        preamble.push_str(prompt);
    }

    if let Some(context) = memory_context(memories) {
        preamble.push_str("\n\n");
        preamble.push_str(&context);
    }

    preamble
}

/// Role-tagged message sequence for one reply. Append-only across rounds.
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    messages: Vec<ChatMessage>,
}

impl ConversationContext {
    /// Preamble, then each past interaction as a user/assistant pair, then the new message.
    /// Images attached to past or new user turns travel with them.
    pub fn build(
        preamble: String,
        history: &[Interaction],
        user_text: &str,
        image: Option<&ImageAttachment>,
    ) -> Self {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(ChatMessage::system(preamble));
        for interaction in history {
            messages.push(user_turn(
                &interaction.user_message,
                interaction.user_image.as_ref(),
            ));
            messages.push(ChatMessage::assistant(interaction.assistant_message.clone()));
        }
        messages.push(user_turn(user_text, image));
        Self { messages }
    }

    /// Record a round that ended in tool calls: its visible text plus the calls.
    pub fn push_tool_round(&mut self, text: &str, calls: &[ToolCallRecord]) -> Result<()> {
        let mut blocks = Vec::with_capacity(calls.len() + 1);
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        for call in calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.call_id(),
                name: call.name.clone(),
                input: call.parsed_arguments()?,
            });
        }
        self.messages.push(ChatMessage {
            role: ChatRole::Assistant,
            content: MessagePart::Parts(blocks),
        });
        Ok(())
    }

    pub fn push_tool_result(&mut self, call: &ToolCallRecord, result: String) {
        self.messages
            .push(ChatMessage::tool_result(call.call_id(), result));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Snapshot the context into a provider request.
    pub fn to_request(
        &self,
        model: &str,
        max_tokens: u32,
        tools: Vec<ToolDefinition>,
    ) -> LlmRequest {
        LlmRequest {
            model: model.to_string(),
            messages: self.messages.clone(),
            max_tokens: Some(max_tokens),
            temperature: None,
            tools,
        }
    }
}

fn user_turn(text: &str, image: Option<&ImageAttachment>) -> ChatMessage {
    match image {
        Some(image) => ChatMessage::user_with_image(text, image),
        None => ChatMessage::user(text),
    }
}
