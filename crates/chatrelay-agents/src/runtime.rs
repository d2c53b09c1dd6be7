use std::sync::Arc;
use std::time::Duration;

use chatrelay_common::{Error, ImageAttachment, Interaction, ReplySink, Result, User};
use chatrelay_db::{MemoryRepository, Repository};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::accumulator::ResponseAccumulator;
use crate::context::{ConversationContext, system_preamble};
use crate::providers::{ModelRegistry, ProviderStream, StreamEvent};
use crate::tools::ToolDispatcher;

/// Default cap on provider round-trips for a single reply.
pub const MAX_TOOL_ROUNDS: usize = 10;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub assistant_name: String,
    pub system_prompt: Option<String>,
    pub dialog_timeout: Duration,
    pub max_tool_rounds: usize,
    pub max_tokens: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            assistant_name: "Johnny".to_string(),
            system_prompt: None,
            dialog_timeout: Duration::from_secs(3600),
            max_tool_rounds: MAX_TOOL_ROUNDS,
            max_tokens: 4096,
        }
    }
}

/// One admitted user message to answer.
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub user: User,
    pub user_text: String,
    pub user_message_id: i64,
    /// Photo sent with the message; its caption is `user_text`.
    pub image: Option<ImageAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplySummary {
    /// Visible text of every round, as persisted.
    pub text: String,
    pub rounds: usize,
    pub tool_phases: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    Done(ReplySummary),
    /// Stopped by the user; nothing was persisted.
    Cancelled,
}

enum RoundEnd {
    Finished,
    Cancelled,
}

/// Drives the stream / tool-execution loop for one reply at a time.
pub struct ChatRuntime {
    models: Arc<ModelRegistry>,
    repository: Arc<dyn Repository>,
    tools: Arc<dyn ToolDispatcher>,
    memory: Option<Arc<dyn MemoryRepository>>,
    settings: RuntimeSettings,
}

impl ChatRuntime {
    pub fn new(
        models: Arc<ModelRegistry>,
        repository: Arc<dyn Repository>,
        tools: Arc<dyn ToolDispatcher>,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            models,
            repository,
            tools,
            memory: None,
            settings,
        }
    }

    /// Source of the "what you know about this user" preamble block.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryRepository>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    /// Answer one user message, streaming visible text into `sink`.
    ///
    /// Rounds run strictly in sequence. Usage and the interaction are persisted
    /// only when a round finishes without tool calls; errors and cancellation
    /// leave both untouched.
    #[instrument(
        skip_all,
        fields(user_id = request.user.id, model = %request.user.current_model)
    )]
    pub async fn reply(
        &self,
        request: ReplyRequest,
        sink: &mut dyn ReplySink,
        cancel: &CancellationToken,
    ) -> Result<ReplyOutcome> {
        let ReplyRequest {
            mut user,
            user_text,
            user_message_id,
            image,
        } = request;

        let now = Utc::now();
        if user.dialog_expired(now, self.settings.dialog_timeout) {
            user.start_new_dialog();
            info!(dialog_id = user.current_dialog_id, "dialog timed out, starting a new one");
        }
        user.touch(now);
        self.repository.record_activity(&user)?;

        let route = self.models.resolve(&user.current_model).ok_or_else(|| {
            Error::Agent(format!("model '{}' is not configured", user.current_model))
        })?;

        let history = self.repository.get_dialog_history(&user)?;
        let memories = match &self.memory {
            Some(memory) => memory.list_memories(user.id).unwrap_or_else(|e| {
                warn!("memory lookup failed, continuing without it: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let preamble = system_preamble(
            &self.settings.assistant_name,
            now,
            self.settings.system_prompt.as_deref(),
            &memories,
        );
        let mut context = ConversationContext::build(preamble, &history, &user_text, image.as_ref());

        let tool_defs = self.tools.definitions();
        let max_tokens = route.max_tokens.unwrap_or(self.settings.max_tokens);

        let mut reply_text = String::new();
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut tool_phases = 0usize;

        for round in 1..=self.settings.max_tool_rounds {
            if cancel.is_cancelled() {
                info!(round, "reply cancelled");
                return Ok(ReplyOutcome::Cancelled);
            }

            let request = context.to_request(&route.model_id, max_tokens, tool_defs.clone());
            debug!(round, messages = request.messages.len(), "opening provider stream");
            let mut stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(round, "reply cancelled while opening stream");
                    return Ok(ReplyOutcome::Cancelled);
                }
                opened = route.provider.stream(&request) => opened?,
            };

            let mut acc = ResponseAccumulator::new();
            if let RoundEnd::Cancelled = drain_round(&mut stream, &mut acc, sink, cancel).await? {
                stream.close();
                info!(round, "reply cancelled mid-stream");
                return Ok(ReplyOutcome::Cancelled);
            }
            if let Some(err) = stream.take_err() {
                warn!(round, "provider stream failed: {err}");
                return Err(err);
            }

            input_tokens += acc.input_tokens();
            output_tokens += acc.output_tokens();
            reply_text.push_str(acc.accumulated_text());

            if acc.has_tool_calls() {
                tool_phases += 1;
                context.push_tool_round(acc.accumulated_text(), acc.tool_calls())?;
                for call in acc.tool_calls() {
                    info!(round, tool = %call.name, "executing tool call");
                    let result = self.tools.execute(user.id, call).await?;
                    context.push_tool_result(call, result);
                }
                continue;
            }

            sink.flush().await?;

            self.repository
                .add_usage(user.id, input_tokens, output_tokens)?;
            self.repository.add_interaction(&Interaction {
                author_id: user.id,
                dialog_id: user.current_dialog_id,
                user_message: user_text,
                assistant_message: reply_text.clone(),
                user_message_id,
                user_image: image,
            })?;

            info!(
                rounds = round,
                tool_phases, input_tokens, output_tokens, "reply finished"
            );
            return Ok(ReplyOutcome::Done(ReplySummary {
                text: reply_text,
                rounds: round,
                tool_phases,
                input_tokens,
                output_tokens,
            }));
        }

        Err(Error::Agent(format!(
            "tool loop did not finish within {} rounds",
            self.settings.max_tool_rounds
        )))
    }
}

/// Fold one stream into `acc`, forwarding text deltas to `sink` in order.
async fn drain_round(
    stream: &mut ProviderStream,
    acc: &mut ResponseAccumulator,
    sink: &mut dyn ReplySink,
    cancel: &CancellationToken,
) -> Result<RoundEnd> {
    loop {
        if cancel.is_cancelled() {
            return Ok(RoundEnd::Cancelled);
        }

        let more = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(RoundEnd::Cancelled),
            more = stream.advance() => more,
        };
        if !more {
            return Ok(RoundEnd::Finished);
        }

        let Some(event) = stream.current() else {
            continue;
        };
        acc.add_chunk(event);
        if let StreamEvent::TextDelta(delta) = event {
            if cancel.is_cancelled() {
                return Ok(RoundEnd::Cancelled);
            }
            sink.send_chunk(delta).await?;
        }
    }
}
