use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chatrelay_agents::{ChatRuntime, ReplyOutcome, ReplyRequest, Transcriber};
use chatrelay_channels::{
    ChatTransport, IncomingContent, IncomingMessage, MessageShaper, Recipient, ShaperLimits,
    UpdateHandler, repair_markup,
};
use chatrelay_common::{Error, ImageAttachment, NewUser, Result, User};
use chatrelay_db::Repository;
use chatrelay_security::Allowlist;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::admission::AdmissionController;

pub const NOT_REGISTERED: &str = "You are not registered. Please contact the administrator.";
pub const PLEASE_WAIT: &str = "Please wait for the response from the bot.";
pub const GREETING: &str = "Hello! I'm a bot that can talk to you. Just send me a voice message or text and I will respond to you.";
pub const PROVIDE_CAPTION: &str = "Provide image caption";
pub const TRANSCRIPTION_FAILED: &str = "Failed to transcribe voice message";
pub const VOICE_UNAVAILABLE: &str = "Voice messages are not supported by this bot.";

/// Container name the transcription backend sees for Telegram voice notes.
const VOICE_FILE_NAME: &str = "voice.ogg";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Cancel,
    NewChat,
    CurrentModel,
    ChangeModel(Option<&'a str>),
    Models,
    Retry,
    Text(&'a str),
    Photo {
        file_id: &'a str,
        caption: Option<&'a str>,
    },
    Voice {
        file_id: &'a str,
    },
}

impl<'a> Command<'a> {
    fn from_content(content: &'a IncomingContent) -> Self {
        match content {
            IncomingContent::Text(text) => Command::parse(text),
            IncomingContent::Photo { file_id, caption } => Command::Photo {
                file_id,
                caption: caption.as_deref(),
            },
            IncomingContent::Voice { file_id } => Command::Voice { file_id },
        }
    }

    fn parse(text: &'a str) -> Self {
        let trimmed = text.trim();
        let Some(rest) = trimmed.strip_prefix('/') else {
            return Command::Text(text);
        };
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // Group chats address commands as /cmd@botname.
        let name = head.split('@').next().unwrap_or(head);

        match name {
            "start" => Command::Start,
            "cancel" => Command::Cancel,
            "new_chat" | "reset" => Command::NewChat,
            "current_model" => Command::CurrentModel,
            "change_model" => Command::ChangeModel(args.split_whitespace().next()),
            "models" => Command::Models,
            "retry" => Command::Retry,
            _ => Command::Text(text),
        }
    }
}

/// Routes inbound messages: authentication, admission, commands and replies.
pub struct BotHandler {
    runtime: Arc<ChatRuntime>,
    repository: Arc<dyn Repository>,
    admission: Arc<AdmissionController>,
    allowlist: Allowlist,
    default_model: String,
    limits: ShaperLimits,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl BotHandler {
    pub fn new(
        runtime: Arc<ChatRuntime>,
        repository: Arc<dyn Repository>,
        admission: Arc<AdmissionController>,
        allowlist: Allowlist,
        default_model: String,
        limits: ShaperLimits,
    ) -> Self {
        Self {
            runtime,
            repository,
            admission,
            allowlist,
            default_model,
            limits,
            transcriber: None,
        }
    }

    /// Enable voice messages: they are transcribed, echoed back, then answered.
    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    /// Load the sender, registering them on first contact.
    fn authenticate(&self, message: &IncomingMessage) -> Result<User> {
        if let Some(user) = self.repository.get_user(message.user_id)? {
            return Ok(user);
        }

        let active = self.allowlist.is_allowed(message.user_id);
        info!(user_id = message.user_id, active, "registering new user");
        self.repository.register_user(&NewUser {
            id: message.user_id,
            first_name: message.first_name.clone(),
            last_name: message.last_name.clone(),
            username: message.username.clone(),
            chat_id: message.chat_id,
            active,
            current_model: self.default_model.clone(),
        })
    }

    async fn dispatch(
        &self,
        transport: Arc<dyn ChatTransport>,
        message: &IncomingMessage,
        mut user: User,
        command: Command<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let chat = Recipient::chat(message.chat_id);
        match command {
            Command::Start => {
                transport.send_message(&chat, GREETING, false).await?;
            }
            Command::NewChat => {
                user.start_new_dialog();
                self.repository.update_user(&user)?;
                transport
                    .send_message(&chat, "New dialog started", false)
                    .await?;
            }
            Command::CurrentModel => {
                let text = format!("Current model is {}", user.current_model);
                transport.send_message(&chat, &text, false).await?;
            }
            Command::ChangeModel(Some(model_id)) => {
                if !self.runtime.models().contains(model_id) {
                    transport.send_message(&chat, "Model not found", false).await?;
                    return Ok(());
                }
                user.current_model = model_id.to_string();
                self.repository.update_user(&user)?;
                let text = format!("Model changed to {model_id}");
                transport.send_message(&chat, &text, false).await?;
            }
            Command::ChangeModel(None) | Command::Models => {
                let text = self.model_list(&user);
                transport.send_message(&chat, &text, false).await?;
            }
            Command::Retry => match self.repository.pop_latest_interaction(&user)? {
                Some(last) => {
                    debug!(user_id = user.id, "retrying last interaction");
                    let recipient = Recipient::replying_to(message.chat_id, last.user_message_id);
                    self.run_reply(
                        transport,
                        recipient,
                        ReplyRequest {
                            user,
                            user_text: last.user_message,
                            user_message_id: last.user_message_id,
                            image: last.user_image,
                        },
                        cancel,
                    )
                    .await?;
                }
                None => {
                    transport
                        .send_message(&chat, "No messages found", false)
                        .await?;
                }
            },
            Command::Text(text) => {
                self.run_reply(
                    transport,
                    message.reply_recipient(),
                    ReplyRequest {
                        user,
                        user_text: text.to_string(),
                        user_message_id: message.message_id,
                        image: None,
                    },
                    cancel,
                )
                .await?;
            }
            Command::Photo { file_id, caption } => {
                let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
                    transport.send_message(&chat, PROVIDE_CAPTION, false).await?;
                    return Ok(());
                };
                let bytes = transport.download_file(file_id).await?;
                debug!(bytes = bytes.len(), "photo downloaded");
                self.run_reply(
                    transport,
                    message.reply_recipient(),
                    ReplyRequest {
                        user,
                        user_text: caption.to_string(),
                        user_message_id: message.message_id,
                        image: Some(ImageAttachment::jpeg(BASE64.encode(bytes))),
                    },
                    cancel,
                )
                .await?;
            }
            Command::Voice { file_id } => {
                let Some(text) = self
                    .transcribe_voice(transport.as_ref(), message, file_id, cancel)
                    .await?
                else {
                    return Ok(());
                };
                self.run_reply(
                    transport,
                    message.reply_recipient(),
                    ReplyRequest {
                        user,
                        user_text: text,
                        user_message_id: message.message_id,
                        image: None,
                    },
                    cancel,
                )
                .await?;
            }
            Command::Cancel => {}
        }
        Ok(())
    }

    /// Transcribe a voice note and echo the transcription back.
    /// Returns None when the user was already told why nothing follows.
    async fn transcribe_voice(
        &self,
        transport: &dyn ChatTransport,
        message: &IncomingMessage,
        file_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let recipient = message.reply_recipient();
        let Some(transcriber) = &self.transcriber else {
            transport
                .send_message(&recipient, VOICE_UNAVAILABLE, false)
                .await?;
            return Ok(None);
        };

        let audio = transport.download_file(file_id).await?;
        let transcribed = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("voice transcription cancelled by user");
                return Ok(None);
            }
            transcribed = transcriber.transcribe(audio, VOICE_FILE_NAME) => transcribed,
        };
        let text = match transcribed {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => {
                warn!("voice transcription came back empty");
                transport
                    .send_message(&recipient, TRANSCRIPTION_FAILED, false)
                    .await?;
                return Ok(None);
            }
            Err(e) => {
                error!("voice transcription failed: {e}");
                transport
                    .send_message(&recipient, TRANSCRIPTION_FAILED, false)
                    .await?;
                return Ok(None);
            }
        };

        let echo = repair_markup(&format!("Transcription: _{text}_"));
        if let Err(e) = transport.send_message(&recipient, &echo, true).await {
            debug!("formatted transcription rejected, sending plain: {e}");
            let plain = format!("Transcription: {text}");
            transport.send_message(&recipient, &plain, false).await?;
        }
        Ok(Some(text))
    }

    async fn run_reply(
        &self,
        transport: Arc<dyn ChatTransport>,
        recipient: Recipient,
        request: ReplyRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        transport.notify_typing(&recipient).await;
        let mut shaper = MessageShaper::new(transport, recipient, self.limits);
        match self.runtime.reply(request, &mut shaper, cancel).await? {
            ReplyOutcome::Done(summary) => debug!(
                rounds = summary.rounds,
                messages =
                    shaper.closed_messages().len() + usize::from(shaper.current_message().is_some()),
                "reply delivered"
            ),
            ReplyOutcome::Cancelled => info!("reply cancelled by user"),
        }
        Ok(())
    }

    fn model_list(&self, user: &User) -> String {
        let mut text = String::from("Available models:\n");
        for route in self.runtime.models().routes() {
            let marker = if route.model_id == user.current_model {
                " (current)"
            } else {
                ""
            };
            text.push_str(&format!("- {} - {}{marker}\n", route.model_id, route.name));
        }
        text.push_str("\nUse /change_model <id> to switch.");
        text
    }
}

#[async_trait]
impl UpdateHandler for BotHandler {
    #[instrument(
        skip_all,
        fields(user_id = message.user_id, chat_id = message.chat_id, kind = message.content.kind())
    )]
    async fn on_message(&self, transport: Arc<dyn ChatTransport>, message: IncomingMessage) {
        let chat = Recipient::chat(message.chat_id);

        let user = match self.authenticate(&message) {
            Ok(user) => user,
            Err(e) => {
                error!("failed to authenticate user: {e}");
                return;
            }
        };
        if !user.active {
            if let Err(e) = transport.send_message(&chat, NOT_REGISTERED, false).await {
                debug!("failed to send registration notice: {e}");
            }
            return;
        }

        let command = Command::from_content(&message.content);
        if command == Command::Cancel {
            let cancelled = self.admission.cancel(user.id);
            debug!(cancelled, "cancel requested");
            return;
        }

        let Some(mut permit) = self.admission.try_acquire(user.id) else {
            debug!("request rejected, another one is in flight");
            if let Err(e) = transport.send_message(&chat, PLEASE_WAIT, false).await {
                debug!("failed to send wait notice: {e}");
            }
            return;
        };
        let cancel = permit.cancellation_token();

        let result = self
            .dispatch(Arc::clone(&transport), &message, user, command, &cancel)
            .await;
        drop(permit);

        if let Err(e) = result {
            error!("request failed: {e}");
            // The shaper already told the user when delivery itself broke.
            if !matches!(e, Error::Delivery(_)) {
                let notice = format!("Sorry, an error occurred: {e}");
                if let Err(e) = transport.send_message(&chat, &notice, false).await {
                    debug!("failed to send error notice: {e}");
                }
            }
        }
    }
}
