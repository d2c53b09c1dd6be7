use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use teloxide::dispatching::UpdateFilterExt;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, MessageId, ParseMode, ReplyParameters};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::traits::{
    ChannelLifecycle, ChannelStatus, ChatTransport, IncomingContent, IncomingMessage,
    MessageHandle, Recipient, UpdateHandler,
};

/// [`ChatTransport`] over the Telegram Bot API.
///
/// Formatted messages use the legacy Markdown parse mode, whose markers are
/// the ones balanced by [`crate::repair_markup`].
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn message_id(id: i64) -> Result<MessageId> {
    i32::try_from(id)
        .map(MessageId)
        .map_err(|_| Error::Channel(format!("telegram message id out of range: {id}")))
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    #[allow(deprecated)]
    async fn send_message(
        &self,
        recipient: &Recipient,
        text: &str,
        formatted: bool,
    ) -> Result<MessageHandle> {
        let mut request = self.bot.send_message(ChatId(recipient.chat_id), text);
        if formatted {
            request = request.parse_mode(ParseMode::Markdown);
        }
        if let Some(reply_to) = recipient.reply_to {
            request = request.reply_parameters(
                ReplyParameters::new(message_id(reply_to)?).allow_sending_without_reply(),
            );
        }

        let sent = request
            .await
            .map_err(|e| Error::Channel(format!("telegram send failed: {e}")))?;
        Ok(MessageHandle {
            chat_id: recipient.chat_id,
            message_id: i64::from(sent.id.0),
        })
    }

    #[allow(deprecated)]
    async fn edit_message(
        &self,
        handle: &MessageHandle,
        text: &str,
        formatted: bool,
    ) -> Result<()> {
        let mut request =
            self.bot
                .edit_message_text(ChatId(handle.chat_id), message_id(handle.message_id)?, text);
        if formatted {
            request = request.parse_mode(ParseMode::Markdown);
        }
        request
            .await
            .map_err(|e| Error::Channel(format!("telegram edit failed: {e}")))?;
        Ok(())
    }

    async fn notify_typing(&self, recipient: &Recipient) {
        if let Err(e) = self
            .bot
            .send_chat_action(ChatId(recipient.chat_id), ChatAction::Typing)
            .await
        {
            debug!("telegram typing indicator failed: {e}");
        }
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| Error::Channel(format!("telegram get_file failed: {e}")))?;

        let mut bytes = Vec::with_capacity(file.meta.size as usize);
        self.bot
            .download_file(&file.path, &mut bytes)
            .await
            .map_err(|e| Error::Channel(format!("telegram download failed: {e}")))?;
        debug!(file_id, bytes = bytes.len(), "telegram file downloaded");
        Ok(bytes)
    }
}

/// Long-polling Telegram bot that hands user messages to an [`UpdateHandler`].
pub struct TelegramChannel {
    bot_token: String,
    display: String,
    status: ChannelStatus,
    handler: Arc<dyn UpdateHandler>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl TelegramChannel {
    pub fn new(bot_token: String, handler: Arc<dyn UpdateHandler>) -> Self {
        Self {
            bot_token,
            display: "Telegram".to_string(),
            status: ChannelStatus::Disconnected,
            handler,
            shutdown_tx: None,
            task: None,
        }
    }
}

/// Text, the largest size of a photo with its caption, or a voice note.
fn incoming_content(msg: &Message) -> Option<IncomingContent> {
    if let Some(text) = msg.text() {
        return Some(IncomingContent::Text(text.to_string()));
    }
    if let Some(sizes) = msg.photo() {
        let largest = sizes.iter().max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        return Some(IncomingContent::Photo {
            file_id: largest.file.id.0.clone(),
            caption: msg.caption().map(str::to_string),
        });
    }
    msg.voice().map(|voice| IncomingContent::Voice {
        file_id: voice.file.id.0.clone(),
    })
}

/// Convert a Telegram message into an [`IncomingMessage`].
/// Returns None for updates that should be ignored (no sender, bots, other media).
fn incoming_message(msg: &Message) -> Option<IncomingMessage> {
    // Channel posts carry no sender.
    let user = msg.from.as_ref()?;

    // Telegram "Group Anonymous Bot" ID used for anonymous admins.
    const ANONYMOUS_BOT_ID: u64 = 1087968824;

    // Ignore bots to prevent loops, but allow anonymous admins.
    if user.is_bot && user.id.0 != ANONYMOUS_BOT_ID {
        return None;
    }

    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: i64::from(msg.id.0),
        user_id: i64::try_from(user.id.0).ok()?,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        content: incoming_content(msg)?,
    })
}

#[async_trait]
impl ChannelLifecycle for TelegramChannel {
    fn display_name(&self) -> &str {
        &self.display
    }

    async fn connect(&mut self) -> Result<()> {
        self.status = ChannelStatus::Connecting;
        let bot = Bot::new(&self.bot_token);
        let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot.clone()));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let handler = Arc::clone(&self.handler);

        let task = tokio::spawn(async move {
            let tree = Update::filter_message()
                .filter_map(|msg: Message| incoming_message(&msg))
                .endpoint(move |incoming: IncomingMessage| {
                    let handler = Arc::clone(&handler);
                    let transport = Arc::clone(&transport);
                    async move {
                        info!(
                            user_id = incoming.user_id,
                            chat_id = incoming.chat_id,
                            kind = incoming.content.kind(),
                            "telegram message received"
                        );
                        // The dispatcher serialises updates per chat; replies run
                        // detached so /cancel can reach an in-flight request.
                        tokio::spawn(async move {
                            handler.on_message(transport, incoming).await;
                        });
                        respond(())
                    }
                });

            let mut dispatcher = Dispatcher::builder(bot, tree)
                .default_handler(|upd| async move {
                    tracing::trace!("unhandled update: {:?}", upd.kind);
                })
                .build();

            let token = dispatcher.shutdown_token();
            tokio::spawn(async move {
                let mut rx = shutdown_rx;
                while rx.changed().await.is_ok() {
                    if *rx.borrow() {
                        if let Err(e) = token.shutdown() {
                            warn!("telegram shutdown token error: {e:?}");
                        }
                        break;
                    }
                }
            });

            info!("telegram bot polling started");
            dispatcher.dispatch().await;
            info!("telegram bot polling stopped");
        });
        self.task = Some(task);

        self.status = ChannelStatus::Connected;
        info!("telegram channel connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("telegram polling task ended abnormally: {e}");
            }
        }
        self.status = ChannelStatus::Disconnected;
        info!("telegram channel disconnected");
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.clone()
    }
}
