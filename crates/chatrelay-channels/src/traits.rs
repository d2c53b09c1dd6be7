use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Lifecycle management for a messaging channel (connect, disconnect, status).
#[async_trait]
pub trait ChannelLifecycle: Send {
    /// Human-readable display name.
    fn display_name(&self) -> &str;

    /// Start the channel. Updates are delivered to its handler until disconnect.
    async fn connect(&mut self) -> Result<()>;

    /// Gracefully stop receiving updates.
    async fn disconnect(&mut self) -> Result<()>;

    /// Current connection status.
    fn status(&self) -> ChannelStatus;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Where an outgoing message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recipient {
    pub chat_id: i64,
    /// Message the new outgoing message replies to, if any.
    pub reply_to: Option<i64>,
}

impl Recipient {
    pub fn chat(chat_id: i64) -> Self {
        Self {
            chat_id,
            reply_to: None,
        }
    }

    pub fn replying_to(chat_id: i64, message_id: i64) -> Self {
        Self {
            chat_id,
            reply_to: Some(message_id),
        }
    }
}

/// A message previously sent through a [`ChatTransport`], addressable for edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Send/edit primitives of a chat platform.
///
/// `formatted` selects the platform's inline markup mode; `false` sends the
/// text verbatim.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        recipient: &Recipient,
        text: &str,
        formatted: bool,
    ) -> Result<MessageHandle>;

    async fn edit_message(&self, handle: &MessageHandle, text: &str, formatted: bool)
    -> Result<()>;

    /// Show a "typing" indicator. Best effort.
    async fn notify_typing(&self, recipient: &Recipient);

    /// Fetch the bytes of a file a user sent, by platform file id.
    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        Err(Error::Channel(format!(
            "file downloads are not supported (file {file_id})"
        )))
    }
}

/// What a user sent. Media arrive as platform file ids, fetched on demand
/// through [`ChatTransport::download_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingContent {
    Text(String),
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Voice {
        file_id: String,
    },
}

impl IncomingContent {
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingContent::Text(_) => "text",
            IncomingContent::Photo { .. } => "photo",
            IncomingContent::Voice { .. } => "voice",
        }
    }
}

/// A message received from a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub content: IncomingContent,
}

impl IncomingMessage {
    /// Recipient for replies to this message.
    pub fn reply_recipient(&self) -> Recipient {
        Recipient::replying_to(self.chat_id, self.message_id)
    }
}

/// Receives every inbound message of a channel.
///
/// Each call runs on its own task, so a long reply never blocks later
/// updates from the same chat.
#[async_trait]
pub trait UpdateHandler: Send + Sync {
    async fn on_message(&self, transport: Arc<dyn ChatTransport>, message: IncomingMessage);
}
