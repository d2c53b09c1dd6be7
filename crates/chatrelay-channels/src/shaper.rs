use std::sync::Arc;

use async_trait::async_trait;
use chatrelay_common::{Error, ReplySink, Result};
use tracing::{debug, warn};

use crate::markup::{MAX_CLOSING_LEN, repair_markup};
use crate::traits::{ChatTransport, MessageHandle, Recipient};

/// Best-effort notice sent when a flush could not be delivered at all.
pub const DELIVERY_FAILED_NOTICE: &str = "Sorry, the reply could not be delivered.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaperLimits {
    /// Platform maximum for one message, in characters.
    pub max_message_length: usize,
    /// Minimum growth, in characters, between two throttled flushes.
    pub streaming_interval: usize,
}

impl Default for ShaperLimits {
    fn default() -> Self {
        Self {
            max_message_length: 4096,
            streaming_interval: 200,
        }
    }
}

/// Turns a stream of text deltas into send/edit operations on a chat.
///
/// Text accumulates in the currently open outgoing message. It is rendered
/// (markup repaired) and pushed to the transport whenever it has grown by
/// `streaming_interval` characters, and when [`ReplySink::flush`] is called.
/// A delta that would push the message to the length limit closes it and
/// continues in a fresh message, so every rendered message stays within
/// `max_message_length`.
pub struct MessageShaper {
    transport: Arc<dyn ChatTransport>,
    recipient: Recipient,
    budget: usize,
    interval: usize,
    accumulated: String,
    accumulated_len: usize,
    prev_flushed_len: usize,
    last_rendered: Option<String>,
    current: Option<MessageHandle>,
    closed: Vec<MessageHandle>,
}

impl MessageShaper {
    pub fn new(transport: Arc<dyn ChatTransport>, recipient: Recipient, limits: ShaperLimits) -> Self {
        Self {
            transport,
            recipient,
            // Room for the closing markers added at render time.
            budget: limits
                .max_message_length
                .saturating_sub(MAX_CLOSING_LEN)
                .max(2),
            interval: limits.streaming_interval.max(1),
            accumulated: String::new(),
            accumulated_len: 0,
            prev_flushed_len: 0,
            last_rendered: None,
            current: None,
            closed: Vec::new(),
        }
    }

    /// The outgoing message still being edited, if one was opened.
    pub fn current_message(&self) -> Option<&MessageHandle> {
        self.current.as_ref()
    }

    /// Messages already completed by a rollover, oldest first.
    pub fn closed_messages(&self) -> &[MessageHandle] {
        &self.closed
    }

    pub async fn push(&mut self, delta: &str) -> Result<()> {
        let mut rest = delta;
        while !rest.is_empty() {
            let rest_len = rest.chars().count();
            if self.accumulated_len + rest_len < self.budget {
                self.append(rest, rest_len);
                if self.accumulated_len - self.prev_flushed_len >= self.interval {
                    self.flush_now().await?;
                }
                return Ok(());
            }

            if self.accumulated_len == 0 {
                // The delta alone does not fit: fill this message and carry on.
                let take = self.budget - 1;
                let split = rest
                    .char_indices()
                    .nth(take)
                    .map_or(rest.len(), |(idx, _)| idx);
                let (head, tail) = rest.split_at(split);
                self.append(head, take);
                self.flush_now().await?;
                self.rollover();
                rest = tail;
                continue;
            }

            if self.prev_flushed_len != self.accumulated_len {
                self.flush_now().await?;
            }
            self.rollover();
        }
        Ok(())
    }

    /// Push any text accumulated since the last flush.
    pub async fn finish(&mut self) -> Result<()> {
        if self.accumulated_len != self.prev_flushed_len {
            self.flush_now().await?;
        }
        Ok(())
    }

    fn append(&mut self, text: &str, len: usize) {
        self.accumulated.push_str(text);
        self.accumulated_len += len;
    }

    fn rollover(&mut self) {
        if let Some(handle) = self.current.take() {
            debug!(message_id = handle.message_id, "outgoing message full, opening a new one");
            self.closed.push(handle);
        }
        self.accumulated.clear();
        self.accumulated_len = 0;
        self.prev_flushed_len = 0;
        self.last_rendered = None;
    }

    async fn flush_now(&mut self) -> Result<()> {
        let rendered = repair_markup(&self.accumulated);
        if self.last_rendered.as_deref() == Some(rendered.as_str()) {
            // Telegram refuses edits that change nothing.
            self.prev_flushed_len = self.accumulated_len;
            return Ok(());
        }

        if let Err(formatted_err) = self.deliver(&rendered, true).await {
            warn!("formatted delivery failed, retrying as plain text: {formatted_err}");
            let raw = self.accumulated.clone();
            if let Err(plain_err) = self.deliver(&raw, false).await {
                if let Err(e) = self
                    .transport
                    .send_message(&self.recipient, DELIVERY_FAILED_NOTICE, false)
                    .await
                {
                    debug!("failed to send delivery notice: {e}");
                }
                return Err(Error::Delivery(plain_err.to_string()));
            }
        }

        self.prev_flushed_len = self.accumulated_len;
        self.last_rendered = Some(rendered);
        Ok(())
    }

    async fn deliver(&mut self, text: &str, formatted: bool) -> Result<()> {
        match self.current {
            Some(handle) => self.transport.edit_message(&handle, text, formatted).await,
            None => {
                let handle = self
                    .transport
                    .send_message(&self.recipient, text, formatted)
                    .await?;
                self.current = Some(handle);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ReplySink for MessageShaper {
    async fn send_chunk(&mut self, delta: &str) -> Result<()> {
        self.push(delta).await
    }

    async fn flush(&mut self) -> Result<()> {
        self.finish().await
    }
}
