use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered chat user together with dialog state and token counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub chat_id: i64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub current_dialog_id: i64,
    pub last_interaction: DateTime<Utc>,
    pub active: bool,
    pub current_model: String,
}

impl User {
    /// Abandon the current dialog; subsequent history lookups start empty.
    pub fn start_new_dialog(&mut self) {
        self.current_dialog_id += 1;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_interaction = now;
    }

    /// True when the gap since the last interaction is longer than `timeout`.
    pub fn dialog_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        let idle = now.signed_duration_since(self.last_interaction);
        idle.num_seconds() > timeout.as_secs() as i64
    }

}

/// Registration data for a sender seen for the first time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub chat_id: i64,
    pub active: bool,
    pub current_model: String,
}

impl NewUser {
    pub fn into_user(self, now: DateTime<Utc>) -> User {
        User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            username: self.username,
            chat_id: self.chat_id,
            input_tokens: 0,
            output_tokens: 0,
            current_dialog_id: 0,
            last_interaction: now,
            active: self.active,
            current_model: self.current_model,
        }
    }
}

/// One completed exchange: the user's message and the assistant's full reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub author_id: i64,
    pub dialog_id: i64,
    pub user_message: String,
    pub assistant_message: String,
    /// Platform id of the user message this interaction answers.
    pub user_message_id: i64,
    /// Image the user sent along with `user_message`, if any.
    #[serde(default)]
    pub user_image: Option<ImageAttachment>,
}

/// An inline image, kept base64-encoded so it can be stored and replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub media_type: String,
    /// Standard base64, no line breaks.
    pub data: String,
}

impl ImageAttachment {
    pub fn jpeg(data: String) -> Self {
        Self {
            media_type: "image/jpeg".to_string(),
            data,
        }
    }

    /// `data:` URL form accepted by vision-capable chat APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }

    /// Inverse of [`Self::data_url`]. Returns None for anything but a base64 data URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let (meta, data) = url.strip_prefix("data:")?.split_once(',')?;
        let media_type = meta.strip_suffix(";base64")?;
        if media_type.is_empty() {
            return None;
        }
        Some(Self {
            media_type: media_type.to_string(),
            data: data.to_string(),
        })
    }
}

/// A fact the assistant chose to remember about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub user_id: i64,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
