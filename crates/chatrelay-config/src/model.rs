use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chatrelay_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration, usually read from `config/application.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub providers: ProvidersConfig,
    pub models: Vec<ModelConfig>,
    /// Model id assigned to newly registered users. Falls back to the first model.
    pub default_model: Option<String>,
    pub allowed_user_ids: Vec<i64>,
    pub database_path: PathBuf,
    pub limits: LimitsConfig,
    pub assistant: AssistantConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig::default(),
            providers: ProvidersConfig::default(),
            models: Vec::new(),
            default_model: None,
            allowed_user_ids: Vec::new(),
            database_path: PathBuf::from("data/chatrelay.db"),
            limits: LimitsConfig::default(),
            assistant: AssistantConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub openai: Option<ProviderConfig>,
    pub anthropic: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        match kind {
            ProviderKind::OpenAi => self.openai.as_ref(),
            ProviderKind::Anthropic => self.anthropic.as_ref(),
        }
    }

    pub fn get_or_insert(&mut self, kind: ProviderKind) -> &mut ProviderConfig {
        match kind {
            ProviderKind::OpenAi => self.openai.get_or_insert_with(ProviderConfig::default),
            ProviderKind::Anthropic => self.anthropic.get_or_insert_with(ProviderConfig::default),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable model and the provider that serves it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub model_id: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_concurrent_requests: usize,
    pub dialog_timeout_secs: u64,
    pub max_message_length: usize,
    /// Minimum growth, in characters, before an outgoing message is edited again.
    pub streaming_interval: usize,
    pub max_tool_rounds: usize,
    pub max_tokens: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 1,
            dialog_timeout_secs: 3600,
            max_message_length: 4096,
            streaming_interval: 200,
            max_tool_rounds: 10,
            max_tokens: 4096,
        }
    }
}

impl LimitsConfig {
    pub fn dialog_timeout(&self) -> Duration {
        Duration::from_secs(self.dialog_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub name: String,
    pub system_prompt: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "Johnny".to_string(),
            system_prompt: None,
        }
    }
}

impl AppConfig {
    /// The model id new users start with.
    pub fn default_model_id(&self) -> Option<&str> {
        self.default_model
            .as_deref()
            .or_else(|| self.models.first().map(|m| m.model_id.as_str()))
    }

    pub fn model(&self, model_id: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.model_id == model_id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(Error::Config("at least one model must be configured".into()));
        }

        for model in &self.models {
            let configured = self
                .providers
                .get(model.provider)
                .and_then(|p| p.api_key.as_deref())
                .is_some_and(|key| !key.trim().is_empty());
            if !configured {
                return Err(Error::Config(format!(
                    "model '{}' uses provider '{}' which has no api_key",
                    model.model_id, model.provider
                )));
            }
        }

        if let Some(default) = &self.default_model {
            if self.model(default).is_none() {
                return Err(Error::Config(format!(
                    "default_model '{default}' is not a configured model"
                )));
            }
        }

        if self.limits.max_concurrent_requests == 0 {
            return Err(Error::Config(
                "limits.max_concurrent_requests must be at least 1".into(),
            ));
        }

        if self.limits.max_message_length <= self.limits.streaming_interval {
            return Err(Error::Config(format!(
                "limits.max_message_length ({}) must exceed limits.streaming_interval ({})",
                self.limits.max_message_length, self.limits.streaming_interval
            )));
        }

        if self.limits.max_tool_rounds == 0 {
            return Err(Error::Config("limits.max_tool_rounds must be at least 1".into()));
        }

        Ok(())
    }
}
