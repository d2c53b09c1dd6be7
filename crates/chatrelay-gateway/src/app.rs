use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use chatrelay_agents::tools::register_memory_tools;
use chatrelay_agents::{
    AnthropicProvider, ChatRuntime, LlmProvider, ModelRegistry, ModelRoute, OpenAiProvider,
    RuntimeSettings, ToolRegistry, Transcriber,
};
use chatrelay_channels::{ChannelLifecycle, ShaperLimits, TelegramChannel};
use chatrelay_common::{Error, Result};
use chatrelay_config::{AppConfig, ProviderKind};
use chatrelay_db::{MemoryRepository, SqliteStore};
use chatrelay_security::Allowlist;
use tracing::info;

use crate::admission::AdmissionController;
use crate::handler::BotHandler;

/// Fully wired bot: storage, model routes, runtime and command handler.
pub struct ChatRelayApp {
    config: AppConfig,
    handler: Arc<BotHandler>,
}

impl ChatRelayApp {
    /// Validate `config` and open the database it names.
    pub fn open(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.database_path)?);
        Self::with_store(config, store)
    }

    pub fn with_store(config: AppConfig, store: Arc<SqliteStore>) -> Result<Self> {
        let models = build_model_registry(&config)?;
        let default_model = config
            .default_model_id()
            .ok_or_else(|| Error::Config("no default model configured".into()))?
            .to_string();

        let memory: Arc<dyn MemoryRepository> = store.clone();
        let mut tools = ToolRegistry::new();
        register_memory_tools(&mut tools, Arc::clone(&memory));

        let settings = RuntimeSettings {
            assistant_name: config.assistant.name.clone(),
            system_prompt: config.assistant.system_prompt.clone(),
            dialog_timeout: config.limits.dialog_timeout(),
            max_tool_rounds: config.limits.max_tool_rounds,
            max_tokens: config.limits.max_tokens,
        };
        let runtime = ChatRuntime::new(Arc::new(models), store.clone(), Arc::new(tools), settings)
            .with_memory(memory);

        let mut handler = BotHandler::new(
            Arc::new(runtime),
            store,
            Arc::new(AdmissionController::new(
                config.limits.max_concurrent_requests,
            )),
            Allowlist::new(config.allowed_user_ids.iter().copied()),
            default_model,
            ShaperLimits {
                max_message_length: config.limits.max_message_length,
                streaming_interval: config.limits.streaming_interval,
            },
        );
        match create_transcriber(&config) {
            Some(transcriber) => handler = handler.with_transcriber(transcriber),
            None => info!("no OpenAI api key configured, voice messages are disabled"),
        }

        Ok(Self {
            config,
            handler: Arc::new(handler),
        })
    }

    pub fn handler(&self) -> Arc<BotHandler> {
        Arc::clone(&self.handler)
    }

    /// Poll Telegram until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let token = self
            .config
            .telegram
            .bot_token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("telegram bot token is not configured (set TOKEN)".into())
            })?;

        let mut channel = TelegramChannel::new(token, self.handler());
        channel.connect().await?;
        info!(
            models = self.config.models.len(),
            allowed_users = self.config.allowed_user_ids.len(),
            "chatrelay running"
        );

        shutdown.await;
        info!("shutting down");
        channel.disconnect().await
    }
}

/// Bind every configured model to a provider client, one client per vendor.
pub fn build_model_registry(config: &AppConfig) -> Result<ModelRegistry> {
    let mut clients: HashMap<ProviderKind, Arc<dyn LlmProvider>> = HashMap::new();
    let mut registry = ModelRegistry::new();

    for model in &config.models {
        let provider = match clients.entry(model.provider) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                Arc::clone(entry.insert(create_provider(config, model.provider)?))
            }
        };

        registry.register(ModelRoute {
            name: model.name.clone(),
            model_id: model.model_id.clone(),
            provider,
            max_tokens: model.max_tokens,
        });
    }

    info!(models = ?registry.model_ids(), "model registry built");
    Ok(registry)
}

/// Voice notes are transcribed through the OpenAI audio API when a key is set.
fn create_transcriber(config: &AppConfig) -> Option<Arc<dyn Transcriber>> {
    let provider = config.providers.get(ProviderKind::OpenAi)?;
    let api_key = provider.api_key.clone().filter(|k| !k.trim().is_empty())?;
    Some(Arc::new(OpenAiProvider::new(api_key, provider.base_url.clone())))
}

fn create_provider(config: &AppConfig, kind: ProviderKind) -> Result<Arc<dyn LlmProvider>> {
    let provider = config
        .providers
        .get(kind)
        .ok_or_else(|| Error::Config(format!("provider '{kind}' is not configured")))?;
    let api_key = provider
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("provider '{kind}' has no api_key")))?;

    let client: Arc<dyn LlmProvider> = match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(api_key, provider.base_url.clone())),
        ProviderKind::Anthropic => {
            let mut anthropic = AnthropicProvider::new(api_key);
            if let Some(url) = &provider.base_url {
                anthropic = anthropic.with_base_url(url.clone());
            }
            Arc::new(anthropic)
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use chatrelay_config::ConfigLoader;

    use super::*;

    fn config() -> AppConfig {
        ConfigLoader::parse(
            r#"
telegram:
  bot_token: "123:abc"
providers:
  openai:
    api_key: sk-test
  anthropic:
    api_key: sk-ant-test
    base_url: http://localhost:9999
models:
  - name: GPT-4o
    model_id: gpt-4o
    provider: openai
  - name: GPT-4o mini
    model_id: gpt-4o-mini
    provider: openai
  - name: Claude
    model_id: claude-3-5-sonnet
    provider: anthropic
    max_tokens: 2048
default_model: claude-3-5-sonnet
allowed_user_ids: [7]
"#,
        )
        .unwrap()
    }

    #[test]
    fn registry_shares_one_client_per_vendor() {
        let registry = build_model_registry(&config()).unwrap();
        assert_eq!(
            registry.model_ids(),
            vec!["gpt-4o", "gpt-4o-mini", "claude-3-5-sonnet"]
        );

        let a = &registry.resolve("gpt-4o").unwrap().provider;
        let b = &registry.resolve("gpt-4o-mini").unwrap().provider;
        assert!(Arc::ptr_eq(a, b));
        assert_eq!(registry.resolve("claude-3-5-sonnet").unwrap().max_tokens, Some(2048));
    }

    #[test]
    fn missing_provider_key_is_config_error() {
        let mut config = config();
        config.providers.anthropic = None;
        match build_model_registry(&config) {
            Err(err @ Error::Config(_)) => assert!(err.to_string().contains("anthropic")),
            Err(other) => panic!("expected config error, got {other}"),
            Ok(_) => panic!("expected an error"),
        }
    }

    #[test]
    fn transcriber_follows_openai_key() {
        let mut config = config();
        assert!(create_transcriber(&config).is_some());

        config.providers.openai.as_mut().unwrap().api_key = Some(" ".into());
        assert!(create_transcriber(&config).is_none());
        config.providers.openai = None;
        assert!(create_transcriber(&config).is_none());
    }

    #[test]
    fn open_rejects_invalid_config() {
        let mut config = config();
        config.models.clear();
        assert!(matches!(ChatRelayApp::open(config), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn run_requires_bot_token() {
        let mut config = config();
        config.telegram.bot_token = Some("  ".into());
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let app = ChatRelayApp::with_store(config, store).unwrap();

        let err = app.run(async {}).await.unwrap_err();
        assert!(err.to_string().contains("bot token"));
    }
}
