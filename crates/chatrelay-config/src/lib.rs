pub mod loader;
pub mod model;

pub use loader::{ConfigLoader, apply_env_overrides};
pub use model::{
    AppConfig, AssistantConfig, LimitsConfig, ModelConfig, ProviderConfig, ProviderKind,
    ProvidersConfig, TelegramConfig,
};
