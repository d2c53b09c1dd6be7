use std::path::{Path, PathBuf};

use chatrelay_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{AppConfig, ProviderKind};

/// Loads `AppConfig` from a YAML file, then layers environment overrides on top.
pub struct ConfigLoader {
    path: PathBuf,
}

impl ConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn default_path() -> PathBuf {
        PathBuf::from("config/application.yaml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file (if present), load `.env`, and apply process environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        match dotenvy::dotenv() {
            Ok(path) => debug!("loaded environment from {}", path.display()),
            Err(e) if e.not_found() => {}
            Err(e) => warn!("failed to read .env file: {e}"),
        }

        let mut config = if self.path.exists() {
            let contents = std::fs::read_to_string(&self.path)?;
            let config = Self::parse(&contents)?;
            info!("loaded config from {}", self.path.display());
            config
        } else {
            warn!(
                "config file {} not found, using defaults",
                self.path.display()
            );
            AppConfig::default()
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<AppConfig> {
        if contents.trim().is_empty() {
            return Ok(AppConfig::default());
        }
        serde_yaml::from_str(contents)
            .map_err(|e| Error::Config(format!("failed to parse config: {e}")))
    }
}

/// Apply environment overrides using `lookup` as the variable source.
///
/// Recognised keys: `TOKEN`, `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `ALLOWED_USER_ID`
/// (comma separated), `DIALOG_TIMEOUT` (seconds), `MAX_CONCURRENT_REQUESTS`, `DATABASE_PATH`.
pub fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(token) = get("TOKEN") {
        config.telegram.bot_token = Some(token);
    }

    for (key, kind) in [
        ("OPENAI_API_KEY", ProviderKind::OpenAi),
        ("ANTHROPIC_API_KEY", ProviderKind::Anthropic),
    ] {
        if let Some(api_key) = get(key) {
            config.providers.get_or_insert(kind).api_key = Some(api_key);
        }
    }

    if let Some(raw) = get("ALLOWED_USER_ID") {
        config.allowed_user_ids = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| parse_number::<i64>("ALLOWED_USER_ID", s))
            .collect::<Result<Vec<_>>>()?;
    }

    if let Some(raw) = get("DIALOG_TIMEOUT") {
        config.limits.dialog_timeout_secs = parse_number("DIALOG_TIMEOUT", &raw)?;
    }

    if let Some(raw) = get("MAX_CONCURRENT_REQUESTS") {
        config.limits.max_concurrent_requests = parse_number("MAX_CONCURRENT_REQUESTS", &raw)?;
    }

    if let Some(path) = get("DATABASE_PATH") {
        config.database_path = PathBuf::from(path);
    }

    Ok(())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("invalid value for {key} ('{raw}'): {e}")))
}
