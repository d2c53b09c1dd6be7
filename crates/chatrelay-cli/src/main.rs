use std::path::PathBuf;

use anyhow::Context;
use chatrelay_config::{AppConfig, ConfigLoader};
use chatrelay_gateway::ChatRelayApp;
use chatrelay_security::RedactingWriter;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrelay", version, about = "Streaming LLM chat relay for Telegram")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bot (default)
    Run,
    /// Validate the configuration and exit
    Check,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let loader = ConfigLoader::new(path.unwrap_or_else(ConfigLoader::default_path));
    loader
        .load()
        .with_context(|| format!("failed to load config from {}", loader.path().display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(cli.config)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Check => {
            config.validate().context("invalid configuration")?;
            if config
                .telegram
                .bot_token
                .as_deref()
                .is_none_or(|t| t.trim().is_empty())
            {
                warn!("telegram bot token is not set; `run` will fail until TOKEN is provided");
            }
            println!(
                "configuration ok: {} model(s), default '{}', {} allowed user(s)",
                config.models.len(),
                config.default_model_id().unwrap_or("-"),
                config.allowed_user_ids.len()
            );
        }
        Command::Run => {
            info!("starting chatrelay v{}", env!("CARGO_PKG_VERSION"));
            let app = ChatRelayApp::open(config).context("failed to initialise chatrelay")?;
            app.run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("failed to listen for ctrl-c: {e}");
                }
            })
            .await?;
            info!("chatrelay stopped");
        }
    }

    Ok(())
}
