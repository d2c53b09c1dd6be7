use thiserror::Error;

/// Errors shared by every ChatRelay crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("agent error: {0}")]
    Agent(String),

    /// Network or vendor failure after the provider stream was opened.
    #[error("provider stream error: {0}")]
    ProviderStream(String),

    /// Reassembled tool-call arguments that are not a usable JSON object.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    ToolArguments { tool: String, reason: String },

    #[error("tool error: {0}")]
    Tool(String),

    /// The chat transport rejected both the formatted and the plain-text attempt.
    #[error("delivery error: {0}")]
    Delivery(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
