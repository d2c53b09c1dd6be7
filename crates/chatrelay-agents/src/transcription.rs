use async_trait::async_trait;
use chatrelay_common::Result;

/// Speech-to-text backend for voice messages.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one audio file. `file_name` carries the container format
    /// (e.g. `voice.ogg`), which vendors use to pick a decoder.
    async fn transcribe(&self, audio: Vec<u8>, file_name: &str) -> Result<String>;
}
