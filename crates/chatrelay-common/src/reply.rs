use async_trait::async_trait;

use crate::Result;

/// Destination for the text of one user-visible reply.
///
/// The orchestrator pushes provider text deltas in arrival order and calls
/// `flush` once the final round has finished. A single sink instance lives
/// across every tool-call round of the reply.
#[async_trait]
pub trait ReplySink: Send {
    async fn send_chunk(&mut self, delta: &str) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;
}
