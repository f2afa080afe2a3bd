use crate::types::ParticipantId;
use crate::Result;
use async_trait::async_trait;

/// Moves the pooled balance to the winner.
///
/// An error aborts the resolution; the round stays calculating.
#[async_trait]
pub trait PayoutSink: Send + Sync {
    async fn transfer(&self, to: &ParticipantId, amount: u64) -> Result<()>;
}
