use raffle_core::{Raffle, RaffleError, RequestId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Polls the raffle's readiness and closes the round when it is due.
pub struct Keeper {
    raffle: Arc<Raffle>,
    poll_interval: Duration,
}

impl Keeper {
    pub fn new(raffle: Arc<Raffle>, poll_interval: Duration) -> Self {
        Self {
            raffle,
            poll_interval,
        }
    }

    /// One readiness check, closing the round if it passes.
    pub async fn poll_once(&self) -> Result<Option<RequestId>> {
        if !self.raffle.check_readiness().await {
            return Ok(None);
        }

        match self.raffle.close_round_and_request_randomness().await {
            Ok(request_id) => {
                tracing::info!("Keeper closed raffle {}: request {}", self.raffle.id(), request_id);
                Ok(Some(request_id))
            }
            // someone else closed the round between the check and the call
            Err(RaffleError::UpkeepConditionsNotMet { state, .. }) => {
                tracing::debug!("Keeper lost the race to close the round ({})", state);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!("Keeper could not close the round: {}", e);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        tracing::debug!("Keeper stopped");
    }
}
