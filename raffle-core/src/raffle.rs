use crate::clock::{Clock, SystemClock};
use crate::config::{RaffleConfig, RandomnessConfig};
use crate::events::RaffleEvent;
use crate::payout::PayoutSink;
use crate::randomness::{RandomWord, RandomnessCoordinator, RandomnessRequest, RequestId};
use crate::round::{Readiness, Round, RoundSnapshot, RoundState};
use crate::types::ParticipantId;
use crate::{RaffleError, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Shared handle to the raffle.
///
/// All state-changing operations serialize on one lock, so no entry can land
/// between the readiness check and the transition to calculating, and a
/// resolution is never observed half-applied.
pub struct Raffle {
    id: Uuid,
    config: RaffleConfig,
    round: Mutex<Round>,
    coordinator: Arc<dyn RandomnessCoordinator>,
    payout: Arc<dyn PayoutSink>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RaffleEvent>,
}

impl Raffle {
    pub fn new(
        config: RaffleConfig,
        coordinator: Arc<dyn RandomnessCoordinator>,
        payout: Arc<dyn PayoutSink>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let round = Round::new(config.clone(), clock.now())?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let id = Uuid::new_v4();

        tracing::info!(
            "Raffle {} created: entry fee {}, interval {}s",
            id,
            config.entry_fee,
            config.interval.as_secs()
        );

        Ok(Self {
            id,
            config,
            round: Mutex::new(round),
            coordinator,
            payout,
            clock,
            events,
        })
    }

    pub fn with_system_clock(
        config: RaffleConfig,
        coordinator: Arc<dyn RandomnessCoordinator>,
        payout: Arc<dyn PayoutSink>,
    ) -> Result<Self> {
        Self::new(config, coordinator, payout, Arc::new(SystemClock))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    pub fn entry_fee(&self) -> u64 {
        self.config.entry_fee
    }

    pub fn interval(&self) -> Duration {
        self.config.interval
    }

    pub fn randomness_config(&self) -> &RandomnessConfig {
        &self.config.randomness
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.events.subscribe()
    }

    /// Enter the current round
    pub async fn enter(&self, participant: ParticipantId, payment: u64) -> Result<()> {
        let mut round = self.round.lock().await;
        let event = round.enter(participant.clone(), payment)?;

        tracing::info!(
            "Raffle {}: {} entered with {} ({} entries, pool {})",
            self.id,
            participant,
            payment,
            round.participant_count(),
            round.pooled_balance()
        );

        self.publish(event);
        Ok(())
    }

    pub async fn readiness(&self) -> Readiness {
        let round = self.round.lock().await;
        let readiness = round.readiness(self.clock.now());
        tracing::debug!("Raffle {} readiness: {:?}", self.id, readiness);
        readiness
    }

    pub async fn check_readiness(&self) -> bool {
        self.readiness().await.is_ready()
    }

    /// Close the round and ask the coordinator for randomness.
    ///
    /// The lock is held across the coordinator call. If the coordinator
    /// fails the round stays open and untouched.
    pub async fn close_round_and_request_randomness(&self) -> Result<RequestId> {
        let mut round = self.round.lock().await;
        let now = self.clock.now();
        round.ensure_ready(now)?;

        let request = self.randomness_request();
        let request_id = self.coordinator.request_random_words(&request).await?;

        let event = round.begin_calculating(request_id, now)?;

        tracing::info!(
            "Raffle {} closed with {} entries, pool {}; randomness request {}",
            self.id,
            round.participant_count(),
            round.pooled_balance(),
            request_id
        );

        self.publish(event);
        Ok(request_id)
    }

    /// Resolve the round with the coordinator's answer.
    ///
    /// Pays the whole pool to `random_words[0] mod n` and reopens. If the
    /// payout fails, nothing is changed and the round keeps waiting on the
    /// same request.
    pub async fn fulfill_random_words(
        &self,
        request_id: RequestId,
        random_words: &[RandomWord],
    ) -> Result<ParticipantId> {
        let mut round = self.round.lock().await;
        let draw = round.draw(request_id, random_words)?;

        if let Err(e) = self.payout.transfer(draw.winner(), draw.payout()).await {
            tracing::warn!(
                "Raffle {}: payout of {} to {} failed: {}",
                self.id,
                draw.payout(),
                draw.winner(),
                e
            );
            return Err(RaffleError::PayoutTransferFailed {
                winner: draw.winner().clone(),
                amount: draw.payout(),
                reason: e.to_string(),
            });
        }

        let winner = draw.winner().clone();
        let event = round.settle(draw, self.clock.now())?;

        tracing::info!(
            "Raffle {} round {} resolved by request {}. Winner: {}",
            self.id,
            round.round_number(),
            request_id,
            winner
        );

        self.publish(event);
        Ok(winner)
    }

    pub async fn state(&self) -> RoundState {
        self.round.lock().await.state()
    }

    pub async fn participant_count(&self) -> usize {
        self.round.lock().await.participant_count()
    }

    pub async fn participant(&self, index: usize) -> Option<ParticipantId> {
        self.round.lock().await.participant(index).cloned()
    }

    pub async fn participants(&self) -> Vec<ParticipantId> {
        self.round.lock().await.participants().to_vec()
    }

    pub async fn pooled_balance(&self) -> u64 {
        self.round.lock().await.pooled_balance()
    }

    pub async fn recent_winner(&self) -> Option<ParticipantId> {
        self.round.lock().await.recent_winner().cloned()
    }

    pub async fn last_resolution_timestamp(&self) -> DateTime<Utc> {
        self.round.lock().await.last_resolution()
    }

    pub async fn round_number(&self) -> u64 {
        self.round.lock().await.round_number()
    }

    pub async fn snapshot(&self) -> RoundSnapshot {
        self.round.lock().await.snapshot()
    }

    fn randomness_request(&self) -> RandomnessRequest {
        let randomness = &self.config.randomness;
        RandomnessRequest {
            key_hash: randomness.key_hash.clone(),
            subscription_id: randomness.subscription_id,
            request_confirmations: randomness.request_confirmations,
            callback_gas_limit: randomness.callback_gas_limit,
            num_words: randomness.num_words,
            consumer: self.id,
        }
    }

    fn publish(&self, event: RaffleEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for Raffle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Raffle")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish()
    }
}
