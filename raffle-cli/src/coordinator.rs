use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use raffle_core::config::{MAX_NUM_WORDS, MAX_REQUEST_CONFIRMATIONS};
use raffle_core::{
    ParticipantId, Raffle, RaffleError, RaffleEvent, RandomWord, RandomnessCoordinator,
    RandomnessRequest, RequestId, Result,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: u64,
    pub owner: String,
    pub balance: u64,
    pub consumers: Vec<Uuid>,
    pub fulfilled: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRequest {
    pub request_id: RequestId,
    pub subscription_id: u64,
    pub consumer: Uuid,
    pub num_words: u32,
    pub request_confirmations: u16,
    pub requested_at: DateTime<Utc>,
}

#[derive(Default)]
struct CoordinatorState {
    next_subscription_id: u64,
    next_request_id: u64,
    subscriptions: HashMap<u64, Subscription>,
    pending: HashMap<RequestId, PendingRequest>,
}

/// In-process randomness coordinator with subscription billing.
///
/// Words are derived from a per-instance seed, so a coordinator built with
/// [`LocalCoordinator::with_seed`] answers deterministically.
pub struct LocalCoordinator {
    base_fee: u64,
    seed: [u8; 32],
    state: Mutex<CoordinatorState>,
}

impl LocalCoordinator {
    pub fn new(base_fee: u64) -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::with_seed(base_fee, seed)
    }

    pub fn with_seed(base_fee: u64, seed: [u8; 32]) -> Self {
        Self {
            base_fee,
            seed,
            state: Mutex::new(CoordinatorState::default()),
        }
    }

    pub fn base_fee(&self) -> u64 {
        self.base_fee
    }

    pub fn create_subscription(&self, owner: &str) -> u64 {
        let mut state = self.state.lock();
        state.next_subscription_id += 1;
        let id = state.next_subscription_id;

        state.subscriptions.insert(
            id,
            Subscription {
                id,
                owner: owner.to_string(),
                balance: 0,
                consumers: Vec::new(),
                fulfilled: 0,
            },
        );

        tracing::info!("Created subscription {} for '{}'", id, owner);
        id
    }

    pub fn fund_subscription(&self, subscription_id: u64, amount: u64) -> Result<u64> {
        let mut state = self.state.lock();
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| invalid_subscription(subscription_id))?;

        subscription.balance = subscription
            .balance
            .checked_add(amount)
            .ok_or_else(|| RaffleError::coordinator("Subscription balance overflow"))?;

        tracing::info!(
            "Funded subscription {} with {} (balance {})",
            subscription_id,
            amount,
            subscription.balance
        );
        Ok(subscription.balance)
    }

    pub fn add_consumer(&self, subscription_id: u64, consumer: Uuid) -> Result<()> {
        let mut state = self.state.lock();
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| invalid_subscription(subscription_id))?;

        if !subscription.consumers.contains(&consumer) {
            subscription.consumers.push(consumer);
        }
        Ok(())
    }

    pub fn subscription(&self, subscription_id: u64) -> Option<Subscription> {
        self.state.lock().subscriptions.get(&subscription_id).cloned()
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<PendingRequest> =
            self.state.lock().pending.values().cloned().collect();
        pending.sort_by_key(|p| p.request_id);
        pending
    }

    /// `sha256(seed || request_id || index)` for each requested word.
    pub fn random_words(&self, request_id: RequestId, num_words: u32) -> Vec<RandomWord> {
        (0..num_words)
            .map(|index| {
                let mut hasher = Sha256::new();
                hasher.update(self.seed);
                hasher.update(request_id.0.to_be_bytes());
                hasher.update(index.to_be_bytes());
                RandomWord::from_be_bytes(hasher.finalize().into())
            })
            .collect()
    }

    /// Deliver the answer for `request_id` to its consumer.
    ///
    /// The request stays pending when the consumer fails, so the same
    /// fulfilment can be delivered again.
    pub async fn fulfill(&self, request_id: RequestId, consumer: &Raffle) -> Result<ParticipantId> {
        let pending = {
            let mut state = self.state.lock();
            let pending = state
                .pending
                .remove(&request_id)
                .ok_or(RaffleError::UnknownRequest(request_id))?;

            if pending.consumer != consumer.id() {
                let message = format!(
                    "Request {} belongs to consumer {}, not {}",
                    request_id,
                    pending.consumer,
                    consumer.id()
                );
                state.pending.insert(request_id, pending);
                return Err(RaffleError::coordinator(message));
            }

            let balance = state
                .subscriptions
                .get(&pending.subscription_id)
                .map(|s| s.balance)
                .unwrap_or(0);
            if balance < self.base_fee {
                let message = format!(
                    "Subscription {} balance {} is below the fee {}",
                    pending.subscription_id, balance, self.base_fee
                );
                state.pending.insert(request_id, pending);
                return Err(RaffleError::coordinator(message));
            }

            pending
        };

        let words = self.random_words(request_id, pending.num_words);
        match consumer.fulfill_random_words(request_id, &words).await {
            Ok(winner) => {
                let mut state = self.state.lock();
                if let Some(subscription) = state.subscriptions.get_mut(&pending.subscription_id) {
                    subscription.balance = subscription.balance.saturating_sub(self.base_fee);
                    subscription.fulfilled += 1;
                }
                tracing::info!("Fulfilled request {} for {}", request_id, pending.consumer);
                Ok(winner)
            }
            Err(e) => {
                tracing::warn!("Consumer rejected fulfilment of request {}: {}", request_id, e);
                self.state.lock().pending.insert(request_id, pending);
                Err(e)
            }
        }
    }

    /// Answer every randomness request `raffle` publishes, after waiting
    /// `block_time` per requested confirmation.
    pub async fn serve(
        self: Arc<Self>,
        raffle: Arc<Raffle>,
        block_time: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut events = raffle.subscribe();

        loop {
            let request_id = tokio::select! {
                event = events.recv() => match event {
                    Ok(RaffleEvent::RandomnessRequested { request_id }) => request_id,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Coordinator missed {} raffle events", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => break,
            };

            let confirmations = raffle.randomness_config().request_confirmations as u32;
            let delay = block_time.saturating_mul(confirmations);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.fulfill(request_id, &raffle).await {
                tracing::error!("Fulfilment of request {} failed: {}", request_id, e);
            }
        }

        tracing::debug!("Coordinator stopped");
    }
}

#[async_trait]
impl RandomnessCoordinator for LocalCoordinator {
    async fn request_random_words(&self, request: &RandomnessRequest) -> Result<RequestId> {
        if request.num_words == 0 || request.num_words > MAX_NUM_WORDS {
            return Err(RaffleError::coordinator(format!(
                "Word count {} outside 1..={}",
                request.num_words, MAX_NUM_WORDS
            )));
        }

        if request.request_confirmations > MAX_REQUEST_CONFIRMATIONS {
            return Err(RaffleError::coordinator(format!(
                "Too many confirmations: {}",
                request.request_confirmations
            )));
        }

        let mut state = self.state.lock();
        let subscription = state
            .subscriptions
            .get(&request.subscription_id)
            .ok_or_else(|| invalid_subscription(request.subscription_id))?;

        if !subscription.consumers.contains(&request.consumer) {
            return Err(RaffleError::coordinator(format!(
                "Consumer {} is not registered on subscription {}",
                request.consumer, request.subscription_id
            )));
        }

        state.next_request_id += 1;
        let request_id = RequestId(state.next_request_id);

        state.pending.insert(
            request_id,
            PendingRequest {
                request_id,
                subscription_id: request.subscription_id,
                consumer: request.consumer,
                num_words: request.num_words,
                request_confirmations: request.request_confirmations,
                requested_at: Utc::now(),
            },
        );

        tracing::info!(
            "Randomness request {} from {} on subscription {} ({} words)",
            request_id,
            request.consumer,
            request.subscription_id,
            request.num_words
        );
        Ok(request_id)
    }
}

fn invalid_subscription(subscription_id: u64) -> RaffleError {
    RaffleError::coordinator(format!("Invalid subscription {}", subscription_id))
}
