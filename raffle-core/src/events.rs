use crate::randomness::RequestId;
use crate::types::ParticipantId;
use serde::{Deserialize, Serialize};

/// Notifications emitted by the round lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RaffleEvent {
    Entered {
        participant: ParticipantId,
        amount: u64,
    },
    RandomnessRequested {
        request_id: RequestId,
    },
    WinnerPicked {
        winner: ParticipantId,
        payout: u64,
        round_number: u64,
    },
}
