use crate::randomness::RequestId;
use crate::round::RoundStatus;
use crate::types::ParticipantId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RaffleError>;

#[derive(Error, Debug)]
pub enum RaffleError {
    #[error("Insufficient payment: entry fee is {required}, got {provided}")]
    InsufficientPayment { required: u64, provided: u64 },

    #[error("Round is closed for entries")]
    RoundClosed,

    #[error(
        "Upkeep conditions not met: state={state}, participants={participant_count}, balance={balance}"
    )]
    UpkeepConditionsNotMet {
        state: RoundStatus,
        participant_count: usize,
        balance: u64,
    },

    #[error("Payout of {amount} to {winner} failed: {reason}")]
    PayoutTransferFailed {
        winner: ParticipantId,
        amount: u64,
        reason: String,
    },

    #[error("Unknown randomness request: {0}")]
    UnknownRequest(RequestId),

    #[error("Randomness fulfilment carried no random words")]
    EmptyRandomWords,

    #[error("Pooled balance overflow")]
    BalanceOverflow,

    #[error("Randomness coordinator error: {0}")]
    Coordinator(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RaffleError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn coordinator(msg: impl Into<String>) -> Self {
        Self::Coordinator(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
