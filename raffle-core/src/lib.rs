//! Interval raffle driven by an external randomness coordinator
//!
//! Participants pay a fixed entry fee into a single long-lived round. Once the
//! configured interval has passed and the round holds entries, a keeper closes
//! the round and a randomness request is issued. The coordinator later calls
//! back with random words; the winner is `words[0] mod entries` and receives
//! the whole pool, after which the round reopens.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod payout;
pub mod raffle;
pub mod randomness;
pub mod round;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{RaffleConfig, RandomnessConfig};
pub use error::{RaffleError, Result};
pub use events::RaffleEvent;
pub use payout::PayoutSink;
pub use raffle::Raffle;
pub use randomness::{RandomWord, RandomnessCoordinator, RandomnessRequest, RequestId};
pub use round::{Draw, Readiness, Round, RoundSnapshot, RoundState, RoundStatus};
pub use types::ParticipantId;
