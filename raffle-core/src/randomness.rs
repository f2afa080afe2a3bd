use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Handle for an outstanding randomness request, issued by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A 256-bit unsigned random value, stored big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomWord([u8; 32]);

impl RandomWord {
    pub const ZERO: RandomWord = RandomWord([0u8; 32]);

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// `self mod modulus`, exact over the full 256 bits.
    ///
    /// Returns `None` for a zero modulus.
    pub fn reduce(&self, modulus: usize) -> Option<usize> {
        if modulus == 0 {
            return None;
        }
        let m = modulus as u128;
        // acc < m <= usize::MAX, so acc * 256 + 255 fits in u128
        let rem = self
            .0
            .iter()
            .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % m);
        Some(rem as usize)
    }
}

impl From<u64> for RandomWord {
    fn from(value: u64) -> Self {
        Self::from(value as u128)
    }
}

impl From<u128> for RandomWord {
    fn from(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Display for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomWord({})", self)
    }
}

/// Parameters sent to the coordinator on every close transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub key_hash: String,
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
    /// The raffle that will receive the fulfilment.
    pub consumer: Uuid,
}

/// Outbound side of the randomness service.
///
/// The coordinator answers later by calling
/// [`Raffle::fulfill_random_words`](crate::Raffle::fulfill_random_words)
/// with the returned id.
#[async_trait]
pub trait RandomnessCoordinator: Send + Sync {
    async fn request_random_words(&self, request: &RandomnessRequest) -> Result<RequestId>;
}
