use crate::error::{RaffleError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_REQUEST_CONFIRMATIONS: u16 = 200;
pub const MAX_NUM_WORDS: u32 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaffleConfig {
    pub entry_fee: u64,
    pub interval: Duration,
    pub randomness: RandomnessConfig,
}

/// Fixed parameters of every randomness request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessConfig {
    /// Gas lane selecting the coordinator's proving key.
    pub key_hash: String,
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

impl Default for RandomnessConfig {
    fn default() -> Self {
        Self {
            key_hash: "0x474e34a077df58807dbe9c96d3c009b23b3c6d0cce433e59bbf5b34f823bc56c"
                .to_string(),
            subscription_id: 0,
            request_confirmations: 3,
            callback_gas_limit: 500_000,
            num_words: 1,
        }
    }
}

impl Default for RaffleConfig {
    fn default() -> Self {
        Self {
            entry_fee: 10_000,
            interval: Duration::from_secs(30),
            randomness: RandomnessConfig::default(),
        }
    }
}

impl RaffleConfig {
    pub fn new(entry_fee: u64, interval: Duration) -> Self {
        Self {
            entry_fee,
            interval,
            ..Self::default()
        }
    }

    pub fn with_subscription(mut self, subscription_id: u64) -> Self {
        self.randomness.subscription_id = subscription_id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.entry_fee == 0 {
            return Err(RaffleError::config("Entry fee must be greater than 0"));
        }

        if self.interval.is_zero() {
            return Err(RaffleError::config("Interval must be greater than 0"));
        }

        if chrono::Duration::from_std(self.interval).is_err() {
            return Err(RaffleError::config("Interval is out of range"));
        }

        self.randomness.validate()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl RandomnessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.key_hash.is_empty() {
            return Err(RaffleError::config("Key hash cannot be empty"));
        }

        if self.num_words == 0 || self.num_words > MAX_NUM_WORDS {
            return Err(RaffleError::config(format!(
                "Word count must be between 1 and {}",
                MAX_NUM_WORDS
            )));
        }

        if self.request_confirmations > MAX_REQUEST_CONFIRMATIONS {
            return Err(RaffleError::config(format!(
                "Request confirmations cannot exceed {}",
                MAX_REQUEST_CONFIRMATIONS
            )));
        }

        if self.callback_gas_limit == 0 {
            return Err(RaffleError::config(
                "Callback gas limit must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RaffleConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_fee_and_interval() {
        let config = RaffleConfig::new(0, Duration::from_secs(60));
        assert!(matches!(config.validate(), Err(RaffleError::Config(_))));

        let config = RaffleConfig::new(10, Duration::ZERO);
        assert!(matches!(config.validate(), Err(RaffleError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_randomness_parameters() {
        let mut config = RaffleConfig::default();
        config.randomness.num_words = 0;
        assert!(config.validate().is_err());

        let mut config = RaffleConfig::default();
        config.randomness.num_words = MAX_NUM_WORDS + 1;
        assert!(config.validate().is_err());

        let mut config = RaffleConfig::default();
        config.randomness.request_confirmations = MAX_REQUEST_CONFIRMATIONS + 1;
        assert!(config.validate().is_err());

        let mut config = RaffleConfig::default();
        config.randomness.key_hash.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_round_trip_validates() {
        let config = RaffleConfig::new(25, Duration::from_secs(120)).with_subscription(4);
        let json = config.to_json().unwrap();
        assert_eq!(RaffleConfig::from_json(&json).unwrap(), config);

        let broken = json.replace("\"entry_fee\": 25", "\"entry_fee\": 0");
        assert!(matches!(
            RaffleConfig::from_json(&broken),
            Err(RaffleError::Config(_))
        ));
    }
}
