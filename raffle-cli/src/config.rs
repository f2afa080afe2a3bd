use anyhow::{bail, Context, Result};
use raffle_core::RaffleConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "raffle.json";
pub const LEDGER_FILE: &str = "ledger.db";
pub const STATUS_FILE: &str = "status.json";

/// Upper bound on the simulated time per confirmation.
pub const MAX_BLOCK_TIME: Duration = Duration::from_secs(600);

/// Settings for a local raffle run: the raffle itself plus the behaviour of
/// the in-process keeper and coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub raffle: RaffleConfig,
    /// Simulated time per confirmation before the coordinator answers.
    pub block_time: Duration,
    pub keeper_poll: Duration,
    pub coordinator_base_fee: u64,
    pub subscription_funding: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            raffle: RaffleConfig::new(10_000, Duration::from_secs(5)),
            block_time: Duration::from_millis(500),
            keeper_poll: Duration::from_secs(1),
            coordinator_base_fee: 100,
            subscription_funding: 1_000_000,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        self.raffle.validate()?;

        if self.keeper_poll.is_zero() {
            bail!("Keeper poll interval must be greater than 0");
        }

        if self.block_time > MAX_BLOCK_TIME {
            bail!(
                "Block time {:?} exceeds the maximum of {:?}",
                self.block_time,
                MAX_BLOCK_TIME
            );
        }

        Ok(())
    }

    /// Load from `path`, falling back to defaults if the file is missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("raffle")
}
