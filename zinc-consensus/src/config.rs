//! Configuration management for a Zinc node

use crate::constants::{BLOCK_REWARD, MIN_JOIN_STAKE, MIN_VALIDATOR_STAKE, QUORUM_THRESHOLD};
use crate::{Amount, ConsensusError, GenesisConfig, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Propose/vote/finalize settings
    pub consensus: ConsensusSettings,
    /// Validator snapshot and stake gates
    pub registry: RegistrySettings,
    /// Staking yield schedule
    pub rewards: RewardSettings,
    /// Fee-currency charges on transfers
    pub transfer: TransferSettings,
    /// Background loop timing
    pub scheduler: SchedulerSettings,
    /// Initial balances and peers
    pub genesis: GenesisConfig,
}

/// Consensus engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusSettings {
    /// Fraction of registered validators whose approval finalizes a block
    pub quorum_threshold: f64,
    /// Minted to the proposer of every finalized block
    pub block_reward: Amount,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            quorum_threshold: QUORUM_THRESHOLD,
            block_reward: BLOCK_REWARD,
        }
    }
}

/// Validator registry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// JSON snapshot of the validator set
    pub path: PathBuf,
    /// Lowest stake the registry accepts
    pub min_stake: Amount,
    /// Lowest stake accepted from a join request
    pub min_join_stake: Amount,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("validators.json"),
            min_stake: MIN_VALIDATOR_STAKE,
            min_join_stake: MIN_JOIN_STAKE,
        }
    }
}

/// Staking yield settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Informational ceiling, not enforced against emission
    pub staking_pool_total: Amount,
    /// Base emission for year zero
    pub rewards_per_year: Amount,
    /// Multiplier applied per full elapsed year
    pub annual_decay: f64,
    /// Claims closer together than this yield nothing
    pub min_claim_interval_secs: u64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            staking_pool_total: 400_000_000,
            rewards_per_year: 20_000_000,
            annual_decay: 0.95,
            min_claim_interval_secs: 300,
        }
    }
}

/// Transfer fee settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Fee charged in the fee currency as a fraction of the amount
    pub fee_rate: f64,
    /// Senders with at least this much reward stake transfer for free
    pub free_transfer_stake: Amount,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            fee_rate: 0.01,
            free_transfer_stake: 2000,
        }
    }
}

/// Background scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Period of the propose-or-check loop
    pub consensus_interval_secs: u64,
    /// Period of the validator liveness sweep
    pub liveness_interval_secs: u64,
    /// Per-validator ping timeout
    pub probe_timeout_secs: u64,
    /// Per-peer block delivery timeout
    pub broadcast_timeout_secs: u64,
    /// Propose from the consensus loop when idle
    pub auto_propose: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            consensus_interval_secs: 60,
            liveness_interval_secs: 600,
            probe_timeout_secs: 3,
            broadcast_timeout_secs: 5,
            auto_propose: true,
        }
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("toml")
}

impl ChainConfig {
    /// Load from a TOML file (by extension) or JSON otherwise
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            ConsensusError::ConfigurationError(format!("Failed to read config file: {}", e))
        })?;

        if is_toml(path) {
            toml::from_str(&config_str).map_err(|e| {
                ConsensusError::ConfigurationError(format!("Failed to parse TOML config: {}", e))
            })
        } else {
            serde_json::from_str(&config_str).map_err(|e| {
                ConsensusError::ConfigurationError(format!("Failed to parse JSON config: {}", e))
            })
        }
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let config_str = if is_toml(path) {
            toml::to_string_pretty(self).map_err(|e| {
                ConsensusError::ConfigurationError(format!("Failed to serialize config as TOML: {}", e))
            })?
        } else {
            serde_json::to_string_pretty(self)?
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        std::fs::write(path, config_str).map_err(|e| {
            ConsensusError::ConfigurationError(format!("Failed to write config file: {}", e))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let threshold = self.consensus.quorum_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConsensusError::ConfigurationError(
                "Quorum threshold must be in (0, 1]".to_string(),
            ));
        }

        if self.consensus.block_reward < 0 {
            return Err(ConsensusError::ConfigurationError(
                "Block reward cannot be negative".to_string(),
            ));
        }

        if self.registry.min_stake <= 0 {
            return Err(ConsensusError::ConfigurationError(
                "Minimum validator stake must be positive".to_string(),
            ));
        }

        if self.rewards.rewards_per_year < 0 {
            return Err(ConsensusError::ConfigurationError(
                "Rewards per year cannot be negative".to_string(),
            ));
        }

        let decay = self.rewards.annual_decay;
        if !(decay > 0.0 && decay <= 1.0) {
            return Err(ConsensusError::ConfigurationError(
                "Annual decay must be in (0, 1]".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.transfer.fee_rate) {
            return Err(ConsensusError::ConfigurationError(
                "Fee rate must be between 0 and 1".to_string(),
            ));
        }

        let scheduler = &self.scheduler;
        if scheduler.consensus_interval_secs == 0
            || scheduler.liveness_interval_secs == 0
            || scheduler.probe_timeout_secs == 0
            || scheduler.broadcast_timeout_secs == 0
        {
            return Err(ConsensusError::ConfigurationError(
                "Scheduler intervals and timeouts must be non-zero".to_string(),
            ));
        }

        for (address, amount) in self
            .genesis
            .native_allocations
            .iter()
            .chain(&self.genesis.fee_allocations)
        {
            if *amount < 0 {
                return Err(ConsensusError::ConfigurationError(format!(
                    "Negative genesis allocation for {}",
                    address
                )));
            }
        }

        Ok(())
    }

    /// Get default configuration directory
    pub fn default_config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zinc")
    }

    /// Get default configuration file path
    pub fn default_config_file() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }
}
