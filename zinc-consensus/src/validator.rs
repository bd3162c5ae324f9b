//! Validator registry for Zinc consensus
//!
//! The registry is a thin read-modify-write layer over a [`ValidatorStore`].
//! Every call reloads the full set from the store under one async mutex, and
//! every mutation writes the full set back. Racing registrations never lose
//! each other's update. Store calls run on tokio's blocking pool.

use crate::selection::highest_stake;
use crate::{Amount, ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Information about a validator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorRecord {
    /// Validator address, unique within the registry
    pub address: String,

    /// Amount staked. Never decreases through registration.
    pub stake: Amount,

    /// Base URL of the validator's API (answers `GET /ping`)
    #[serde(rename = "api_url")]
    pub api_endpoint: String,

    /// Liveness removal deletes records instead of clearing this flag
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl ValidatorRecord {
    /// Create an active record
    pub fn new(address: impl Into<String>, stake: Amount, api_endpoint: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stake,
            api_endpoint: api_endpoint.into(),
            active: true,
        }
    }
}

/// Durable storage for the validator set
pub trait ValidatorStore: Send + Sync + std::fmt::Debug {
    /// Load the full set. A missing snapshot is an empty set.
    fn load(&self) -> Result<Vec<ValidatorRecord>>;

    /// Replace the full set
    fn save(&self, validators: &[ValidatorRecord]) -> Result<()>;
}

/// JSON snapshot on disk, rewritten in full on every save
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the snapshot
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ValidatorStore for JsonFileStore {
    fn load(&self) -> Result<Vec<ValidatorRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            ConsensusError::StorageError(format!(
                "Failed to parse validator snapshot {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, validators: &[ValidatorRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let serialized = serde_json::to_string_pretty(validators)?;

        // Readers never see a half-written snapshot
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

/// In-memory store for tests and ephemeral nodes
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<Vec<ValidatorRecord>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with `records`
    pub fn with_records(records: Vec<ValidatorRecord>) -> Self {
        Self {
            records: std::sync::Mutex::new(records),
        }
    }
}

impl ValidatorStore for MemoryStore {
    fn load(&self) -> Result<Vec<ValidatorRecord>> {
        self.records
            .lock()
            .map(|records| records.clone())
            .map_err(|_| ConsensusError::StorageError("validator store lock poisoned".to_string()))
    }

    fn save(&self, validators: &[ValidatorRecord]) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ConsensusError::StorageError("validator store lock poisoned".to_string()))?;
        *records = validators.to_vec();
        Ok(())
    }
}

/// Set of registered validators
#[derive(Debug)]
pub struct ValidatorRegistry {
    store: Arc<dyn ValidatorStore>,
    lock: Mutex<()>,
}

impl ValidatorRegistry {
    /// Create a registry over `store`
    pub fn new(store: impl ValidatorStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<Vec<ValidatorRecord>> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.load())
            .await
            .map_err(|e| ConsensusError::StorageError(format!("validator load task failed: {e}")))?
    }

    async fn save(&self, validators: Vec<ValidatorRecord>) -> Result<()> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&validators))
            .await
            .map_err(|e| ConsensusError::StorageError(format!("validator save task failed: {e}")))?
    }

    /// Register a validator or raise an existing one's stake.
    ///
    /// Returns `false` without touching the store when `stake < min_stake`.
    /// For a known address the stake becomes `max(old, new)` and the endpoint
    /// is replaced.
    pub async fn register_or_update(
        &self,
        address: &str,
        stake: Amount,
        endpoint: &str,
        min_stake: Amount,
    ) -> Result<bool> {
        if stake < min_stake {
            debug!("Rejected validator {}: stake {} below minimum {}", address, stake, min_stake);
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        let mut validators = self.load().await?;

        if let Some(existing) = validators.iter_mut().find(|v| v.address == address) {
            existing.stake = existing.stake.max(stake);
            existing.api_endpoint = endpoint.to_string();
            info!("Updated validator {} (stake {}, endpoint {})", address, existing.stake, endpoint);
        } else {
            validators.push(ValidatorRecord::new(address, stake, endpoint));
            info!("Registered validator {} with stake {}", address, stake);
        }

        self.save(validators).await?;
        Ok(true)
    }

    /// Remove a validator; `false` if it was not registered
    pub async fn remove(&self, address: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;
        let validators = self.load().await?;
        let before = validators.len();

        let remaining: Vec<ValidatorRecord> = validators
            .into_iter()
            .filter(|v| v.address != address)
            .collect();

        if remaining.len() == before {
            return Ok(false);
        }

        self.save(remaining).await?;
        info!("Removed validator {}", address);
        Ok(true)
    }

    /// Look up a single record
    pub async fn get(&self, address: &str) -> Result<Option<ValidatorRecord>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_iter().find(|v| v.address == address))
    }

    /// Check if `address` is registered
    pub async fn is_registered(&self, address: &str) -> Result<bool> {
        Ok(self.get(address).await?.is_some())
    }

    /// The record's `active` flag; `false` when not registered
    pub async fn is_active(&self, address: &str) -> Result<bool> {
        Ok(self.get(address).await?.map_or(false, |v| v.active))
    }

    /// Address with the highest stake, ties to the smallest address
    pub async fn leader_by_stake(&self) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        let validators = self.load().await?;
        Ok(highest_stake(&validators).map(|v| v.address.clone()))
    }

    /// Every record in storage order
    pub async fn snapshot(&self) -> Result<Vec<ValidatorRecord>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Number of registered validators, active or not
    pub async fn count(&self) -> Result<usize> {
        Ok(self.snapshot().await?.len())
    }
}
