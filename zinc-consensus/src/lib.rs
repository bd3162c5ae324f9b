//! Zinc Consensus Layer - Minimal proof-of-stake ledger
//!
//! This crate implements the ledger store, the validator registry, stake-weighted
//! leader selection, the propose/vote/finalize state machine and the staking
//! reward schedule. Transport concerns (HTTP routes, key generation) live outside
//! and plug in through the capability traits in [`crypto`] and [`network`].

pub mod transaction;
pub mod chain;
pub mod validator;
pub mod selection;
pub mod consensus;
pub mod reward;
pub mod scheduler;
pub mod service;
pub mod network;
pub mod crypto;
pub mod clock;
pub mod config;
pub mod error;

pub use transaction::{Currency, Transaction, TransactionPool};
pub use chain::{Block, Ledger};
pub use validator::{JsonFileStore, MemoryStore, ValidatorRecord, ValidatorRegistry, ValidatorStore};
pub use consensus::{Candidate, ConsensusEngine, ConsensusState, FinalizeStatus};
pub use reward::{RewardEngine, StakerRecord};
pub use scheduler::{Scheduler, SchedulerHandle, SweepReport};
pub use service::{Balances, LedgerService, SubmitTransaction, TransferReceipt, TransferRequest};
pub use network::{BlockBroadcaster, LivenessProbe, NoopBroadcaster};
pub use crypto::{Secp256k1Verifier, SignatureVerifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChainConfig;
pub use error::{ConsensusError, ErrorKind};

use serde::{Deserialize, Serialize};

/// Result type for consensus operations
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Token amount.
///
/// Signed: `apply_block` does not re-check sufficiency, so a debit that
/// bypassed the transfer boundary shows up as a negative balance.
pub type Amount = i64;

/// Block index in the chain
pub type BlockIndex = u64;

/// Unix timestamp in seconds
pub type Timestamp = u64;

/// Consensus protocol version
pub const CONSENSUS_VERSION: &str = "0.1.0";

/// Initial ledger state applied when a chain is created
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisConfig {
    /// Native coin allocations (address, amount)
    #[serde(default)]
    pub native_allocations: Vec<(String, Amount)>,

    /// Fee-currency allocations (address, amount)
    #[serde(default)]
    pub fee_allocations: Vec<(String, Amount)>,

    /// Peers that receive finalized blocks (address, endpoint)
    #[serde(default)]
    pub peers: Vec<(String, String)>,
}

/// Network configuration constants
pub mod constants {
    use super::Amount;

    /// Validator identity recorded on the genesis block
    pub const GENESIS_VALIDATOR: &str = "genesis";

    /// Previous-hash placeholder of the genesis block
    pub const GENESIS_PREVIOUS_HASH: &str = "0";

    /// Sentinel sender for block rewards
    pub const REWARD_SENDER: &str = "ZINC_REWARD";

    /// Sentinel account staking yield is paid from
    pub const STAKING_POOL: &str = "staking_pool";

    /// Sentinel recipient for transfer fees
    pub const FEE_POOL: &str = "ainc_fee_pool";

    /// Signature placeholder on transactions the node creates itself
    pub const SYSTEM_SIGNATURE: &str = "reward_signature";

    /// Reward minted to the proposer of every finalized block
    pub const BLOCK_REWARD: Amount = 10;

    /// Fraction of registered validators that must approve a candidate
    pub const QUORUM_THRESHOLD: f64 = 0.66;

    /// Minimum stake accepted by the registry
    pub const MIN_VALIDATOR_STAKE: Amount = 1000;

    /// Minimum stake required to join through the node's public surface
    pub const MIN_JOIN_STAKE: Amount = 10_000;

    /// Seconds in a reward year
    pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 3600;
}
