//! Error types for the consensus system

use thiserror::Error;

/// Failure classes surfaced at the operation boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input or bad signature
    Validation,
    /// Caller is not a registered or active validator
    Authorization,
    /// Operation does not fit the current consensus state
    StateConflict,
    /// Transfer exceeds a balance
    InsufficientFunds,
    /// Received block failed hash or chain-link checks
    Integrity,
    /// Storage, serialization, configuration or network trouble
    Internal,
}

#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error("Malformed transaction: {0}")]
    MalformedTransaction(String),

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Not a valid or active validator")]
    NotAValidator,

    #[error("Not a registered validator: {0}")]
    UnknownValidator(String),

    #[error("Validator is not active: {0}")]
    InactiveValidator(String),

    #[error("Block already proposed")]
    BlockAlreadyProposed,

    #[error("No block proposed yet")]
    NoPendingBlock,

    #[error("No transactions to include in block")]
    NothingToPropose,

    #[error("No validators registered")]
    NoValidatorsRegistered,

    #[error("Insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: i64, available: i64 },

    #[error("Insufficient fee balance: need {needed}, have {available}")]
    InsufficientFeeBalance { needed: i64, available: i64 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    /// Carries the offending transaction id, or the address for mints and payouts
    #[error("Balance overflow applying {0}")]
    BalanceOverflow(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ConsensusError {
    /// Classify the error into its taxonomy bucket
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::MalformedTransaction(_)
            | ConsensusError::InvalidSignature
            | ConsensusError::DuplicateTransaction(_) => ErrorKind::Validation,

            ConsensusError::NotAValidator
            | ConsensusError::UnknownValidator(_)
            | ConsensusError::InactiveValidator(_) => ErrorKind::Authorization,

            ConsensusError::BlockAlreadyProposed
            | ConsensusError::NoPendingBlock
            | ConsensusError::NothingToPropose
            | ConsensusError::NoValidatorsRegistered => ErrorKind::StateConflict,

            ConsensusError::InsufficientBalance { .. }
            | ConsensusError::InsufficientFeeBalance { .. } => ErrorKind::InsufficientFunds,

            ConsensusError::InvalidBlock(_) | ConsensusError::BalanceOverflow(_) => ErrorKind::Integrity,

            ConsensusError::StorageError(_)
            | ConsensusError::ConfigurationError(_)
            | ConsensusError::NetworkError(_)
            | ConsensusError::SerializationError(_)
            | ConsensusError::IoError(_) => ErrorKind::Internal,
        }
    }

    /// Check if retrying later may succeed without caller changes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConsensusError::NothingToPropose
                | ConsensusError::NoPendingBlock
                | ConsensusError::BlockAlreadyProposed
                | ConsensusError::NetworkError(_)
                | ConsensusError::IoError(_)
        )
    }

    /// Check if error is authorization related
    pub fn is_authorization_error(&self) -> bool {
        self.kind() == ErrorKind::Authorization
    }
}
