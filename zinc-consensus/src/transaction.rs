//! Transfer transactions and the pending-transaction pool

use crate::crypto::content_hash;
use crate::{Amount, ConsensusError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Balance a transaction moves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    /// Native ZINC coin
    #[default]
    Native,
    /// Secondary fee currency (AINC)
    Fee,
}

impl Currency {
    fn is_native(&self) -> bool {
        *self == Currency::Native
    }
}

/// A transfer between two addresses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    /// Sending address
    pub sender: String,

    /// Receiving address
    pub recipient: String,

    /// Amount moved
    pub amount: Amount,

    /// Sender's signature (hex), opaque to the ledger
    pub signature: String,

    /// Creation time
    pub timestamp: Timestamp,

    /// Which balance map the transfer touches
    #[serde(default, skip_serializing_if = "Currency::is_native")]
    pub currency: Currency,

    /// Content hash of the body, see [`Transaction::compute_id`]
    pub id: String,
}

/// Fields that make up a transaction's identity
#[derive(Serialize)]
struct TransactionBody<'a> {
    sender: &'a str,
    recipient: &'a str,
    amount: Amount,
    timestamp: Timestamp,
    #[serde(skip_serializing_if = "Currency::is_native")]
    currency: Currency,
}

impl Transaction {
    /// Create a native-coin transaction and fingerprint it
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: Amount,
        signature: impl Into<String>,
        timestamp: Timestamp,
    ) -> Result<Self> {
        Self::with_currency(sender, recipient, amount, signature, timestamp, Currency::Native)
    }

    /// Create a transaction in the given currency
    pub fn with_currency(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: Amount,
        signature: impl Into<String>,
        timestamp: Timestamp,
        currency: Currency,
    ) -> Result<Self> {
        let mut tx = Self {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            signature: signature.into(),
            timestamp,
            currency,
            id: String::new(),
        };
        tx.id = tx.compute_id()?;
        Ok(tx)
    }

    /// Hash of the canonical body (signature and id excluded)
    pub fn compute_id(&self) -> Result<String> {
        content_hash(&TransactionBody {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: self.timestamp,
            currency: self.currency,
        })
    }

    /// Structural checks applied before a transaction may enter the pool
    pub fn validate(&self) -> Result<()> {
        if self.sender.trim().is_empty() {
            return Err(ConsensusError::MalformedTransaction("missing sender".to_string()));
        }
        if self.recipient.trim().is_empty() {
            return Err(ConsensusError::MalformedTransaction("missing recipient".to_string()));
        }
        if self.amount <= 0 {
            return Err(ConsensusError::MalformedTransaction(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.id != self.compute_id()? {
            return Err(ConsensusError::MalformedTransaction(
                "id does not match transaction body".to_string(),
            ));
        }
        Ok(())
    }
}

/// Pool of submitted, not-yet-included transactions in submission order
#[derive(Debug, Default)]
pub struct TransactionPool {
    pending: VecDeque<Transaction>,
}

impl TransactionPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transaction. No deduplication within the pool.
    pub fn add_transaction(&mut self, tx: Transaction) {
        self.pending.push_back(tx);
    }

    /// Take every pending transaction, leaving the pool empty
    pub fn drain(&mut self) -> Vec<Transaction> {
        self.pending.drain(..).collect()
    }

    /// Drop everything still pending, returning how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Get pending transaction count
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Check whether anything is pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Copy of the pending transactions in order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.pending.iter().cloned().collect()
    }
}
