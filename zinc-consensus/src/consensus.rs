//! Consensus engine for the Zinc chain
//!
//! A single in-flight candidate moves through propose, vote and finalize.
//! Finalization is evaluated only when [`ConsensusEngine::check_and_finalize`]
//! runs, never on the vote that happens to reach quorum, so commit timing
//! follows the scheduler. A candidate that never reaches quorum waits until it
//! does or until [`ConsensusEngine::reset`] is called.

use crate::chain::{Block, Ledger};
use crate::reward::RewardEngine;
use crate::validator::ValidatorRegistry;
use crate::{ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current state of the consensus engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusState {
    /// No candidate; a block may be proposed
    Idle,

    /// A candidate is collecting votes
    Proposed,
}

/// A proposed block and the votes cast on it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    /// The proposed block
    pub block: Block,

    /// Latest vote per validator address
    pub votes: BTreeMap<String, bool>,
}

impl Candidate {
    fn new(block: Block) -> Self {
        Self {
            block,
            votes: BTreeMap::new(),
        }
    }

    /// Number of approving votes
    pub fn yes_votes(&self) -> usize {
        self.votes.values().filter(|approve| **approve).count()
    }
}

/// Outcome of a finalization check
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeStatus {
    /// No candidate was pending
    NothingPending,

    /// Quorum not reached; the candidate is unchanged
    Waiting {
        /// Approving votes so far
        yes: usize,
        /// Registered validators at the time of the check
        total: usize,
    },

    /// The candidate was committed
    Finalized(Block),
}

/// The propose/vote/finalize state machine
#[derive(Debug)]
pub struct ConsensusEngine {
    ledger: Arc<Ledger>,
    registry: Arc<ValidatorRegistry>,
    rewards: Arc<RewardEngine>,
    quorum_threshold: f64,
    candidate: Mutex<Option<Candidate>>,
}

impl ConsensusEngine {
    /// Create an idle engine
    pub fn new(
        ledger: Arc<Ledger>,
        registry: Arc<ValidatorRegistry>,
        rewards: Arc<RewardEngine>,
        quorum_threshold: f64,
    ) -> Self {
        Self {
            ledger,
            registry,
            rewards,
            quorum_threshold,
            candidate: Mutex::new(None),
        }
    }

    /// Get current consensus state
    pub async fn state(&self) -> ConsensusState {
        if self.candidate.lock().await.is_some() {
            ConsensusState::Proposed
        } else {
            ConsensusState::Idle
        }
    }

    /// Copy of the pending candidate, if any
    pub async fn candidate(&self) -> Option<Candidate> {
        self.candidate.lock().await.clone()
    }

    /// Propose a block from the whole mempool.
    ///
    /// The proposer is the registry's highest-stake validator. Fails with
    /// `BlockAlreadyProposed` while a candidate is pending, `NotAValidator`
    /// when there is no active leader, and `NothingToPropose` on an empty
    /// mempool. The mempool is only drained once every check has passed.
    pub async fn propose(&self) -> Result<Block> {
        let mut candidate = self.candidate.lock().await;
        if candidate.is_some() {
            return Err(ConsensusError::BlockAlreadyProposed);
        }

        let leader = match self.registry.leader_by_stake().await? {
            Some(address) if self.registry.is_active(&address).await? => address,
            _ => return Err(ConsensusError::NotAValidator),
        };

        if !self.ledger.has_pending().await {
            return Err(ConsensusError::NothingToPropose);
        }

        let transactions = self.ledger.drain_mempool().await;
        let last = self.ledger.last_block().await?;
        let block = Block::new(
            last.index + 1,
            last.hash,
            self.ledger.clock().now(),
            transactions,
            leader,
        )?;

        info!(
            "Block #{} proposed by validator {} with {} transactions",
            block.index,
            block.validator,
            block.transactions.len()
        );
        *candidate = Some(Candidate::new(block.clone()));
        Ok(block)
    }

    /// Record a validator's vote on the pending candidate. Last vote wins.
    pub async fn vote(&self, validator: &str, approve: bool) -> Result<()> {
        if !self.registry.is_registered(validator).await? {
            return Err(ConsensusError::UnknownValidator(validator.to_string()));
        }

        let mut guard = self.candidate.lock().await;
        let candidate = guard.as_mut().ok_or(ConsensusError::NoPendingBlock)?;

        candidate.votes.insert(validator.to_string(), approve);
        info!(
            "Validator {} voted {} on block #{}",
            validator,
            if approve { "yes" } else { "no" },
            candidate.block.index
        );
        Ok(())
    }

    /// Commit the candidate if approvals reach the quorum threshold.
    ///
    /// The denominator is every registered validator, whether or not it voted.
    /// On commit the block is applied, the rest of the mempool is dropped and
    /// the proposer receives the block reward.
    #[allow(clippy::cast_precision_loss)]
    pub async fn check_and_finalize(&self) -> Result<FinalizeStatus> {
        let mut guard = self.candidate.lock().await;
        let Some(candidate) = guard.as_ref() else {
            debug!("No pending block");
            return Ok(FinalizeStatus::NothingPending);
        };

        let total = self.registry.count().await?;
        if total == 0 {
            return Err(ConsensusError::NoValidatorsRegistered);
        }

        let yes = candidate.yes_votes();
        if (yes as f64) / (total as f64) < self.quorum_threshold {
            info!(
                "Block #{} waiting for more votes ({}/{})",
                candidate.block.index, yes, total
            );
            return Ok(FinalizeStatus::Waiting { yes, total });
        }

        let Some(candidate) = guard.take() else {
            return Ok(FinalizeStatus::NothingPending);
        };
        let block = candidate.block;

        if let Err(e) = self.ledger.apply_block(block.clone()).await {
            warn!("Discarding candidate #{}: {}", block.index, e);
            self.ledger.requeue_rejected(block.transactions, &e).await;
            return Err(e);
        }

        let dropped = self.ledger.clear_mempool().await;
        if dropped > 0 {
            warn!(
                "Dropped {} transactions submitted while block #{} was pending",
                dropped, block.index
            );
        }

        if let Err(e) = self.rewards.credit_block_reward(&self.ledger, &block.validator).await {
            warn!("Block #{} finalized without reward: {}", block.index, e);
        }

        info!("Block #{} finalized with {}/{} votes", block.index, yes, total);
        Ok(FinalizeStatus::Finalized(block))
    }

    /// Discard any candidate and its votes
    pub async fn reset(&self) {
        if let Some(candidate) = self.candidate.lock().await.take() {
            info!(
                "Reset consensus, discarded block #{} with {} transactions",
                candidate.block.index,
                candidate.block.transactions.len()
            );
        }
    }
}
