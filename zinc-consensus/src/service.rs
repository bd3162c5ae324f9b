//! Operation surface of a Zinc node
//!
//! [`LedgerService`] is the context object the node's entry point owns and
//! hands to request handlers and the scheduler. It applies the caller-facing
//! checks (signatures, join stake, funds) before delegating to the ledger,
//! registry, consensus and reward components.

use crate::chain::{Block, Ledger};
use crate::clock::Clock;
use crate::config::ChainConfig;
use crate::consensus::{ConsensusEngine, FinalizeStatus};
use crate::constants::{FEE_POOL, SYSTEM_SIGNATURE};
use crate::crypto::SignatureVerifier;
use crate::network::{broadcast_block, BlockBroadcaster};
use crate::reward::{RewardEngine, StakerRecord};
use crate::transaction::{Currency, Transaction};
use crate::validator::{ValidatorRecord, ValidatorRegistry, ValidatorStore};
use crate::{Amount, ConsensusError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A signed transfer submitted by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTransaction {
    /// Sending address
    pub sender: String,
    /// Receiving address
    pub recipient: String,
    /// Amount moved
    pub amount: Amount,
    /// Hex signature over `"{sender}-{recipient}-{amount}"`
    pub signature: String,
    /// Hex public key of the sender
    pub public_key: String,
}

/// A transfer that pays a fee in the fee currency
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Sending address
    pub sender: String,
    /// Receiving address
    pub recipient: String,
    /// Amount moved
    pub amount: Amount,
    /// Hex signature over `"{sender}{recipient}{amount}"`
    pub signature: String,
    /// Hex public key of the sender
    pub public_key: String,
}

/// Queued transactions produced by a transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Id of the transfer itself
    pub txid: String,
    /// Fee charged in the fee currency (0 for fee-free senders)
    pub fee_charged: Amount,
    /// Id of the fee transaction, when a fee was charged
    pub fee_txid: Option<String>,
}

/// Both balances of one address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    /// Native coin
    pub native: Amount,
    /// Fee currency
    pub fee_currency: Amount,
}

/// Owns every consensus component of one node
pub struct LedgerService {
    config: ChainConfig,
    ledger: Arc<Ledger>,
    registry: Arc<ValidatorRegistry>,
    rewards: Arc<RewardEngine>,
    consensus: ConsensusEngine,
    verifier: Arc<dyn SignatureVerifier>,
    broadcaster: Arc<dyn BlockBroadcaster>,
}

impl std::fmt::Debug for LedgerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerService")
            .field("ledger", &self.ledger)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl LedgerService {
    /// Wire up a node from its configuration
    pub fn new(
        config: ChainConfig,
        store: impl ValidatorStore + 'static,
        verifier: Arc<dyn SignatureVerifier>,
        broadcaster: Arc<dyn BlockBroadcaster>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let ledger = Arc::new(Ledger::new(&config.genesis, clock.clone())?);
        let registry = Arc::new(ValidatorRegistry::new(store));
        let rewards = Arc::new(RewardEngine::new(
            config.rewards.clone(),
            config.consensus.block_reward,
            clock,
        ));
        let consensus = ConsensusEngine::new(
            ledger.clone(),
            registry.clone(),
            rewards.clone(),
            config.consensus.quorum_threshold,
        );

        Ok(Self {
            config,
            ledger,
            registry,
            rewards,
            consensus,
            verifier,
            broadcaster,
        })
    }

    /// Node configuration
    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Ledger store
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Validator registry
    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// Reward engine
    pub fn rewards(&self) -> &Arc<RewardEngine> {
        &self.rewards
    }

    /// Consensus engine
    pub fn consensus(&self) -> &ConsensusEngine {
        &self.consensus
    }

    /// Verify a client transaction and queue it
    pub async fn submit_transaction(&self, request: SubmitTransaction) -> Result<String> {
        if request.sender.is_empty()
            || request.recipient.is_empty()
            || request.signature.is_empty()
            || request.public_key.is_empty()
        {
            return Err(ConsensusError::MalformedTransaction(
                "Missing transaction fields".to_string(),
            ));
        }

        let message = format!("{}-{}-{}", request.sender, request.recipient, request.amount);
        if !self.verifier.verify(&request.public_key, &message, &request.signature) {
            return Err(ConsensusError::InvalidSignature);
        }

        let tx = Transaction::new(
            request.sender,
            request.recipient,
            request.amount,
            request.signature,
            self.ledger.clock().now(),
        )?;
        self.ledger.submit_transaction(tx).await
    }

    /// Register a validator through the public surface, gated at the join stake
    pub async fn register_or_update_validator(
        &self,
        address: &str,
        stake: Amount,
        endpoint: &str,
    ) -> Result<bool> {
        if address.is_empty() || endpoint.is_empty() {
            return Err(ConsensusError::MalformedTransaction(
                "Missing address or endpoint".to_string(),
            ));
        }

        self.registry
            .register_or_update(address, stake, endpoint, self.config.registry.min_join_stake)
            .await
    }

    /// Remove a validator; `false` if it was not registered
    pub async fn remove_validator(&self, address: &str) -> Result<bool> {
        self.registry.remove(address).await
    }

    /// Every registered validator
    pub async fn list_validators(&self) -> Result<Vec<ValidatorRecord>> {
        self.registry.snapshot().await
    }

    /// Accept a block announced by another validator.
    ///
    /// Returns `false` for a re-delivery of a block already in the chain.
    pub async fn receive_block(&self, sender: &str, block: Block) -> Result<bool> {
        if !self.registry.is_registered(sender).await? {
            warn!("Rejected block #{} from unregistered sender {}", block.index, sender);
            return Err(ConsensusError::UnknownValidator(sender.to_string()));
        }

        if let Some(existing) = self.ledger.get_block(block.index).await {
            if existing.hash == block.hash {
                return Ok(false);
            }
        }

        match self.ledger.import_block(block).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("Rejected block from {}: {}", sender, e);
                Err(e)
            }
        }
    }

    /// Propose a block from the mempool
    pub async fn propose_block(&self) -> Result<Block> {
        self.consensus.propose().await
    }

    /// Cast a vote on the pending candidate
    pub async fn vote(&self, validator: &str, approve: bool) -> Result<()> {
        self.consensus.vote(validator, approve).await
    }

    /// Finalize the candidate if quorum is reached, then announce it to peers
    pub async fn check_and_finalize(&self) -> Result<FinalizeStatus> {
        let status = self.consensus.check_and_finalize().await?;
        if let FinalizeStatus::Finalized(block) = &status {
            self.announce(block).await;
        }
        Ok(status)
    }

    /// Drop the pending candidate
    pub async fn reset_consensus(&self) {
        self.consensus.reset().await;
    }

    /// Both balances of `address`
    pub async fn get_balance(&self, address: &str) -> Balances {
        Balances {
            native: self.ledger.get_balance(address).await,
            fee_currency: self.ledger.get_fee_balance(address).await,
        }
    }

    /// Claim staking yield, credited from the staking pool immediately
    pub async fn claim_reward(&self, address: &str) -> Result<Amount> {
        self.rewards.claim(&self.ledger, address).await
    }

    /// Staking position of `address`
    pub async fn get_stake_info(&self, address: &str) -> StakerRecord {
        self.rewards.get_stake_info(address).await
    }

    /// Transfer native coin, charging a fee-currency fee unless the sender
    /// has enough reward stake.
    ///
    /// Funds are checked here, not when the block is applied.
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferReceipt> {
        if request.amount <= 0 {
            return Err(ConsensusError::MalformedTransaction(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }

        let message = format!("{}{}{}", request.sender, request.recipient, request.amount);
        if !self.verifier.verify(&request.public_key, &message, &request.signature) {
            return Err(ConsensusError::InvalidSignature);
        }

        let available = self.ledger.get_balance(&request.sender).await;
        if available < request.amount {
            return Err(ConsensusError::InsufficientBalance {
                needed: request.amount,
                available,
            });
        }

        let staked = self.rewards.get_stake_info(&request.sender).await.amount;
        let fee = if staked >= self.config.transfer.free_transfer_stake {
            0
        } else {
            self.transfer_fee(request.amount)
        };

        if fee > 0 {
            let available = self.ledger.get_fee_balance(&request.sender).await;
            if available < fee {
                return Err(ConsensusError::InsufficientFeeBalance {
                    needed: fee,
                    available,
                });
            }
        }

        let now = self.ledger.clock().now();
        let transfer = Transaction::new(
            request.sender.clone(),
            request.recipient,
            request.amount,
            request.signature,
            now,
        )?;
        let txid = self.ledger.submit_transaction(transfer).await?;

        let fee_txid = if fee > 0 {
            let charge = Transaction::with_currency(
                request.sender,
                FEE_POOL,
                fee,
                SYSTEM_SIGNATURE,
                now,
                Currency::Fee,
            )?;
            Some(self.ledger.submit_transaction(charge).await?)
        } else {
            None
        };

        Ok(TransferReceipt {
            txid,
            fee_charged: fee,
            fee_txid,
        })
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn transfer_fee(&self, amount: Amount) -> Amount {
        (amount as f64 * self.config.transfer.fee_rate).ceil() as Amount
    }

    /// Lock native balance as stake in both the ledger and the reward engine
    pub async fn stake(&self, address: &str, amount: Amount) -> Result<()> {
        self.ledger.stake(address, amount).await?;
        self.rewards.stake(address, amount).await?;
        info!("{} staked {}", address, amount);
        Ok(())
    }

    /// Forge a block from the ledger's stake table and announce it
    pub async fn forge_block(&self) -> Result<Block> {
        let block = self.ledger.forge_block(self.rewards.block_reward()).await?;
        self.announce(&block).await;
        Ok(block)
    }

    /// Register a peer that receives committed blocks
    pub async fn add_peer(&self, address: &str, endpoint: &str) {
        self.ledger.add_peer(address, endpoint).await;
    }

    async fn announce(&self, block: &Block) {
        let endpoints = self.ledger.peer_endpoints().await;
        if endpoints.is_empty() {
            return;
        }

        let timeout = Duration::from_secs(self.config.scheduler.broadcast_timeout_secs);
        let delivered = broadcast_block(self.broadcaster.as_ref(), &endpoints, block, timeout).await;
        info!(
            "Broadcast block #{} to {}/{} peers",
            block.index,
            delivered,
            endpoints.len()
        );
    }
}
