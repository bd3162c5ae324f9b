//! Blockchain data structures and the ledger store

use crate::clock::Clock;
use crate::constants::{GENESIS_PREVIOUS_HASH, GENESIS_VALIDATOR, REWARD_SENDER};
use crate::crypto::content_hash;
use crate::selection::select_weighted_random;
use crate::transaction::{Currency, Transaction, TransactionPool};
use crate::{Amount, BlockIndex, ConsensusError, GenesisConfig, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// A block in the Zinc chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    /// Position in the chain (0 for genesis)
    pub index: BlockIndex,

    /// Hash of the block at `index - 1`
    pub previous_hash: String,

    /// Creation time
    pub timestamp: Timestamp,

    /// Transactions in inclusion order
    pub transactions: Vec<Transaction>,

    /// Address of the proposer
    pub validator: String,

    /// Content hash over every other field
    pub hash: String,
}

/// Hashed portion of a block
#[derive(Serialize)]
struct BlockBody<'a> {
    index: BlockIndex,
    previous_hash: &'a str,
    timestamp: Timestamp,
    transactions: &'a [Transaction],
    validator: &'a str,
}

impl Block {
    /// Create a block and compute its hash
    pub fn new(
        index: BlockIndex,
        previous_hash: impl Into<String>,
        timestamp: Timestamp,
        transactions: Vec<Transaction>,
        validator: impl Into<String>,
    ) -> Result<Self> {
        let mut block = Block {
            index,
            previous_hash: previous_hash.into(),
            timestamp,
            transactions,
            validator: validator.into(),
            hash: String::new(),
        };
        block.hash = block.compute_hash()?;
        Ok(block)
    }

    /// Create the genesis block
    pub fn genesis(timestamp: Timestamp) -> Result<Self> {
        Self::new(0, GENESIS_PREVIOUS_HASH, timestamp, Vec::new(), GENESIS_VALIDATOR)
    }

    /// Recompute the hash from the block's fields
    pub fn compute_hash(&self) -> Result<String> {
        content_hash(&BlockBody {
            index: self.index,
            previous_hash: &self.previous_hash,
            timestamp: self.timestamp,
            transactions: &self.transactions,
            validator: &self.validator,
        })
    }

    /// Check the stored hash against a recomputed one and run
    /// [`Transaction::validate`] on every transaction
    pub fn verify_integrity(&self) -> Result<()> {
        if self.hash != self.compute_hash()? {
            return Err(ConsensusError::InvalidBlock(format!(
                "hash mismatch for block {}",
                self.index
            )));
        }

        for tx in &self.transactions {
            tx.validate().map_err(|e| {
                ConsensusError::InvalidBlock(format!("block {}: transaction {}: {}", self.index, tx.id, e))
            })?;
        }

        Ok(())
    }

    /// Check that this block extends `previous`
    pub fn validate_link(&self, previous: &Block) -> Result<()> {
        if self.index != previous.index + 1 {
            return Err(ConsensusError::InvalidBlock(format!(
                "Invalid index: expected {}, got {}",
                previous.index + 1,
                self.index
            )));
        }

        if self.previous_hash != previous.hash {
            return Err(ConsensusError::InvalidBlock("Invalid previous hash".to_string()));
        }

        Ok(())
    }
}

/// Mutable ledger state guarded by one lock
#[derive(Debug, Default)]
struct LedgerState {
    chain: Vec<Block>,
    balances: HashMap<String, Amount>,
    fee_balances: HashMap<String, Amount>,
    stakes: BTreeMap<String, Amount>,
    peers: BTreeMap<String, String>,
    finalized_ids: HashSet<String>,
    total_minted: Amount,
}

impl LedgerState {
    fn last_block(&self) -> Result<&Block> {
        self.chain
            .last()
            .ok_or_else(|| ConsensusError::InvalidBlock("chain has no genesis block".to_string()))
    }

    fn book(&self, currency: Currency) -> &HashMap<String, Amount> {
        match currency {
            Currency::Native => &self.balances,
            Currency::Fee => &self.fee_balances,
        }
    }

    fn book_mut(&mut self, currency: Currency) -> &mut HashMap<String, Amount> {
        match currency {
            Currency::Native => &mut self.balances,
            Currency::Fee => &mut self.fee_balances,
        }
    }

    fn staged_balance<'a>(
        &self,
        staged: &HashMap<(Currency, &'a str), Amount>,
        currency: Currency,
        address: &'a str,
    ) -> Amount {
        staged
            .get(&(currency, address))
            .copied()
            .unwrap_or_else(|| self.book(currency).get(address).copied().unwrap_or(0))
    }

    /// Apply transfers and append. The chain link must already be checked.
    ///
    /// Every balance change is computed before any is written, so an overflow
    /// rejects the whole block and leaves the state untouched.
    fn commit(&mut self, block: Block) -> Result<()> {
        let mut staged: HashMap<(Currency, &str), Amount> = HashMap::new();

        for tx in &block.transactions {
            // Sufficiency is checked at the transfer boundary, not here
            let debited = self
                .staged_balance(&staged, tx.currency, &tx.sender)
                .checked_sub(tx.amount)
                .ok_or_else(|| ConsensusError::BalanceOverflow(tx.id.clone()))?;
            staged.insert((tx.currency, tx.sender.as_str()), debited);

            let credited = self
                .staged_balance(&staged, tx.currency, &tx.recipient)
                .checked_add(tx.amount)
                .ok_or_else(|| ConsensusError::BalanceOverflow(tx.id.clone()))?;
            staged.insert((tx.currency, tx.recipient.as_str()), credited);
        }

        for ((currency, address), amount) in staged {
            self.book_mut(currency).insert(address.to_string(), amount);
        }
        self.finalized_ids
            .extend(block.transactions.iter().map(|tx| tx.id.clone()));
        self.chain.push(block);
        Ok(())
    }

    fn mint(&mut self, recipient: &str, amount: Amount) -> Result<()> {
        let balance = self.balances.get(recipient).copied().unwrap_or(0).checked_add(amount);
        let minted = self.total_minted.checked_add(amount);
        let (Some(balance), Some(minted)) = (balance, minted) else {
            return Err(ConsensusError::BalanceOverflow(recipient.to_string()));
        };

        self.balances.insert(recipient.to_string(), balance);
        self.total_minted = minted;
        Ok(())
    }
}

/// The chain, balances, stakes, peers and mempool
#[derive(Debug)]
pub struct Ledger {
    state: RwLock<LedgerState>,
    mempool: Mutex<TransactionPool>,
    clock: Arc<dyn Clock>,
}

impl Ledger {
    /// Create a ledger with a genesis block and the configured allocations
    pub fn new(genesis: &GenesisConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let mut state = LedgerState::default();
        state.chain.push(Block::genesis(clock.now())?);

        for (currency, allocations) in [
            (Currency::Native, &genesis.native_allocations),
            (Currency::Fee, &genesis.fee_allocations),
        ] {
            for (address, amount) in allocations {
                let book = state.book_mut(currency);
                let balance = book.get(address).copied().unwrap_or(0);
                let total = balance.checked_add(*amount).ok_or_else(|| {
                    ConsensusError::ConfigurationError(format!("genesis allocation to {address} overflows"))
                })?;
                book.insert(address.clone(), total);
            }
        }
        for (address, endpoint) in &genesis.peers {
            state.peers.insert(address.clone(), endpoint.clone());
        }

        Ok(Self {
            state: RwLock::new(state),
            mempool: Mutex::new(TransactionPool::new()),
            clock,
        })
    }

    /// Time source shared with block builders
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Queue a transaction for the next block.
    ///
    /// Rejects malformed transactions and ids that are already finalized.
    /// Transactions still pending are not deduplicated.
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<String> {
        tx.validate()?;

        if self.state.read().await.finalized_ids.contains(&tx.id) {
            return Err(ConsensusError::DuplicateTransaction(tx.id));
        }

        let id = tx.id.clone();
        self.mempool.lock().await.add_transaction(tx);
        debug!("Queued transaction {}", id);
        Ok(id)
    }

    /// Take the whole mempool in submission order
    pub async fn drain_mempool(&self) -> Vec<Transaction> {
        self.mempool.lock().await.drain()
    }

    /// Put transactions back at the head of the mempool, ahead of newer ones
    pub async fn requeue_front(&self, transactions: Vec<Transaction>) {
        let mut pool = self.mempool.lock().await;
        let newer = pool.drain();
        for tx in transactions.into_iter().chain(newer) {
            pool.add_transaction(tx);
        }
    }

    /// Drop everything pending, returning the count dropped
    pub async fn clear_mempool(&self) -> usize {
        self.mempool.lock().await.clear()
    }

    /// Check for pending transactions without draining
    pub async fn has_pending(&self) -> bool {
        !self.mempool.lock().await.is_empty()
    }

    /// Number of pending transactions
    pub async fn pending_count(&self) -> usize {
        self.mempool.lock().await.pending_count()
    }

    /// Copy of the mempool in order
    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.mempool.lock().await.snapshot()
    }

    /// Return a rejected block's transactions to the head of the mempool.
    ///
    /// The transaction named by a [`ConsensusError::BalanceOverflow`] is
    /// dropped; it would fail again.
    pub async fn requeue_rejected(&self, transactions: Vec<Transaction>, error: &ConsensusError) {
        let retry = transactions
            .into_iter()
            .filter(|tx| !matches!(error, ConsensusError::BalanceOverflow(id) if *id == tx.id))
            .collect();
        self.requeue_front(retry).await;
    }

    /// Apply a block's transfers and append it.
    ///
    /// The block must extend the current tip; the check and the append happen
    /// under one write lock. Balances are not re-checked, so a debit may go
    /// negative. A block that would overflow a balance is rejected whole.
    pub async fn apply_block(&self, block: Block) -> Result<()> {
        let mut state = self.state.write().await;
        block.validate_link(state.last_block()?)?;

        let (index, count, validator) = (block.index, block.transactions.len(), block.validator.clone());
        state.commit(block)?;
        info!("Appended block {} ({} transactions) by {}", index, count, validator);
        Ok(())
    }

    /// Verify a block from another node and append it.
    ///
    /// Recomputes the block hash, validates every transaction, checks the
    /// chain link, and refuses transactions that were already finalized or
    /// repeat within the block. Nothing is applied unless every check passes.
    pub async fn import_block(&self, block: Block) -> Result<()> {
        block.verify_integrity()?;

        let mut seen = HashSet::new();
        if let Some(tx) = block.transactions.iter().find(|tx| !seen.insert(tx.id.as_str())) {
            return Err(ConsensusError::InvalidBlock(format!(
                "transaction {} repeated in block {}",
                tx.id, block.index
            )));
        }

        let mut state = self.state.write().await;
        block.validate_link(state.last_block()?)?;

        if let Some(tx) = block
            .transactions
            .iter()
            .find(|tx| state.finalized_ids.contains(&tx.id))
        {
            return Err(ConsensusError::InvalidBlock(format!(
                "transaction {} already finalized",
                tx.id
            )));
        }

        let (index, validator) = (block.index, block.validator.clone());
        state.commit(block)?;
        info!("Imported block {} from {}", index, validator);
        Ok(())
    }

    /// Mint new native coin from the reward sentinel. No cap is enforced.
    pub async fn mint(&self, recipient: &str, amount: Amount) -> Result<()> {
        self.state.write().await.mint(recipient, amount)?;
        debug!("Minted {} from {} to {}", amount, REWARD_SENDER, recipient);
        Ok(())
    }

    /// Move native coin out of a system account such as the staking pool.
    ///
    /// The source may go negative. Both balances change or neither does.
    pub async fn pay_out(&self, source: &str, recipient: &str, amount: Amount) -> Result<()> {
        let mut state = self.state.write().await;
        let overflow = || ConsensusError::BalanceOverflow(recipient.to_string());

        let debited = state
            .balances
            .get(source)
            .copied()
            .unwrap_or(0)
            .checked_sub(amount)
            .ok_or_else(overflow)?;
        let before = if source == recipient {
            debited
        } else {
            state.balances.get(recipient).copied().unwrap_or(0)
        };
        let credited = before.checked_add(amount).ok_or_else(overflow)?;

        state.balances.insert(source.to_string(), debited);
        state.balances.insert(recipient.to_string(), credited);
        debug!("Paid {} from {} to {}", amount, source, recipient);
        Ok(())
    }

    /// Move native balance into the ledger stake table
    pub async fn stake(&self, address: &str, amount: Amount) -> Result<()> {
        if amount <= 0 {
            return Err(ConsensusError::MalformedTransaction(format!(
                "stake must be positive, got {amount}"
            )));
        }

        let mut state = self.state.write().await;
        let available = state.balances.get(address).copied().unwrap_or(0);
        if available < amount {
            return Err(ConsensusError::InsufficientBalance {
                needed: amount,
                available,
            });
        }

        let staked = state
            .stakes
            .get(address)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| ConsensusError::BalanceOverflow(address.to_string()))?;
        state.balances.insert(address.to_string(), available - amount);
        state.stakes.insert(address.to_string(), staked);
        info!("{} staked {} on the ledger", address, amount);
        Ok(())
    }

    /// Forge a block directly from the ledger's stake table.
    ///
    /// The proposer is drawn with weighted-random selection; the whole mempool
    /// is included and `reward` is minted to the proposer.
    pub async fn forge_block(&self, reward: Amount) -> Result<Block> {
        self.forge_block_with(reward, |stakes| {
            select_weighted_random(stakes, &mut rand::thread_rng())
        })
        .await
    }

    /// [`Ledger::forge_block`] with a caller-supplied proposer choice.
    ///
    /// If the block is rejected its transactions go back to the mempool.
    pub async fn forge_block_with<F>(&self, reward: Amount, choose: F) -> Result<Block>
    where
        F: FnOnce(&BTreeMap<String, Amount>) -> String,
    {
        let transactions = self.drain_mempool().await;

        let forged = {
            let mut state = self.state.write().await;
            Self::forge_locked(&mut state, self.clock.now(), transactions.clone(), reward, choose)
        };

        if let Err(e) = &forged {
            warn!("Forging failed: {}", e);
            self.requeue_rejected(transactions, e).await;
        }
        forged
    }

    fn forge_locked<F>(
        state: &mut LedgerState,
        now: Timestamp,
        transactions: Vec<Transaction>,
        reward: Amount,
        choose: F,
    ) -> Result<Block>
    where
        F: FnOnce(&BTreeMap<String, Amount>) -> String,
    {
        let validator = choose(&state.stakes);
        let (index, previous_hash) = {
            let last = state.last_block()?;
            (last.index + 1, last.hash.clone())
        };

        let block = Block::new(index, previous_hash, now, transactions, validator.clone())?;
        state.commit(block.clone())?;
        if let Err(e) = state.mint(&validator, reward) {
            warn!("Block {} forged without reward: {}", block.index, e);
        }

        info!("Forged block {} with validator {}", block.index, validator);
        Ok(block)
    }

    /// Get native balance
    pub async fn get_balance(&self, address: &str) -> Amount {
        self.state.read().await.balances.get(address).copied().unwrap_or(0)
    }

    /// Get fee-currency balance
    pub async fn get_fee_balance(&self, address: &str) -> Amount {
        self.state.read().await.fee_balances.get(address).copied().unwrap_or(0)
    }

    /// Get ledger stake
    pub async fn get_stake(&self, address: &str) -> Amount {
        self.state.read().await.stakes.get(address).copied().unwrap_or(0)
    }

    /// Copy of the stake table in address order
    pub async fn stakes(&self) -> BTreeMap<String, Amount> {
        self.state.read().await.stakes.clone()
    }

    /// Total coin created by block rewards
    pub async fn total_minted(&self) -> Amount {
        self.state.read().await.total_minted
    }

    /// Whether `id` belongs to a finalized transaction
    pub async fn is_finalized(&self, id: &str) -> bool {
        self.state.read().await.finalized_ids.contains(id)
    }

    /// Number of blocks including genesis
    pub async fn chain_len(&self) -> usize {
        self.state.read().await.chain.len()
    }

    /// Latest block
    pub async fn last_block(&self) -> Result<Block> {
        self.state.read().await.last_block().cloned()
    }

    /// Get block by index
    pub async fn get_block(&self, index: BlockIndex) -> Option<Block> {
        let state = self.state.read().await;
        usize::try_from(index).ok().and_then(|i| state.chain.get(i).cloned())
    }

    /// Copy of the whole chain
    pub async fn chain(&self) -> Vec<Block> {
        self.state.read().await.chain.clone()
    }

    /// Register a peer that receives finalized blocks
    pub async fn add_peer(&self, address: &str, endpoint: &str) {
        self.state
            .write()
            .await
            .peers
            .insert(address.to_string(), endpoint.to_string());
    }

    /// Forget a peer
    pub async fn remove_peer(&self, address: &str) -> bool {
        self.state.write().await.peers.remove(address).is_some()
    }

    /// Peer endpoints in address order
    pub async fn peer_endpoints(&self) -> Vec<String> {
        self.state.read().await.peers.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::selection::select_weighted;

    fn ledger_with(native: &[(&str, Amount)]) -> Ledger {
        let genesis = GenesisConfig {
            native_allocations: native.iter().map(|(a, n)| ((*a).to_string(), *n)).collect(),
            fee_allocations: vec![("alice".to_string(), 50)],
            peers: Vec::new(),
        };
        Ledger::new(&genesis, Arc::new(ManualClock::new(1_700_000_000))).unwrap()
    }

    fn tx(sender: &str, recipient: &str, amount: Amount, ts: Timestamp) -> Transaction {
        Transaction::new(sender, recipient, amount, "sig", ts).unwrap()
    }

    #[test]
    fn test_genesis_block_creation() {
        let genesis = Block::genesis(42).unwrap();

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.validator, "genesis");
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.hash, genesis.compute_hash().unwrap());
        assert!(genesis.verify_integrity().is_ok());
    }

    #[test]
    fn test_block_hash_covers_fields() {
        let block = Block::new(1, "abc", 10, vec![tx("a", "b", 1, 1)], "v1").unwrap();

        let mut tampered = block.clone();
        tampered.validator = "v2".to_string();
        assert!(tampered.verify_integrity().is_err());

        let mut tampered = block.clone();
        tampered.transactions[0].amount = 1000;
        assert!(tampered.verify_integrity().is_err());
    }

    #[tokio::test]
    async fn test_ledger_creation_and_balances() {
        let ledger = ledger_with(&[("alice", 1000), ("bob", 500)]);

        assert_eq!(ledger.get_balance("alice").await, 1000);
        assert_eq!(ledger.get_balance("bob").await, 500);
        assert_eq!(ledger.get_balance("nobody").await, 0);
        assert_eq!(ledger.get_fee_balance("alice").await, 50);
        assert_eq!(ledger.chain_len().await, 1);
    }

    #[tokio::test]
    async fn test_apply_block_links_and_moves_balances() {
        let ledger = ledger_with(&[("alice", 1000)]);
        let genesis = ledger.last_block().await.unwrap();

        let block = Block::new(1, genesis.hash.clone(), 5, vec![tx("alice", "bob", 300, 1)], "v1").unwrap();
        ledger.apply_block(block.clone()).await.unwrap();

        let chain = ledger.chain().await;
        assert_eq!(chain.last().unwrap().hash, block.hash);
        assert_eq!(chain.last().unwrap().previous_hash, chain[chain.len() - 2].hash);
        assert_eq!(ledger.get_balance("alice").await, 700);
        assert_eq!(ledger.get_balance("bob").await, 300);
        assert!(ledger.is_finalized(&block.transactions[0].id).await);
    }

    #[tokio::test]
    async fn test_apply_block_does_not_recheck_balances() {
        let ledger = ledger_with(&[]);
        let genesis = ledger.last_block().await.unwrap();

        let block = Block::new(1, genesis.hash, 5, vec![tx("broke", "bob", 75, 1)], "v1").unwrap();
        ledger.apply_block(block).await.unwrap();

        assert_eq!(ledger.get_balance("broke").await, -75);
        assert_eq!(ledger.get_balance("bob").await, 75);
    }

    #[tokio::test]
    async fn test_fee_currency_transactions_touch_fee_book() {
        let ledger = ledger_with(&[("alice", 100)]);
        let genesis = ledger.last_block().await.unwrap();

        let fee = Transaction::with_currency("alice", "pool", 20, "", 1, Currency::Fee).unwrap();
        let block = Block::new(1, genesis.hash, 5, vec![fee], "v1").unwrap();
        ledger.apply_block(block).await.unwrap();

        assert_eq!(ledger.get_balance("alice").await, 100);
        assert_eq!(ledger.get_fee_balance("alice").await, 30);
        assert_eq!(ledger.get_fee_balance("pool").await, 20);
    }

    #[tokio::test]
    async fn test_apply_block_rejects_broken_link() {
        let ledger = ledger_with(&[]);

        let orphan = Block::new(1, "not-the-tip", 5, Vec::new(), "v1").unwrap();
        assert!(matches!(
            ledger.apply_block(orphan).await,
            Err(ConsensusError::InvalidBlock(_))
        ));

        let genesis = ledger.last_block().await.unwrap();
        let skipped = Block::new(2, genesis.hash, 5, Vec::new(), "v1").unwrap();
        assert!(ledger.apply_block(skipped).await.is_err());
        assert_eq!(ledger.chain_len().await, 1);
    }

    #[tokio::test]
    async fn test_import_block_recomputes_hash() {
        let ledger = ledger_with(&[("alice", 100)]);
        let genesis = ledger.last_block().await.unwrap();

        let mut forged = Block::new(1, genesis.hash.clone(), 5, vec![tx("alice", "bob", 10, 1)], "v1").unwrap();
        forged.transactions[0].amount = 99;
        assert!(ledger.import_block(forged).await.is_err());

        let honest = Block::new(1, genesis.hash, 5, vec![tx("alice", "bob", 10, 1)], "v1").unwrap();
        ledger.import_block(honest.clone()).await.unwrap();

        // Replaying the same transaction in a later block is refused
        let replay = Block::new(2, honest.hash, 6, honest.transactions.clone(), "v1").unwrap();
        assert!(ledger.import_block(replay).await.is_err());
    }

    #[tokio::test]
    async fn test_import_block_validates_each_transaction() {
        let ledger = ledger_with(&[("alice", 1000)]);
        let genesis = ledger.last_block().await.unwrap();

        let reversed = Block::new(1, genesis.hash.clone(), 5, vec![tx("alice", "bob", -500, 1)], "v1").unwrap();
        assert!(matches!(
            ledger.import_block(reversed).await,
            Err(ConsensusError::InvalidBlock(_))
        ));

        let transfer = tx("alice", "bob", 10, 1);
        let repeated = Block::new(1, genesis.hash, 5, vec![transfer.clone(), transfer], "v1").unwrap();
        assert!(matches!(
            ledger.import_block(repeated).await,
            Err(ConsensusError::InvalidBlock(_))
        ));

        assert_eq!(ledger.get_balance("alice").await, 1000);
        assert_eq!(ledger.get_balance("bob").await, 0);
        assert_eq!(ledger.chain_len().await, 1);
    }

    #[tokio::test]
    async fn test_overflowing_block_changes_nothing() {
        let ledger = ledger_with(&[("alice", 1000), ("bob", 500)]);
        let genesis = ledger.last_block().await.unwrap();

        let first = tx("alice", "carol", 100, 1);
        let huge = tx("alice", "bob", Amount::MAX, 2);
        let block = Block::new(1, genesis.hash, 5, vec![first.clone(), huge.clone()], "v1").unwrap();

        let err = ledger.import_block(block).await.unwrap_err();
        assert!(matches!(&err, ConsensusError::BalanceOverflow(id) if *id == huge.id));

        assert_eq!(ledger.get_balance("alice").await, 1000);
        assert_eq!(ledger.get_balance("bob").await, 500);
        assert_eq!(ledger.get_balance("carol").await, 0);
        assert!(!ledger.is_finalized(&first.id).await);
        assert_eq!(ledger.chain_len().await, 1);
    }

    #[tokio::test]
    async fn test_forge_returns_all_but_overflowing_transaction() {
        let ledger = ledger_with(&[("bob", 500)]);
        let first = tx("alice", "bob", 10, 1);
        let huge = tx("carol", "bob", Amount::MAX, 2);
        ledger.submit_transaction(first.clone()).await.unwrap();
        ledger.submit_transaction(huge).await.unwrap();

        assert!(ledger.forge_block(10).await.is_err());
        assert_eq!(ledger.pending_transactions().await, vec![first]);
        assert_eq!(ledger.chain_len().await, 1);
        assert_eq!(ledger.total_minted().await, 0);
    }

    #[tokio::test]
    async fn test_mint_and_pay_out_reject_overflow() {
        let ledger = ledger_with(&[]);

        ledger.mint("v1", Amount::MAX).await.unwrap();
        assert!(ledger.mint("v1", 1).await.is_err());
        assert_eq!(ledger.total_minted().await, Amount::MAX);

        ledger.pay_out("pool", "alice", 40).await.unwrap();
        assert_eq!(ledger.get_balance("pool").await, -40);
        assert_eq!(ledger.get_balance("alice").await, 40);

        assert!(ledger.pay_out("pool", "v1", 1).await.is_err());
        assert_eq!(ledger.get_balance("pool").await, -40);
        assert_eq!(ledger.get_balance("v1").await, Amount::MAX);
    }

    #[tokio::test]
    async fn test_submit_rejects_finalized_ids() {
        let ledger = ledger_with(&[("alice", 100)]);
        let transfer = tx("alice", "bob", 10, 1);

        ledger.submit_transaction(transfer.clone()).await.unwrap();
        // Pending duplicates are the caller's concern
        ledger.submit_transaction(transfer.clone()).await.unwrap();
        assert_eq!(ledger.pending_count().await, 2);

        let genesis = ledger.last_block().await.unwrap();
        let block = Block::new(1, genesis.hash, 5, ledger.drain_mempool().await[..1].to_vec(), "v1").unwrap();
        ledger.apply_block(block).await.unwrap();

        assert!(matches!(
            ledger.submit_transaction(transfer).await,
            Err(ConsensusError::DuplicateTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_front_keeps_order() {
        let ledger = ledger_with(&[]);
        let old = tx("a", "b", 1, 1);
        let new = tx("a", "b", 2, 2);

        ledger.submit_transaction(new.clone()).await.unwrap();
        ledger.requeue_front(vec![old.clone()]).await;

        assert_eq!(ledger.pending_transactions().await, vec![old, new]);
    }

    #[tokio::test]
    async fn test_stake_moves_balance() {
        let ledger = ledger_with(&[("alice", 100)]);

        ledger.stake("alice", 60).await.unwrap();
        assert_eq!(ledger.get_balance("alice").await, 40);
        assert_eq!(ledger.get_stake("alice").await, 60);

        assert!(matches!(
            ledger.stake("alice", 41).await,
            Err(ConsensusError::InsufficientBalance { needed: 41, available: 40 })
        ));
    }

    #[tokio::test]
    async fn test_forge_block_rewards_selected_validator() {
        let ledger = ledger_with(&[("A", 10), ("B", 30)]);
        ledger.stake("A", 10).await.unwrap();
        ledger.stake("B", 30).await.unwrap();
        ledger.submit_transaction(tx("B", "A", 1, 1)).await.unwrap();

        let block = ledger
            .forge_block_with(10, |stakes| select_weighted(stakes, 15.0))
            .await
            .unwrap();

        assert_eq!(block.validator, "B");
        assert_eq!(block.index, 1);
        assert_eq!(block.transactions.len(), 1);
        assert_eq!(ledger.get_balance("B").await, 9);
        assert_eq!(ledger.get_balance("A").await, 1);
        assert_eq!(ledger.total_minted().await, 10);
        assert_eq!(ledger.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_forge_without_stake_goes_to_genesis() {
        let ledger = ledger_with(&[]);
        let block = ledger.forge_block(10).await.unwrap();
        assert_eq!(block.validator, "genesis");
        assert_eq!(ledger.get_balance("genesis").await, 10);
    }

    #[tokio::test]
    async fn test_peers() {
        let ledger = ledger_with(&[]);
        ledger.add_peer("v2", "http://v2:5000").await;
        ledger.add_peer("v1", "http://v1:5000").await;

        assert_eq!(ledger.peer_endpoints().await, vec!["http://v1:5000", "http://v2:5000"]);
        assert!(ledger.remove_peer("v1").await);
        assert!(!ledger.remove_peer("v1").await);
    }
}
