//! Staking yield and block rewards
//!
//! Yield is a pro-rata share of a yearly emission that decays by a fixed
//! factor for every full year since the engine started. Reward math runs in
//! `f64`. Claims pay whole [`Amount`]s from the staking pool and carry the
//! fraction forward on the staker's record.

use crate::chain::Ledger;
use crate::clock::Clock;
use crate::config::RewardSettings;
use crate::constants::{SECONDS_PER_YEAR, STAKING_POOL};
use crate::{Amount, ConsensusError, Result, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Staking position of one address
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StakerRecord {
    /// Staker address
    pub address: String,
    /// Total staked. Only grows.
    pub amount: Amount,
    /// Time of the last paying claim, or of the first stake. `None` if unknown.
    pub last_claimed: Option<Timestamp>,
    /// Sum of every payout so far
    pub total_claimed: Amount,
    /// Claimed yield below one unit, paid with a later claim
    #[serde(default)]
    pub unpaid_fraction: f64,
}

#[derive(Debug, Default)]
struct RewardState {
    stakers: HashMap<String, StakerRecord>,
    total_staked: Amount,
}

/// Computes staking yield and credits block rewards
#[derive(Debug)]
pub struct RewardEngine {
    settings: RewardSettings,
    block_reward: Amount,
    start_time: Timestamp,
    clock: Arc<dyn Clock>,
    state: Mutex<RewardState>,
}

impl RewardEngine {
    /// Start the emission schedule now
    pub fn new(settings: RewardSettings, block_reward: Amount, clock: Arc<dyn Clock>) -> Self {
        Self {
            start_time: clock.now(),
            settings,
            block_reward,
            clock,
            state: Mutex::new(RewardState::default()),
        }
    }

    /// Full years elapsed since the engine started
    pub fn current_year(&self) -> u64 {
        self.clock.now().saturating_sub(self.start_time) / SECONDS_PER_YEAR
    }

    /// Emission for the current year: `rewards_per_year * decay^years`
    #[allow(clippy::cast_precision_loss)]
    pub fn annual_reward(&self) -> f64 {
        let years = i32::try_from(self.current_year()).unwrap_or(i32::MAX);
        self.settings.rewards_per_year as f64 * self.settings.annual_decay.powi(years)
    }

    /// Add to an address's staking position.
    ///
    /// The first stake starts the claim clock. The ledger's own stake table
    /// is not touched.
    pub async fn stake(&self, address: &str, amount: Amount) -> Result<()> {
        if amount <= 0 {
            return Err(ConsensusError::MalformedTransaction(format!(
                "stake must be positive, got {amount}"
            )));
        }

        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let overflow = || ConsensusError::BalanceOverflow(address.to_string());
        let pool_total = state.total_staked.checked_add(amount).ok_or_else(overflow)?;
        let record = state
            .stakers
            .entry(address.to_string())
            .or_insert_with(|| StakerRecord {
                address: address.to_string(),
                last_claimed: Some(now),
                ..StakerRecord::default()
            });
        record.amount = record.amount.checked_add(amount).ok_or_else(overflow)?;
        state.total_staked = pool_total;

        debug!("{} staked {} for rewards (total staked {})", address, amount, state.total_staked);
        Ok(())
    }

    /// Yield accrued by `address` since its last claim
    pub async fn calculate_reward(&self, address: &str) -> f64 {
        let state = self.state.lock().await;
        self.accrued(&state, address, self.clock.now())
    }

    #[allow(clippy::cast_precision_loss)]
    fn accrued(&self, state: &RewardState, address: &str, now: Timestamp) -> f64 {
        let Some(staker) = state.stakers.get(address) else {
            return 0.0;
        };

        let elapsed = now.saturating_sub(staker.last_claimed.unwrap_or(now));
        if elapsed < self.settings.min_claim_interval_secs || state.total_staked == 0 {
            return 0.0;
        }

        let pool = self.annual_reward() / SECONDS_PER_YEAR as f64 * elapsed as f64;
        let share = staker.amount as f64 / state.total_staked as f64;
        pool * share
    }

    /// Pay out accrued yield from the staking pool.
    ///
    /// Any positive accrual resets the claim clock. The whole part of the
    /// accrual plus the carried fraction is credited to `address` on the
    /// ledger and returned; what remains below one unit is carried. The
    /// record only changes once the ledger has accepted the payout.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub async fn claim(&self, ledger: &Ledger, address: &str) -> Result<Amount> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let accrued = self.accrued(&state, address, now);
        if accrued <= 0.0 {
            return Ok(0);
        }
        let Some(staker) = state.stakers.get_mut(address) else {
            return Ok(0);
        };

        let owed = staker.unpaid_fraction + accrued;
        let payout = owed.trunc() as Amount;
        if payout > 0 {
            ledger.pay_out(STAKING_POOL, address, payout).await?;
        }

        staker.unpaid_fraction = owed - payout as f64;
        staker.last_claimed = Some(now);
        staker.total_claimed = staker.total_claimed.saturating_add(payout);

        info!("{} claimed {} in staking rewards", address, payout);
        Ok(payout)
    }

    /// Staking position, or an empty record for unknown addresses
    pub async fn get_stake_info(&self, address: &str) -> StakerRecord {
        self.state
            .lock()
            .await
            .stakers
            .get(address)
            .cloned()
            .unwrap_or_else(|| StakerRecord {
                address: address.to_string(),
                ..StakerRecord::default()
            })
    }

    /// Sum of every staking position
    pub async fn total_staked(&self) -> Amount {
        self.state.lock().await.total_staked
    }

    /// Informational pool size; emission is not checked against it
    pub fn staking_pool_total(&self) -> Amount {
        self.settings.staking_pool_total
    }

    /// Fixed reward for a finalized block
    pub fn block_reward(&self) -> Amount {
        self.block_reward
    }

    /// Mint the block reward to `proposer`
    pub async fn credit_block_reward(&self, ledger: &Ledger, proposer: &str) -> Result<Amount> {
        ledger.mint(proposer, self.block_reward).await?;
        info!("Credited block reward {} to {}", self.block_reward, proposer);
        Ok(self.block_reward)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::GenesisConfig;

    const START: Timestamp = 1_700_000_000;

    struct Fixture {
        engine: RewardEngine,
        ledger: Ledger,
        clock: Arc<ManualClock>,
    }

    fn fixture(settings: RewardSettings) -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        Fixture {
            engine: RewardEngine::new(settings, 10, clock.clone()),
            ledger: Ledger::new(&GenesisConfig::default(), clock.clone()).unwrap(),
            clock,
        }
    }

    /// One unit of emission per second
    fn unit_rate() -> RewardSettings {
        RewardSettings {
            rewards_per_year: 31_536_000,
            ..RewardSettings::default()
        }
    }

    #[test]
    fn test_annual_reward_decay() {
        let Fixture { engine, clock, .. } = fixture(RewardSettings::default());
        assert!((engine.annual_reward() - 20_000_000.0).abs() < 1e-6);

        clock.advance(SECONDS_PER_YEAR - 1);
        assert_eq!(engine.current_year(), 0);

        clock.advance(1);
        assert!((engine.annual_reward() - 19_000_000.0).abs() < 1e-6);

        clock.advance(SECONDS_PER_YEAR);
        assert!((engine.annual_reward() - 18_050_000.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_pro_rata_reward() {
        let Fixture { engine, clock, .. } = fixture(unit_rate());
        engine.stake("alice", 100).await.unwrap();
        engine.stake("bob", 300).await.unwrap();

        clock.advance(600);
        assert!((engine.calculate_reward("alice").await - 150.0).abs() < 1e-9);
        assert!((engine.calculate_reward("bob").await - 450.0).abs() < 1e-9);
        assert_eq!(engine.total_staked().await, 400);
    }

    #[tokio::test]
    async fn test_claim_throttling() {
        let Fixture { engine, ledger, clock } = fixture(unit_rate());
        engine.stake("alice", 100).await.unwrap();

        clock.advance(299);
        assert_eq!(engine.claim(&ledger, "alice").await.unwrap(), 0);

        clock.advance(101);
        assert_eq!(engine.claim(&ledger, "alice").await.unwrap(), 400);
        let after_first = engine.get_stake_info("alice").await;
        assert_eq!(after_first.last_claimed, Some(START + 400));
        assert_eq!(after_first.total_claimed, 400);

        clock.advance(100);
        assert_eq!(engine.claim(&ledger, "alice").await.unwrap(), 0);
        assert_eq!(engine.get_stake_info("alice").await, after_first);
    }

    #[tokio::test]
    async fn test_claim_pays_from_staking_pool() {
        let Fixture { engine, ledger, clock } = fixture(unit_rate());
        engine.stake("alice", 100).await.unwrap();

        clock.advance(400);
        let paid = engine.claim(&ledger, "alice").await.unwrap();

        assert_eq!(ledger.get_balance("alice").await, paid);
        assert_eq!(ledger.get_balance(STAKING_POOL).await, -paid);
        assert_eq!(ledger.total_minted().await, 0);
    }

    #[tokio::test]
    async fn test_sub_unit_reward_resets_clock_and_carries() {
        let Fixture { engine, ledger, clock } = fixture(unit_rate());
        engine.stake("tiny", 1).await.unwrap();
        engine.stake("whale", 1_000_000_000).await.unwrap();

        clock.advance(301);
        let accrued = engine.calculate_reward("tiny").await;
        assert!(accrued > 0.0 && accrued < 1.0);

        assert_eq!(engine.claim(&ledger, "tiny").await.unwrap(), 0);
        let info = engine.get_stake_info("tiny").await;
        assert_eq!(info.last_claimed, Some(START + 301));
        assert_eq!(info.total_claimed, 0);
        assert!((info.unpaid_fraction - accrued).abs() < 1e-12);
        assert_eq!(ledger.get_balance("tiny").await, 0);
    }

    #[tokio::test]
    async fn test_fractions_add_up_across_claims() {
        // Half a unit per second
        let Fixture { engine, ledger, clock } = fixture(RewardSettings {
            rewards_per_year: 15_768_000,
            ..RewardSettings::default()
        });
        engine.stake("alice", 100).await.unwrap();

        clock.advance(301);
        assert_eq!(engine.claim(&ledger, "alice").await.unwrap(), 150);
        assert!((engine.get_stake_info("alice").await.unpaid_fraction - 0.5).abs() < 1e-9);

        clock.advance(301);
        assert_eq!(engine.claim(&ledger, "alice").await.unwrap(), 151);

        let info = engine.get_stake_info("alice").await;
        assert_eq!(info.total_claimed, 301);
        assert!(info.unpaid_fraction.abs() < 1e-9);
        assert_eq!(ledger.get_balance("alice").await, 301);
    }

    #[tokio::test]
    async fn test_unknown_address_defaults() {
        let Fixture { engine, ledger, clock } = fixture(unit_rate());
        clock.advance(10_000);

        assert_eq!(engine.calculate_reward("ghost").await, 0.0);
        assert_eq!(engine.claim(&ledger, "ghost").await.unwrap(), 0);

        let info = engine.get_stake_info("ghost").await;
        assert_eq!(info.amount, 0);
        assert_eq!(info.last_claimed, None);
        assert_eq!(info.total_claimed, 0);
    }

    #[tokio::test]
    async fn test_restake_keeps_claim_clock() {
        let Fixture { engine, clock, .. } = fixture(unit_rate());
        engine.stake("alice", 100).await.unwrap();
        clock.advance(1000);
        engine.stake("alice", 100).await.unwrap();

        let info = engine.get_stake_info("alice").await;
        assert_eq!(info.amount, 200);
        assert_eq!(info.last_claimed, Some(START));
        assert!(engine.stake("alice", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_credit_block_reward_mints() {
        let Fixture { engine, ledger, .. } = fixture(RewardSettings::default());

        engine.credit_block_reward(&ledger, "v1").await.unwrap();
        engine.credit_block_reward(&ledger, "v1").await.unwrap();

        assert_eq!(ledger.get_balance("v1").await, 20);
        assert_eq!(ledger.total_minted().await, 20);
    }
}
