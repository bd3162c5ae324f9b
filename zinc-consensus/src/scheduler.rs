//! Background loops driving consensus and validator liveness
//!
//! Two independent tokio tasks: the consensus loop proposes when idle and
//! otherwise checks for quorum; the liveness loop pings every validator and
//! removes the ones that do not answer. Neither loop holds state of its own.

use crate::config::SchedulerSettings;
use crate::consensus::{ConsensusState, FinalizeStatus};
use crate::network::LivenessProbe;
use crate::service::LedgerService;
use crate::validator::ValidatorRegistry;
use crate::Result;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Result of one liveness sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Validators probed
    pub checked: usize,
    /// Addresses removed for not answering
    pub removed: Vec<String>,
}

/// Ping every registered validator and remove the unreachable ones.
///
/// Probes run concurrently, each bounded by `timeout`. A failed removal is
/// logged and the sweep continues.
pub async fn sweep_validators(
    registry: &ValidatorRegistry,
    probe: &dyn LivenessProbe,
    timeout: Duration,
) -> Result<SweepReport> {
    let validators = registry.snapshot().await?;

    let probes = validators.iter().map(|validator| async move {
        let alive = tokio::time::timeout(timeout, probe.probe(&validator.api_endpoint))
            .await
            .unwrap_or(false);
        (validator.address.as_str(), alive)
    });
    let results = join_all(probes).await;

    let mut report = SweepReport {
        checked: results.len(),
        removed: Vec::new(),
    };

    for (address, alive) in results {
        if alive {
            continue;
        }
        warn!("Removing validator {}: offline or unreachable", address);
        match registry.remove(address).await {
            Ok(true) => report.removed.push(address.to_string()),
            Ok(false) => debug!("Validator {} was already gone", address),
            Err(e) => warn!("Failed to remove validator {}: {}", address, e),
        }
    }

    info!(
        "Liveness sweep checked {} validators, removed {}",
        report.checked,
        report.removed.len()
    );
    Ok(report)
}

/// Periodic driver for one node
pub struct Scheduler {
    service: Arc<LedgerService>,
    probe: Arc<dyn LivenessProbe>,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// Create a scheduler using the service's own settings
    pub fn new(service: Arc<LedgerService>, probe: Arc<dyn LivenessProbe>) -> Self {
        let settings = service.config().scheduler.clone();
        Self {
            service,
            probe,
            settings,
        }
    }

    /// One pass of the consensus loop
    pub async fn consensus_tick(&self) {
        let idle = self.service.consensus().state().await == ConsensusState::Idle;

        if idle && self.settings.auto_propose {
            match self.service.propose_block().await {
                Ok(block) => info!("Auto-proposed block #{}", block.index),
                Err(e) if e.is_recoverable() => debug!("Nothing proposed: {}", e),
                Err(e) => warn!("Auto-propose failed: {}", e),
            }
            return;
        }

        match self.service.check_and_finalize().await {
            Ok(FinalizeStatus::Finalized(block)) => debug!("Scheduler finalized block #{}", block.index),
            Ok(_) => {}
            Err(e) => warn!("Finalization check failed: {}", e),
        }
    }

    /// One pass of the liveness loop
    pub async fn liveness_tick(&self) -> Result<SweepReport> {
        sweep_validators(
            self.service.registry(),
            self.probe.as_ref(),
            Duration::from_secs(self.settings.probe_timeout_secs),
        )
        .await
    }

    /// Spawn both loops. The first tick of each comes one period after start.
    pub fn start(self) -> SchedulerHandle {
        let scheduler = Arc::new(self);

        let consensus = {
            let scheduler = scheduler.clone();
            let period = Duration::from_secs(scheduler.settings.consensus_interval_secs);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    scheduler.consensus_tick().await;
                }
            })
        };

        let liveness = {
            let period = Duration::from_secs(scheduler.settings.liveness_interval_secs);
            tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = scheduler.liveness_tick().await {
                        warn!("Liveness sweep failed: {}", e);
                    }
                }
            })
        };

        info!("Scheduler started");
        SchedulerHandle { consensus, liveness }
    }
}

/// Running scheduler loops
#[derive(Debug)]
pub struct SchedulerHandle {
    consensus: JoinHandle<()>,
    liveness: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop both loops and wait for them to wind down
    pub async fn shutdown(self) {
        self.consensus.abort();
        self.liveness.abort();
        let _ = self.consensus.await;
        let _ = self.liveness.await;
        info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChainConfig;
    use crate::crypto::AcceptAllVerifier;
    use crate::network::NoopBroadcaster;
    use crate::transaction::Transaction;
    use crate::validator::{MemoryStore, ValidatorRecord};
    use async_trait::async_trait;

    /// Answers for endpoints containing "up", hangs for "hang"
    struct ScriptedProbe;

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn probe(&self, endpoint: &str) -> bool {
            if endpoint.contains("hang") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            endpoint.contains("up")
        }
    }

    fn service(validators: Vec<ValidatorRecord>, auto_propose: bool) -> Arc<LedgerService> {
        let mut config = ChainConfig::default();
        config.scheduler.auto_propose = auto_propose;
        Arc::new(
            LedgerService::new(
                config,
                MemoryStore::with_records(validators),
                Arc::new(AcceptAllVerifier),
                Arc::new(NoopBroadcaster),
                Arc::new(ManualClock::new(1_700_000_000)),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_sweep_removes_unreachable_only() {
        let registry = ValidatorRegistry::new(MemoryStore::with_records(vec![
            ValidatorRecord::new("a", 1000, "http://up-a"),
            ValidatorRecord::new("b", 1000, "http://down-b"),
            ValidatorRecord::new("c", 1000, "http://hang-c"),
            ValidatorRecord::new("d", 1000, "http://up-d"),
        ]));

        let report = sweep_validators(&registry, &ScriptedProbe, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(report.checked, 4);
        assert_eq!(report.removed, vec!["b", "c"]);
        let left: Vec<String> = registry.snapshot().await.unwrap().into_iter().map(|v| v.address).collect();
        assert_eq!(left, vec!["a", "d"]);
    }

    #[tokio::test]
    async fn test_consensus_tick_proposes_then_checks() {
        let service = service(vec![ValidatorRecord::new("v1", 5000, "http://up")], true);
        let tx = Transaction::new("alice", "bob", 5, "sig", 1).unwrap();
        service.ledger().submit_transaction(tx).await.unwrap();

        let scheduler = Scheduler::new(service.clone(), Arc::new(ScriptedProbe));

        scheduler.consensus_tick().await;
        assert_eq!(service.consensus().state().await, ConsensusState::Proposed);

        // Without votes the candidate stays put
        scheduler.consensus_tick().await;
        assert_eq!(service.consensus().state().await, ConsensusState::Proposed);

        service.vote("v1", true).await.unwrap();
        scheduler.consensus_tick().await;
        assert_eq!(service.consensus().state().await, ConsensusState::Idle);
        assert_eq!(service.ledger().chain_len().await, 2);
    }

    #[tokio::test]
    async fn test_consensus_tick_without_auto_propose() {
        let service = service(vec![ValidatorRecord::new("v1", 5000, "http://up")], false);
        let tx = Transaction::new("alice", "bob", 5, "sig", 1).unwrap();
        service.ledger().submit_transaction(tx).await.unwrap();

        let scheduler = Scheduler::new(service.clone(), Arc::new(ScriptedProbe));
        scheduler.consensus_tick().await;

        assert_eq!(service.consensus().state().await, ConsensusState::Idle);
        assert_eq!(service.ledger().pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let service = service(Vec::new(), true);
        let handle = Scheduler::new(service, Arc::new(ScriptedProbe)).start();
        handle.shutdown().await;
    }
}
