//! Peer delivery and liveness capabilities
//!
//! The consensus layer never speaks a transport itself. The node binary plugs
//! in HTTP implementations; tests plug in recorders.

use crate::chain::Block;
use crate::Result;
use async_trait::async_trait;
use futures::future::join_all;
use std::time::Duration;
use tracing::{debug, warn};

/// Delivers a finalized block to one peer endpoint
#[async_trait]
pub trait BlockBroadcaster: Send + Sync {
    /// Send `block` to `endpoint`
    async fn broadcast(&self, endpoint: &str, block: &Block) -> Result<()>;
}

/// Checks whether a validator endpoint is reachable
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `true` only for a healthy answer within the probe's own timeout
    async fn probe(&self, endpoint: &str) -> bool;
}

/// Broadcaster for nodes without peers
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBroadcaster;

#[async_trait]
impl BlockBroadcaster for NoopBroadcaster {
    async fn broadcast(&self, _endpoint: &str, _block: &Block) -> Result<()> {
        Ok(())
    }
}

/// Send `block` to every endpoint concurrently.
///
/// Each delivery is bounded by `timeout`. Failures are logged per peer and
/// never abort the others. Returns the number of successful deliveries.
pub async fn broadcast_block(
    broadcaster: &dyn BlockBroadcaster,
    endpoints: &[String],
    block: &Block,
    timeout: Duration,
) -> usize {
    let deliveries = endpoints.iter().map(|endpoint| async move {
        match tokio::time::timeout(timeout, broadcaster.broadcast(endpoint, block)).await {
            Ok(Ok(())) => {
                debug!("Sent block {} to {}", block.index, endpoint);
                true
            }
            Ok(Err(e)) => {
                warn!("Failed to send block {} to {}: {}", block.index, endpoint, e);
                false
            }
            Err(_) => {
                warn!("Timed out sending block {} to {}", block.index, endpoint);
                false
            }
        }
    });

    join_all(deliveries).await.into_iter().filter(|ok| *ok).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsensusError;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FlakyBroadcaster {
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlockBroadcaster for FlakyBroadcaster {
        async fn broadcast(&self, endpoint: &str, _block: &Block) -> Result<()> {
            if endpoint.contains("down") {
                return Err(ConsensusError::NetworkError("connection refused".to_string()));
            }
            if endpoint.contains("slow") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            self.delivered.lock().await.push(endpoint.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_rest() {
        let broadcaster = FlakyBroadcaster::default();
        let block = Block::genesis(1).unwrap();
        let endpoints = vec![
            "http://a".to_string(),
            "http://down".to_string(),
            "http://slow".to_string(),
            "http://b".to_string(),
        ];

        let delivered = broadcast_block(&broadcaster, &endpoints, &block, Duration::from_millis(50)).await;

        assert_eq!(delivered, 2);
        let mut seen = broadcaster.delivered.lock().await.clone();
        seen.sort();
        assert_eq!(seen, vec!["http://a", "http://b"]);
    }

    #[tokio::test]
    async fn test_noop_broadcaster() {
        let block = Block::genesis(1).unwrap();
        let endpoints = vec!["http://anywhere".to_string()];
        assert_eq!(
            broadcast_block(&NoopBroadcaster, &endpoints, &block, Duration::from_secs(1)).await,
            1
        );
    }
}
