//! HTTP implementations of the peer capabilities

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use zinc_consensus::{Block, BlockBroadcaster, ConsensusError, LivenessProbe};

fn endpoint_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path)
}

fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

#[derive(Serialize)]
struct ReceiveBlock<'a> {
    sender: &'a str,
    block: &'a Block,
}

/// Posts blocks to `{endpoint}/receive_block`
#[derive(Debug, Clone)]
pub struct HttpBroadcaster {
    client: Client,
    sender: String,
}

impl HttpBroadcaster {
    /// Broadcaster announcing blocks as `sender`
    pub fn new(sender: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            sender: sender.into(),
        })
    }
}

#[async_trait]
impl BlockBroadcaster for HttpBroadcaster {
    async fn broadcast(&self, endpoint: &str, block: &Block) -> zinc_consensus::Result<()> {
        let payload = ReceiveBlock {
            sender: &self.sender,
            block,
        };

        self.client
            .post(endpoint_url(endpoint, "receive_block"))
            .json(&payload)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| ConsensusError::NetworkError(e.to_string()))?;

        Ok(())
    }
}

/// Pings `{endpoint}/ping` and expects a 200
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    /// Probe with a per-request timeout
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, endpoint: &str) -> bool {
        match self.client.get(endpoint_url(endpoint, "ping")).send().await {
            Ok(response) => {
                let ok = response.status() == StatusCode::OK;
                if !ok {
                    tracing::warn!("Ping to {} answered {}", endpoint, response.status());
                }
                ok
            }
            Err(e) => {
                tracing::debug!("Ping to {} failed: {}", endpoint, e);
                false
            }
        }
    }
}
