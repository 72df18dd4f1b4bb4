use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::error::{PoolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDepth {
    /// Number of blocks on the canonical chain from the block to the tip, inclusive.
    Confirmed(u64),
    Orphaned,
}

/// Tells the gate how deep a found block sits in the canonical chain.
///
/// Transient failures must be reported as `PoolError::OracleUnavailable`, never as `Orphaned`.
#[async_trait]
pub trait ChainOracle: Send + Sync + 'static {
    async fn block_confirmation_depth(&self, block_ref: &str) -> Result<BlockDepth>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    full_height: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    height: u64,
}

/// Oracle backed by a full node's REST API.
pub struct NodeOracle {
    client: reqwest::Client,
    node_url: String,
}

impl NodeOracle {
    pub fn new(node_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PoolError::Configuration(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            node_url: node_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let url = format!("{}{}", self.node_url, path);
        let response = self.client.get(&url).send().await.map_err(unavailable)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response.error_for_status().map_err(unavailable)?;
        Ok(Some(response.json().await.map_err(unavailable)?))
    }
}

fn unavailable(e: reqwest::Error) -> PoolError {
    PoolError::OracleUnavailable(e.to_string())
}

/// A block is canonical when it is the best-chain header at its height.
fn classify(block_ref: &str, height: u64, full_height: u64, ids_at_height: &[String]) -> BlockDepth {
    match ids_at_height.first() {
        Some(best) if best == block_ref => {
            BlockDepth::Confirmed(full_height.saturating_sub(height) + 1)
        }
        _ => BlockDepth::Orphaned,
    }
}

#[async_trait]
impl ChainOracle for NodeOracle {
    async fn block_confirmation_depth(&self, block_ref: &str) -> Result<BlockDepth> {
        let Some(header) = self
            .get::<BlockHeader>(&format!("/blocks/{}/header", block_ref))
            .await?
        else {
            debug!("Node does not know block {}", block_ref);
            return Ok(BlockDepth::Orphaned);
        };

        let full_height = self
            .get::<NodeInfo>("/info")
            .await?
            .and_then(|info| info.full_height)
            .ok_or_else(|| PoolError::OracleUnavailable("node has no full height yet".to_string()))?;

        let ids: Vec<String> = self
            .get(&format!("/blocks/at/{}", header.height))
            .await?
            .unwrap_or_default();

        Ok(classify(block_ref, header.height, full_height, &ids))
    }
}
