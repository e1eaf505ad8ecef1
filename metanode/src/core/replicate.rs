use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use common::constants::REPLICATE_BLOCK_PATH;
use common::schemas::ReplicateBlockRequest;
use common::url_utils::endpoint_url;

use crate::core::node::Node;

/// Asks a storage node that holds a block to push it to another node.
#[async_trait]
pub trait Replicator: Send + Sync {
    async fn request_replicate(
        &self,
        source_id: &str,
        target: &Node,
        block_hash: &str,
    ) -> anyhow::Result<()>;
}

pub struct HttpReplicator {
    http: Client,
    timeout: Duration,
}

impl HttpReplicator {
    pub fn new(http: Client, timeout: Duration) -> Self {
        Self { http, timeout }
    }
}

#[async_trait]
impl Replicator for HttpReplicator {
    async fn request_replicate(
        &self,
        source_id: &str,
        target: &Node,
        block_hash: &str,
    ) -> anyhow::Result<()> {
        let url = endpoint_url(source_id, REPLICATE_BLOCK_PATH)?;
        let body = ReplicateBlockRequest {
            block_hash: block_hash.to_string(),
            target_node: target.as_target(),
        };

        let resp = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("replicate request to {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("{} answered {}", url, status));
        }

        debug!(source = source_id, target = %target.id, block_hash, "replicate request accepted");
        Ok(())
    }
}
