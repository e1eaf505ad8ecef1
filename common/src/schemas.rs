use serde::{Deserialize, Serialize};

/// Body of `POST /metadata/register-node`. Sent on first contact and then
/// periodically as a heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub id: String,
    pub local_url: String,
    #[serde(default)]
    pub block_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockNodeRequest {
    pub hash: Option<String>,
    pub node_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalUrlRequest {
    pub id: String,
}

/// Node a storage node is asked to push a block to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetNode {
    pub id: String,
    pub local_url: String,
}

/// Body of the storage-node replication endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicateBlockRequest {
    pub block_hash: String,
    pub target_node: TargetNode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
