use serde::{Deserialize, Serialize};
use std::time::Instant;

use common::schemas::TargetNode;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Dead,
}

/// Point-in-time view of a storage node. Copies are handed out to callers;
/// the registry is the only place that mutates the tracked entry.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: String,              // externally routable address, unique key
    pub local_url: String,       // address used when co-located
    pub last_heartbeat_ms: i128, // wall clock (UTC ms) of the last register call
    pub health_status: HealthStatus,
    pub block_count: u64,
}

impl Node {
    pub fn new(id: impl Into<String>, local_url: impl Into<String>, block_count: u64) -> Self {
        Self {
            id: id.into(),
            local_url: local_url.into(),
            last_heartbeat_ms: 0,
            health_status: HealthStatus::Healthy,
            block_count,
        }
    }

    pub fn as_target(&self) -> TargetNode {
        TargetNode {
            id: self.id.clone(),
            local_url: self.local_url.clone(),
        }
    }
}

/// Registry entry: the node plus the monotonic instant used for staleness.
#[derive(Clone, Debug)]
pub struct NodeRuntime {
    pub info: Node,
    pub last_seen: Instant,
}
