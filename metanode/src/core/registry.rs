use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use tracing::{debug, error, info};

use common::constants::REFRESH_NODE_TOPIC;
use common::error::ApiError;
use common::time_utils::utc_now_ms;

use crate::config::HealthThresholds;
use crate::core::node::{HealthStatus, Node, NodeRuntime};
use crate::core::notify::Notifier;

#[derive(Default)]
struct NodeSets {
    live: BTreeMap<String, NodeRuntime>,
    dead: BTreeMap<String, Node>,
}

/// Live nodes plus the ids presumed dead, read under one lock.
#[derive(Clone, Debug, Default)]
pub struct Membership {
    pub live: Vec<Node>,
    pub dead_ids: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegisterOutcome {
    Revived(String),
    Registered(String),
    Heartbeat(String),
}

impl fmt::Display for RegisterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterOutcome::Revived(id) => write!(f, "A dead node revives: {}", id),
            RegisterOutcome::Registered(id) => write!(f, "Node registered: {}", id),
            RegisterOutcome::Heartbeat(id) => write!(f, "Received Heartbeat from {}", id),
        }
    }
}

/// Authoritative set of live nodes and the separate set of nodes presumed
/// dead. A node id is in at most one of the two.
#[derive(Clone)]
pub struct NodeRegistry {
    sets: Arc<RwLock<NodeSets>>,
    thresholds: HealthThresholds,
    notifier: Arc<dyn Notifier>,
    rr_cursor: Arc<AtomicUsize>,
}

impl NodeRegistry {
    pub fn new(thresholds: HealthThresholds, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            sets: Arc::new(RwLock::new(NodeSets::default())),
            thresholds,
            notifier,
            rr_cursor: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, NodeSets>, ApiError> {
        self.sets.read().map_err(|_| ApiError::LockPoisoned("nodes"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, NodeSets>, ApiError> {
        self.sets.write().map_err(|_| ApiError::LockPoisoned("nodes"))
    }

    /// Upsert used for both first registration and heartbeats.
    pub fn register(&self, node: Node) -> Result<RegisterOutcome, ApiError> {
        if node.id.trim().is_empty() {
            return Err(ApiError::BadRequest("node id is empty".to_string()));
        }

        let now = Instant::now();
        let now_ms = utc_now_ms();

        let (outcome, changed) = {
            let mut sets = self.write()?;

            if sets.dead.remove(&node.id).is_some() {
                let info = Node {
                    last_heartbeat_ms: now_ms,
                    health_status: HealthStatus::Healthy,
                    ..node
                };
                let id = info.id.clone();
                sets.live.insert(
                    id.clone(),
                    NodeRuntime {
                        info,
                        last_seen: now,
                    },
                );
                info!(node_id = %id, "dead node revived");
                (RegisterOutcome::Revived(id), true)
            } else if let Some(entry) = sets.live.get_mut(&node.id) {
                entry.last_seen = now;
                entry.info.last_heartbeat_ms = now_ms;
                entry.info.local_url = node.local_url;
                let changed = entry.info.block_count != node.block_count
                    || entry.info.health_status != HealthStatus::Healthy;
                entry.info.block_count = node.block_count;
                // a fresh heartbeat clears any WARNING from the last scan
                entry.info.health_status = HealthStatus::Healthy;
                (RegisterOutcome::Heartbeat(node.id), changed)
            } else {
                let info = Node {
                    last_heartbeat_ms: now_ms,
                    health_status: HealthStatus::Healthy,
                    ..node
                };
                let id = info.id.clone();
                sets.live.insert(
                    id.clone(),
                    NodeRuntime {
                        info,
                        last_seen: now,
                    },
                );
                info!(node_id = %id, "node registered");
                (RegisterOutcome::Registered(id), true)
            }
        };

        if changed {
            self.publish_snapshot()?;
        }

        Ok(outcome)
    }

    pub fn live_nodes(&self) -> Result<Vec<Node>, ApiError> {
        Ok(self.read()?.live.values().map(|r| r.info.clone()).collect())
    }

    pub fn dead_nodes(&self) -> Result<BTreeMap<String, Node>, ApiError> {
        Ok(self.read()?.dead.clone())
    }

    pub fn membership(&self) -> Result<Membership, ApiError> {
        let sets = self.read()?;
        Ok(Membership {
            live: sets.live.values().map(|r| r.info.clone()).collect(),
            dead_ids: sets.dead.keys().cloned().collect(),
        })
    }

    pub fn is_dead(&self, id: &str) -> Result<bool, ApiError> {
        Ok(self.read()?.dead.contains_key(id))
    }

    pub fn local_url_for(&self, id: &str) -> Result<Option<String>, ApiError> {
        Ok(self
            .read()?
            .live
            .get(id)
            .map(|r| r.info.local_url.clone()))
    }

    /// Hands out live nodes one at a time in rotation.
    pub fn next_node_round_robin(&self) -> Result<Option<Node>, ApiError> {
        let sets = self.read()?;
        if sets.live.is_empty() {
            return Ok(None);
        }
        let idx = self.rr_cursor.fetch_add(1, Ordering::Relaxed) % sets.live.len();
        Ok(sets.live.values().nth(idx).map(|r| r.info.clone()))
    }

    pub fn clear_all(&self) -> Result<(), ApiError> {
        {
            let mut sets = self.write()?;
            sets.live.clear();
            sets.dead.clear();
        }
        self.publish_snapshot()
    }

    pub fn check_health(&self) -> Result<Vec<Node>, ApiError> {
        self.check_health_at(Instant::now())
    }

    /// Reclassifies every live node against `now`. Nodes past the dead
    /// threshold move to the dead set and are returned, each exactly once.
    pub fn check_health_at(&self, now: Instant) -> Result<Vec<Node>, ApiError> {
        let mut newly_dead = Vec::new();
        let monitored = {
            let mut sets = self.write()?;

            let expired: Vec<String> = sets
                .live
                .iter()
                .filter(|(_, r)| now.saturating_duration_since(r.last_seen) > self.thresholds.dead())
                .map(|(id, _)| id.clone())
                .collect();

            for id in expired {
                if let Some(runtime) = sets.live.remove(&id) {
                    let mut info = runtime.info;
                    info.health_status = HealthStatus::Dead;
                    info!(node_id = %id, "node is down, moving to dead nodes");
                    sets.dead.insert(id, info.clone());
                    newly_dead.push(info);
                }
            }

            for runtime in sets.live.values_mut() {
                let elapsed = now.saturating_duration_since(runtime.last_seen);
                runtime.info.health_status = if elapsed > self.thresholds.warning() {
                    HealthStatus::Warning
                } else {
                    HealthStatus::Healthy
                };
            }

            sets.live.len()
        };

        if !newly_dead.is_empty() {
            self.publish_snapshot()?;
        }

        debug!(monitored, dead = newly_dead.len(), "health check completed");
        Ok(newly_dead)
    }

    fn publish_snapshot(&self) -> Result<(), ApiError> {
        let nodes = self.live_nodes()?;
        match serde_json::to_string(&nodes) {
            Ok(payload) => self.notifier.publish(REFRESH_NODE_TOPIC, payload),
            Err(e) => error!("failed to serialize live nodes: {}", e),
        }
        Ok(())
    }
}
