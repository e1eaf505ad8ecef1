use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::node::Node;
use crate::core::registry::Membership;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PlacementPolicy {
    RoundRobin,
    LeastLoaded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStatus {
    Success,
    AlreadyEnoughCopies,
    NoNodesAvailable,
    InvalidInput,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementDecision {
    pub status: PlacementStatus,
    pub selected_nodes: Vec<Node>,
}

impl PlacementDecision {
    fn empty(status: PlacementStatus) -> Self {
        Self {
            status,
            selected_nodes: Vec::new(),
        }
    }
}

/// Picks additional holders for a block. The round-robin cursor is shared
/// by every caller holding the same selector.
#[derive(Debug)]
pub struct Selector {
    policy: PlacementPolicy,
    cursor: AtomicUsize,
}

impl Selector {
    pub fn new(policy: PlacementPolicy) -> Self {
        Self {
            policy,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> PlacementPolicy {
        self.policy
    }

    pub fn select(
        &self,
        existing: Option<&BTreeSet<String>>,
        factor: usize,
        requesting: Option<&str>,
        membership: &Membership,
    ) -> PlacementDecision {
        let (Some(existing), Some(requesting)) = (existing, requesting) else {
            return PlacementDecision::empty(PlacementStatus::InvalidInput);
        };
        if requesting.is_empty() {
            return PlacementDecision::empty(PlacementStatus::InvalidInput);
        }

        // holders recorded before a node died do not count
        let active: BTreeSet<&str> = existing
            .iter()
            .map(String::as_str)
            .filter(|id| !membership.dead_ids.contains(*id))
            .collect();

        if active.len() >= factor {
            return PlacementDecision::empty(PlacementStatus::AlreadyEnoughCopies);
        }

        let mut selected: Vec<Node> = Vec::new();
        let is_full = |selected: &Vec<Node>| selected.len() + active.len() >= factor;

        if let Some(node) = membership
            .live
            .iter()
            .find(|n| n.id == requesting && !active.contains(requesting))
        {
            selected.push(node.clone());
        }

        let candidates: Vec<&Node> = match self.policy {
            PlacementPolicy::RoundRobin => {
                let len = membership.live.len();
                if len == 0 {
                    Vec::new()
                } else {
                    let start = self.cursor.load(Ordering::Relaxed) % len;
                    membership.live[start..]
                        .iter()
                        .chain(membership.live[..start].iter())
                        .collect()
                }
            }
            PlacementPolicy::LeastLoaded => {
                let mut sorted: Vec<&Node> = membership.live.iter().collect();
                sorted.sort_by(|a, b| a.block_count.cmp(&b.block_count).then(a.id.cmp(&b.id)));
                sorted
            }
        };

        let mut examined = 0;
        for candidate in candidates {
            if is_full(&selected) {
                break;
            }
            examined += 1;
            if active.contains(candidate.id.as_str())
                || candidate.id == requesting
                || selected.iter().any(|s| s.id == candidate.id)
            {
                continue;
            }
            selected.push(candidate.clone());
        }

        if self.policy == PlacementPolicy::RoundRobin {
            self.cursor.fetch_add(examined, Ordering::Relaxed);
        }

        if selected.is_empty() {
            PlacementDecision::empty(PlacementStatus::NoNodesAvailable)
        } else {
            PlacementDecision {
                status: PlacementStatus::Success,
                selected_nodes: selected,
            }
        }
    }
}
