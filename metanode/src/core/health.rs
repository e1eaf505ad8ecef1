use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::core::node::Node;
use crate::core::registry::NodeRegistry;

/// Emitted once per node when the health check moves it to the dead set.
#[derive(Clone, Debug)]
pub struct DeadNodeEvent {
    pub node: Node,
}

/// Outcome of a single health pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HealthPass {
    pub newly_dead: usize,
    /// Dead nodes whose event could not be queued. Their blocks are not
    /// re-replicated automatically.
    pub dropped_events: usize,
}

/// One health pass. Dead-node events are queued without waiting so a full
/// recovery queue never stalls the next tick.
pub fn run_health_check(
    registry: &NodeRegistry,
    events: &mpsc::Sender<DeadNodeEvent>,
) -> anyhow::Result<HealthPass> {
    let newly_dead = registry.check_health()?;
    let mut pass = HealthPass {
        newly_dead: newly_dead.len(),
        dropped_events: 0,
    };

    for node in newly_dead {
        let node_id = node.id.clone();
        let reason = match events.try_send(DeadNodeEvent { node }) {
            Ok(()) => continue,
            Err(mpsc::error::TrySendError::Full(_)) => "recovery queue full",
            Err(mpsc::error::TrySendError::Closed(_)) => "recovery queue closed",
        };
        pass.dropped_events += 1;
        error!(
            node_id = %node_id,
            reason,
            "dead node event dropped, its blocks need a manual rebalance"
        );
    }

    Ok(pass)
}

/// Periodic health monitor. Ticks never overlap: a slow pass delays the next
/// one and missed ticks are skipped.
pub async fn node_health_sweeper(
    registry: NodeRegistry,
    interval: Duration,
    events: mpsc::Sender<DeadNodeEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut dropped_total = 0usize;

    loop {
        tokio::select! {
            _ = tick.tick() => {},
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        match run_health_check(&registry, &events) {
            Ok(pass) if pass.dropped_events > 0 => {
                dropped_total += pass.dropped_events;
                warn!(
                    dropped = pass.dropped_events,
                    dropped_total, "health pass could not queue every dead node"
                );
            }
            Ok(_) => {}
            Err(e) => error!("health check failed: {}", e),
        }
    }

    info!("node health sweeper stopped");

    Ok(())
}
