use std::sync::Arc;
use std::time::Duration;

use futures::{StreamExt, stream};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::core::directory::BlockDirectory;
use crate::core::health::DeadNodeEvent;
use crate::core::node::Node;
use crate::core::registry::NodeRegistry;
use crate::core::replicate::Replicator;

// in-flight replicate requests per batch
const REPLICATE_CONCURRENCY: usize = 8;

#[derive(Clone, Debug)]
pub struct RecoveryConfig {
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub replicate_timeout: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_pause: Duration::from_secs(10),
            replicate_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub matched: usize,
    pub requested: usize,
    pub failed: usize,
    pub skipped_no_target: usize,
    pub skipped_no_source: usize,
    pub stopped_on_revival: bool,
}

impl std::fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Recovery report:")?;
        writeln!(f, "  Scanned             = {}", self.scanned)?;
        writeln!(f, "  Matched             = {}", self.matched)?;
        writeln!(f, "  Requested           = {}", self.requested)?;
        writeln!(f, "  Failed              = {}", self.failed)?;
        writeln!(f, "  Skipped no target   = {}", self.skipped_no_target)?;
        writeln!(f, "  Skipped no source   = {}", self.skipped_no_source)?;
        writeln!(f, "  Stopped on revival  = {}", self.stopped_on_revival)?;
        Ok(())
    }
}

struct ReplicateJob {
    block_hash: String,
    source: String,
    target: Node,
}

/// Re-replicates the blocks a dead node held. Scans the directory in
/// batches and gives up as soon as the node is seen alive again at a batch
/// boundary.
#[derive(Clone)]
pub struct RecoveryWorker {
    directory: BlockDirectory,
    registry: NodeRegistry,
    replicator: Arc<dyn Replicator>,
    cfg: RecoveryConfig,
}

impl RecoveryWorker {
    pub fn new(
        directory: BlockDirectory,
        registry: NodeRegistry,
        replicator: Arc<dyn Replicator>,
        cfg: RecoveryConfig,
    ) -> Self {
        Self {
            directory,
            registry,
            replicator,
            cfg,
        }
    }

    #[tracing::instrument(
        name = "metanode.recovery",
        skip(self, dead),
        fields(run_id = %Uuid::new_v4(), node_id = %dead.id)
    )]
    pub async fn recover(&self, dead: &Node) -> anyhow::Result<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let mut cursor: Option<String> = None;

        info!("starting recovery of dead node blocks");

        loop {
            let page = self
                .directory
                .scan_page(cursor.as_deref(), self.cfg.batch_size)?;
            let membership = self.registry.membership()?;

            let mut jobs = Vec::new();
            for (_, record) in page.entries {
                report.scanned += 1;

                let mut holders = record.holder_ids;
                if !holders.remove(&dead.id) {
                    continue;
                }
                report.matched += 1;

                let Some(target) = membership
                    .live
                    .iter()
                    .find(|n| n.id != dead.id && !holders.contains(&n.id))
                else {
                    warn!(block_hash = %record.block_hash, "no live node to receive replica, block at risk");
                    report.skipped_no_target += 1;
                    continue;
                };

                let Some(source) = holders
                    .iter()
                    .find(|h| membership.live.iter().any(|n| &n.id == *h))
                else {
                    warn!(block_hash = %record.block_hash, "no live holder left to copy from, block at risk");
                    report.skipped_no_source += 1;
                    continue;
                };

                jobs.push(ReplicateJob {
                    block_hash: record.block_hash,
                    source: source.clone(),
                    target: target.clone(),
                });
            }

            let (requested, failed) = self.dispatch(jobs).await;
            report.requested += requested;
            report.failed += failed;

            let Some(next) = page.next else {
                break;
            };

            tokio::time::sleep(self.cfg.batch_pause).await;
            if !self.registry.is_dead(&dead.id)? {
                info!("node revived, stopping recovery");
                report.stopped_on_revival = true;
                break;
            }
            cursor = Some(next);
        }

        info!("\n{}", report);
        Ok(report)
    }

    /// Sends every job with a per-request timeout. Returns (requested, failed).
    async fn dispatch(&self, jobs: Vec<ReplicateJob>) -> (usize, usize) {
        let timeout = self.cfg.replicate_timeout;
        let results: Vec<bool> = stream::iter(jobs)
            .map(|job| {
                let replicator = self.replicator.clone();
                async move {
                    let res = tokio::time::timeout(
                        timeout,
                        replicator.request_replicate(&job.source, &job.target, &job.block_hash),
                    )
                    .await;
                    match res {
                        Ok(Ok(())) => {
                            info!(
                                block_hash = %job.block_hash,
                                source = %job.source,
                                target = %job.target.id,
                                "replication requested"
                            );
                            true
                        }
                        Ok(Err(e)) => {
                            warn!(block_hash = %job.block_hash, source = %job.source, "replication request failed: {}", e);
                            false
                        }
                        Err(_) => {
                            warn!(block_hash = %job.block_hash, source = %job.source, "replication request timed out");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(REPLICATE_CONCURRENCY)
            .collect()
            .await;

        let ok = results.iter().filter(|ok| **ok).count();
        (ok, results.len() - ok)
    }
}

/// Hands each dead-node event to its own task, at most `max_concurrent`
/// recoveries running at once. Receiving never waits on a free slot.
pub async fn recovery_dispatcher(
    worker: RecoveryWorker,
    mut events: mpsc::Receiver<DeadNodeEvent>,
    max_concurrent: usize,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks: JoinSet<anyhow::Result<RecoveryReport>> = JoinSet::new();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(DeadNodeEvent { node }) = event else {
                    break;
                };
                let worker = worker.clone();
                let permits = permits.clone();
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await?;
                    worker.recover(&node).await
                });
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("recovery failed: {}", e),
                    Err(e) => error!("recovery task panicked: {}", e),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tasks.shutdown().await;
    info!("recovery dispatcher stopped");

    Ok(())
}
