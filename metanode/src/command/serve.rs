use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::info;

use common::url_utils::parse_socket_addr;

use crate::config::{HealthThresholds, MetaConfig};
use crate::core::directory::BlockDirectory;
use crate::core::health::node_health_sweeper;
use crate::core::meta::KvDb;
use crate::core::notify::BroadcastNotifier;
use crate::core::placement::{PlacementPolicy, Selector};
use crate::core::recovery::{RecoveryConfig, RecoveryWorker, recovery_dispatcher};
use crate::core::registry::NodeRegistry;
use crate::core::replicate::HttpReplicator;
use crate::core::routes::router;
use crate::core::state::MetaState;

// buffered registry snapshots per event subscriber
const NOTIFY_CAPACITY: usize = 256;

#[derive(Parser, Debug, Clone)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, env = "METANODE_LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: String,

    /// RocksDB directory holding block locations
    #[arg(long, env = "METANODE_INDEX", default_value = "./data/index")]
    pub index: PathBuf,

    /// Target number of live holders per block
    #[arg(long, env = "METANODE_REPLICATION_FACTOR", default_value_t = 3)]
    pub replication_factor: usize,

    /// Health scan period (milliseconds)
    #[arg(long, env = "METANODE_HEARTBEAT_INTERVAL_MS", default_value_t = 10_000)]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a node is flagged WARNING (milliseconds)
    #[arg(long, env = "METANODE_WARNING_THRESHOLD_MS", default_value_t = 15_000)]
    pub warning_threshold_ms: u64,

    /// Silence after which a node is declared dead (milliseconds)
    #[arg(long, env = "METANODE_DEAD_THRESHOLD_MS", default_value_t = 30_000)]
    pub dead_threshold_ms: u64,

    /// Block records scanned per recovery batch
    #[arg(long, env = "METANODE_RECOVERY_BATCH_SIZE", default_value_t = 1000)]
    pub recovery_batch_size: usize,

    /// Pause between recovery batches (milliseconds)
    #[arg(long, env = "METANODE_RECOVERY_BATCH_PAUSE_MS", default_value_t = 10_000)]
    pub recovery_batch_pause_ms: u64,

    /// Timeout for one replicate request (milliseconds)
    #[arg(long, env = "METANODE_REPLICATE_TIMEOUT_MS", default_value_t = 5_000)]
    pub replicate_timeout_ms: u64,

    /// Dead-node recoveries allowed to run at once
    #[arg(long, env = "METANODE_MAX_CONCURRENT_RECOVERIES", default_value_t = 4)]
    pub max_concurrent_recoveries: usize,

    /// Capacity of the dead-node event queue
    #[arg(long, env = "METANODE_DEAD_EVENT_QUEUE", default_value_t = 64)]
    pub dead_event_queue: usize,

    /// Replica placement policy
    #[arg(long, env = "METANODE_PLACEMENT_POLICY", value_enum, default_value_t = PlacementPolicy::LeastLoaded)]
    pub placement_policy: PlacementPolicy,
}

impl ServeArgs {
    pub fn to_config(&self) -> anyhow::Result<MetaConfig> {
        let cfg = MetaConfig {
            replication_factor: self.replication_factor,
            placement_policy: self.placement_policy,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            thresholds: HealthThresholds::new(
                Duration::from_millis(self.warning_threshold_ms),
                Duration::from_millis(self.dead_threshold_ms),
            )?,
            recovery: RecoveryConfig {
                batch_size: self.recovery_batch_size,
                batch_pause: Duration::from_millis(self.recovery_batch_pause_ms),
                replicate_timeout: Duration::from_millis(self.replicate_timeout_ms),
            },
            max_concurrent_recoveries: self.max_concurrent_recoveries,
            dead_event_queue: self.dead_event_queue,
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

pub async fn serve(serve_args: ServeArgs) -> anyhow::Result<()> {
    let cfg = serve_args.to_config()?;
    let db = KvDb::open(&serve_args.index)?;

    let notifier = Arc::new(BroadcastNotifier::new(NOTIFY_CAPACITY));
    let registry = NodeRegistry::new(cfg.thresholds, notifier.clone());
    let selector = Arc::new(Selector::new(cfg.placement_policy));
    let directory = BlockDirectory::new(db, registry.clone(), selector, cfg.replication_factor);

    let http = reqwest::Client::builder()
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(30))
        .build()?;
    let replicator = Arc::new(HttpReplicator::new(http, cfg.recovery.replicate_timeout));
    let worker = RecoveryWorker::new(
        directory.clone(),
        registry.clone(),
        replicator,
        cfg.recovery.clone(),
    );

    // Health monitor -> recovery
    let (events_tx, events_rx) = mpsc::channel(cfg.dead_event_queue);
    let (shutdown_tx, shutdown_rx) = watch::channel::<bool>(false);

    let sweeper_handle = tokio::spawn(node_health_sweeper(
        registry.clone(),
        cfg.heartbeat_interval,
        events_tx,
        shutdown_rx.clone(),
    ));
    let dispatcher_handle = tokio::spawn(recovery_dispatcher(
        worker,
        events_rx,
        cfg.max_concurrent_recoveries,
        shutdown_rx,
    ));

    let state = MetaState {
        registry,
        directory,
        notifier,
    };
    let app = router(state);

    let socket_addr = parse_socket_addr(&serve_args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        replication_factor = cfg.replication_factor,
        policy = ?cfg.placement_policy,
        "listening on {}",
        serve_args.listen
    );

    // Graceful shutdown: ctrl+c
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = sweeper_handle.await;
    let _ = dispatcher_handle.await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        serve: ServeArgs,
    }

    #[test]
    fn defaults_build_a_valid_config() {
        let cli = Cli::try_parse_from(["metanode"]).unwrap();
        let cfg = cli.serve.to_config().unwrap();
        assert_eq!(cfg.replication_factor, 3);
        assert_eq!(cfg.placement_policy, PlacementPolicy::LeastLoaded);
        assert_eq!(cfg.thresholds.dead(), Duration::from_secs(30));
        assert_eq!(cfg.recovery.batch_size, 1000);
    }

    #[test]
    fn misordered_thresholds_refuse_to_start() {
        let cli = Cli::try_parse_from([
            "metanode",
            "--warning-threshold-ms",
            "30000",
            "--dead-threshold-ms",
            "15000",
        ])
        .unwrap();
        assert!(cli.serve.to_config().is_err());
    }

    #[test]
    fn policy_flag_parses_kebab_case() {
        let cli = Cli::try_parse_from(["metanode", "--placement-policy", "round-robin"]).unwrap();
        assert_eq!(cli.serve.placement_policy, PlacementPolicy::RoundRobin);
    }
}
