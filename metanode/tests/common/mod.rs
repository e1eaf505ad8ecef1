#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::{Json, State};
use axum::routing::post;
use axum::Router;
use axum_server::Server;
use reqwest::Client;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use common::constants::REPLICATE_BLOCK_PATH;
use common::schemas::{BlockNodeRequest, RegisterNodeRequest, ReplicateBlockRequest};
use metanode::config::HealthThresholds;
use metanode::core::directory::BlockDirectory;
use metanode::core::health::node_health_sweeper;
use metanode::core::meta::KvDb;
use metanode::core::node::Node;
use metanode::core::notify::BroadcastNotifier;
use metanode::core::placement::{PlacementPolicy, Selector};
use metanode::core::recovery::{RecoveryConfig, RecoveryWorker, recovery_dispatcher};
use metanode::core::registry::NodeRegistry;
use metanode::core::replicate::HttpReplicator;
use metanode::core::routes::router;
use metanode::core::state::MetaState;

pub struct TestServer {
    pub handle: JoinHandle<Result<(), anyhow::Error>>,
    pub addr: SocketAddr,
    pub url: String,
}

impl TestServer {
    async fn spawn(app: Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            let server = Server::from_tcp(listener.into_std()?).serve(app.into_make_service());
            server.await.map_err(anyhow::Error::from)
        });

        Ok(Self { handle, addr, url })
    }

    pub async fn shutdown(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

pub struct TestMetaNode {
    pub server: TestServer,
    pub state: MetaState,
    pub index_dir: TempDir,
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<Result<(), anyhow::Error>>>,
}

impl TestMetaNode {
    pub async fn new() -> Result<Self> {
        Self::with_config(300, 800, 100, 3, PlacementPolicy::RoundRobin).await
    }

    pub async fn with_config(
        warning_ms: u64,
        dead_ms: u64,
        sweep_ms: u64,
        replication_factor: usize,
        policy: PlacementPolicy,
    ) -> Result<Self> {
        let index_dir = TempDir::new()?;
        let db = KvDb::open(&index_dir.path().join("index"))?;

        let thresholds = HealthThresholds::new(
            Duration::from_millis(warning_ms),
            Duration::from_millis(dead_ms),
        )?;
        let notifier = Arc::new(BroadcastNotifier::new(64));
        let registry = NodeRegistry::new(thresholds, notifier.clone());
        let selector = Arc::new(Selector::new(policy));
        let directory =
            BlockDirectory::new(db, registry.clone(), selector, replication_factor);

        let recovery = RecoveryConfig {
            batch_size: 100,
            batch_pause: Duration::from_millis(20),
            replicate_timeout: Duration::from_secs(2),
        };
        let replicator = Arc::new(HttpReplicator::new(
            Client::new(),
            recovery.replicate_timeout,
        ));
        let worker = RecoveryWorker::new(directory.clone(), registry.clone(), replicator, recovery);

        let (events_tx, events_rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let background = vec![
            tokio::spawn(node_health_sweeper(
                registry.clone(),
                Duration::from_millis(sweep_ms),
                events_tx,
                shutdown_rx.clone(),
            )),
            tokio::spawn(recovery_dispatcher(worker, events_rx, 2, shutdown_rx)),
        ];

        let state = MetaState {
            registry,
            directory,
            notifier,
        };
        let server = TestServer::spawn(router(state.clone())).await?;

        Ok(Self {
            server,
            state,
            index_dir,
            shutdown_tx,
            background,
        })
    }

    pub fn url(&self) -> &str {
        &self.server.url
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        for handle in self.background {
            let _ = handle.await;
        }
        self.server.shutdown().await;
        Ok(())
    }
}

/// Storage node stand-in: records replicate requests and can heartbeat
/// against a metanode. Its id is its own address.
pub struct TestStorageNode {
    pub server: TestServer,
    pub replicate_requests: Arc<Mutex<Vec<ReplicateBlockRequest>>>,
    heartbeat_handle: Option<JoinHandle<()>>,
}

async fn record_replicate(
    State(log): State<Arc<Mutex<Vec<ReplicateBlockRequest>>>>,
    Json(req): Json<ReplicateBlockRequest>,
) -> &'static str {
    log.lock().unwrap().push(req);
    "accepted"
}

impl TestStorageNode {
    pub async fn new() -> Result<Self> {
        let replicate_requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(REPLICATE_BLOCK_PATH, post(record_replicate))
            .with_state(replicate_requests.clone());
        let server = TestServer::spawn(app).await?;

        Ok(Self {
            server,
            replicate_requests,
            heartbeat_handle: None,
        })
    }

    pub fn id(&self) -> String {
        self.server.addr.to_string()
    }

    pub fn requests(&self) -> Vec<ReplicateBlockRequest> {
        self.replicate_requests.lock().unwrap().clone()
    }

    pub async fn register(&self, meta_url: &str) -> Result<String> {
        register_node(&Client::new(), meta_url, &self.id(), &self.server.url, 0).await
    }

    pub fn start_heartbeat(&mut self, meta_url: &str, interval_ms: u64) {
        let client = Client::new();
        let meta_url = meta_url.to_string();
        let id = self.id();
        let local_url = self.server.url.clone();

        self.heartbeat_handle = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                tick.tick().await;
                let _ = register_node(&client, &meta_url, &id, &local_url, 0).await;
            }
        }));
    }

    pub fn stop_heartbeat(&mut self) {
        if let Some(handle) = self.heartbeat_handle.take() {
            handle.abort();
        }
    }

    pub async fn shutdown(mut self) {
        self.stop_heartbeat();
        self.server.shutdown().await;
    }
}

// HTTP client utilities
pub async fn register_node(
    client: &Client,
    meta_url: &str,
    id: &str,
    local_url: &str,
    block_count: u64,
) -> Result<String> {
    let payload = RegisterNodeRequest {
        id: id.to_string(),
        local_url: local_url.to_string(),
        block_count,
    };
    let resp = client
        .post(format!("{}/metadata/register-node", meta_url))
        .json(&payload)
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("register failed: {}", resp.status());
    }
    let body: serde_json::Value = resp.json().await?;
    Ok(body["message"].as_str().unwrap_or_default().to_string())
}

pub async fn list_nodes(client: &Client, meta_url: &str) -> Result<Vec<Node>> {
    let resp = client
        .get(format!("{}/metadata/get-registered-nodes", meta_url))
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("list_nodes failed: {}", resp.status());
    }
    Ok(resp.json().await?)
}

pub async fn list_dead_nodes(
    client: &Client,
    meta_url: &str,
) -> Result<std::collections::BTreeMap<String, Node>> {
    let resp = client
        .get(format!("{}/metadata/get-dead-nodes", meta_url))
        .send()
        .await?;
    Ok(resp.json().await?)
}

pub async fn register_block(
    client: &Client,
    meta_url: &str,
    hash: &str,
    node: &str,
) -> Result<reqwest::StatusCode> {
    let resp = client
        .post(format!("{}/metadata/block/register-block-location", meta_url))
        .json(&block_req(Some(hash), Some(node)))
        .send()
        .await?;
    Ok(resp.status())
}

pub fn block_req(hash: Option<&str>, node: Option<&str>) -> BlockNodeRequest {
    BlockNodeRequest {
        hash: hash.map(str::to_string),
        node_url: node.map(str::to_string),
    }
}

// Utility functions
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut check_fn: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let timeout_duration = Duration::from_millis(timeout_ms);

    loop {
        if check_fn().await? {
            return Ok(());
        }

        if start.elapsed() > timeout_duration {
            anyhow::bail!("wait_until timed out after {}ms", timeout_ms);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
