//! Worker server: hosts a region store, joins the group published in the
//! workspace, and self-terminates when the master is gone.

use crate::bulk::BulkService;
use crate::common::{Error, Result};
use crate::group::GroupMembership;
use crate::region::{RegionService, RegionStore};
use crate::server::engine::Engine;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct WorkerOptions {
    pub addr: String,
    pub workspace: PathBuf,
    pub storage_path: PathBuf,
    pub heartbeat_period: Duration,
    /// Consecutive missed pings before the master is considered gone.
    pub failure_threshold: u32,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        WorkerOptions {
            addr: "127.0.0.1:0".to_owned(),
            workspace: PathBuf::from("."),
            storage_path: PathBuf::from("./flamestore-regions"),
            heartbeat_period: Duration::from_millis(500),
            failure_threshold: 3,
        }
    }
}

pub struct WorkerServer {
    engine: Arc<Engine>,
    store: Arc<RegionStore>,
    workspace: PathBuf,
    heartbeat_period: Duration,
    failure_threshold: u32,
}

impl WorkerServer {
    /// Bind the engine and open the region store. Either failing is fatal;
    /// the process is expected to exit non-zero.
    pub async fn new(opts: WorkerOptions) -> Result<WorkerServer> {
        let engine = Engine::bind(&opts.addr).await?;
        tracing::info!(endpoint = engine.endpoint(), "initializing worker");
        let store = Arc::new(RegionStore::open(&opts.storage_path)?);
        Ok(WorkerServer {
            engine,
            store,
            workspace: opts.workspace,
            heartbeat_period: opts.heartbeat_period,
            failure_threshold: opts.failure_threshold,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.engine.endpoint()
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    /// Serve the region store, join the group, and watch the master. Runs
    /// until remote shutdown or master loss finalizes the engine; leaving
    /// the group happens last so the master's drain barrier completes.
    pub async fn run(self) -> Result<()> {
        let router = tonic::transport::Server::builder()
            .add_service(RegionService::new(self.store.clone(), self.engine.clone()).into_server())
            .add_service(BulkService::new(self.engine.bulk()).into_server());

        // Serve before joining: the master probes us as soon as we join.
        let engine = self.engine.clone();
        let serving = tokio::spawn(async move { engine.serve(router).await });

        let membership = match GroupMembership::join(&self.workspace, self.engine.endpoint()).await
        {
            Ok(membership) => membership,
            Err(e) => {
                self.engine.finalize();
                let _ = serving.await;
                return Err(e);
            }
        };
        membership.spawn_master_watch(
            self.engine.clone(),
            self.heartbeat_period,
            self.failure_threshold,
        );

        let result = serving
            .await
            .map_err(|e| Error::Internal(format!("engine task failed: {}", e)))?;
        if let Err(e) = membership.leave().await {
            tracing::debug!(error = %e, "could not leave group");
        }
        tracing::info!("worker finalized");
        result
    }
}
