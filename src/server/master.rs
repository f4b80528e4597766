//! Master server: owns the engine, founds the group, publishes the
//! workspace files, hosts the provider, and tears the fleet down in order.

use crate::backend::{create_backend, Backend, BackendContext};
use crate::common::config::BackendConfig;
use crate::common::{Error, Result};
use crate::group::{self, Group, GroupFile, GroupService, MembershipListener};
use crate::server::engine::Engine;
use crate::server::provider::MasterProvider;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct MasterOptions {
    pub addr: String,
    pub workspace: PathBuf,
    pub backend: String,
    pub backend_config: BackendConfig,
    /// How long a worker may stay silent before it is declared dead.
    pub member_deadline: Duration,
}

impl Default for MasterOptions {
    fn default() -> Self {
        MasterOptions {
            addr: "127.0.0.1:8650".to_owned(),
            workspace: PathBuf::from("."),
            backend: "memory".to_owned(),
            backend_config: BackendConfig::new(),
            member_deadline: Duration::from_secs(3),
        }
    }
}

/// Membership glue: forwards group events to the active backend.
struct BackendListener {
    backend: Arc<dyn Backend>,
}

#[async_trait]
impl MembershipListener for BackendListener {
    async fn on_joined(&self, member_id: u64, addr: &str) {
        self.backend.on_worker_joined(member_id, addr).await;
    }

    async fn on_left(&self, member_id: u64) {
        self.backend.on_worker_left(member_id).await;
    }

    async fn on_died(&self, member_id: u64) {
        self.backend.on_worker_died(member_id).await;
    }
}

pub struct MasterServer {
    engine: Arc<Engine>,
    group: Arc<Group>,
    backend: Option<Arc<dyn Backend>>,
    workspace: PathBuf,
}

impl MasterServer {
    pub async fn new(opts: MasterOptions) -> Result<MasterServer> {
        let engine = Engine::bind(&opts.addr).await?;
        tracing::info!(endpoint = engine.endpoint(), "initializing master");

        // Found the group and make it discoverable before anything can join.
        let group = Group::create(opts.member_deadline);
        group::publish(
            &opts.workspace,
            &GroupFile {
                group: group.id(),
                master: engine.endpoint().to_owned(),
            },
        )?;

        let ctx = BackendContext {
            endpoint: engine.endpoint().to_owned(),
        };
        let backend: Option<Arc<dyn Backend>> = match create_backend(&opts.backend, ctx, &opts.backend_config) {
            Ok(backend) => Some(Arc::from(backend)),
            Err(Error::UnknownBackend(name)) => {
                // Keep serving: every operation will answer that no backend
                // is configured.
                tracing::error!(backend = %name, "could not find factory for backend");
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(backend) = &backend {
            group.set_listener(Arc::new(BackendListener {
                backend: backend.clone(),
            }));
        }
        group.spawn_reaper(engine.shutdown_signal());

        Ok(MasterServer {
            engine,
            group,
            backend,
            workspace: opts.workspace,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.engine.endpoint()
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    pub fn group(&self) -> Arc<Group> {
        self.group.clone()
    }

    /// Serve until the engine finalizes, then tear down: destroy the group
    /// and withdraw the published files, then drop the backend.
    pub async fn run(self) -> Result<()> {
        let provider = MasterProvider::new(self.engine.clone(), self.backend.clone());
        let router = tonic::transport::Server::builder()
            .add_service(provider.into_server())
            .add_service(GroupService::new(self.group.clone()).into_server());
        let result = self.engine.serve(router).await;

        self.group.destroy().await;
        if let Err(e) = group::unpublish(&self.workspace) {
            tracing::warn!(error = %e, "could not withdraw group files");
        }
        drop(self.backend);
        tracing::info!("master finalized");
        result
    }
}
