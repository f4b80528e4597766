//! Client shim.
//!
//! Connects to the master of a workspace (or an explicit endpoint) and
//! offers the model operations. The client hosts its own bulk service so
//! the server side can pull from and push into its buffers directly.

use crate::bulk::{BulkMode, BulkService};
use crate::common::{Error, Result, Status};
use crate::group::load_group_file;
use crate::proto::master::master_client::MasterClient;
use crate::proto::master::{
    DupModelRequest, ReadModelDataRequest, RegisterModelRequest, ReloadModelRequest,
    ShutdownRequest, WriteModelDataRequest,
};
use crate::server::engine::Engine;
use std::path::Path;
use std::sync::Arc;
use tonic::transport::Channel;

pub struct FlameStoreClient {
    master: MasterClient<Channel>,
    engine: Arc<Engine>,
}

impl FlameStoreClient {
    /// Connect to a master endpoint, exposing this process's buffers
    /// through a bulk service on an ephemeral port.
    pub async fn connect(master_endpoint: &str) -> Result<FlameStoreClient> {
        let engine = Engine::bind("127.0.0.1:0").await?;
        let router = tonic::transport::Server::builder()
            .add_service(BulkService::new(engine.bulk()).into_server());
        let serving = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = serving.serve(router).await {
                tracing::error!(error = %e, "client bulk service failed");
            }
        });
        let master = MasterClient::connect(master_endpoint.to_owned())
            .await
            .map_err(Error::from)?;
        tracing::debug!(master = master_endpoint, addr = engine.endpoint(), "client connected");
        Ok(FlameStoreClient { master, engine })
    }

    /// Connect to the master advertised in a workspace.
    pub async fn connect_workspace(workspace: &Path) -> Result<FlameStoreClient> {
        let file = load_group_file(workspace)?;
        Self::connect(&file.master).await
    }

    /// Address the server side uses to reach this client's memory.
    pub fn addr(&self) -> &str {
        self.engine.endpoint()
    }

    pub async fn register_model(
        &self,
        name: &str,
        config: &str,
        size: u64,
        signature: &str,
    ) -> Result<Status> {
        let mut master = self.master.clone();
        let status = master
            .register_model(RegisterModelRequest {
                client_addr: self.addr().to_owned(),
                name: name.to_owned(),
                config: config.to_owned(),
                size,
                signature: signature.to_owned(),
            })
            .await?
            .into_inner();
        Ok(status.into())
    }

    /// On `Ok`, the returned status carries the model config in its message.
    pub async fn reload_model(&self, name: &str) -> Result<Status> {
        let mut master = self.master.clone();
        let status = master
            .reload_model(ReloadModelRequest {
                client_addr: self.addr().to_owned(),
                name: name.to_owned(),
            })
            .await?
            .into_inner();
        Ok(status.into())
    }

    /// Write the model's full byte buffer.
    pub async fn write_model(&self, name: &str, signature: &str, data: &[u8]) -> Result<Status> {
        let registry = self.engine.bulk();
        let exposed = registry.expose(data.to_vec(), BulkMode::ReadOnly);
        let mut master = self.master.clone();
        let result = master
            .write_model_data(WriteModelDataRequest {
                client_addr: self.addr().to_owned(),
                name: name.to_owned(),
                signature: signature.to_owned(),
                bulk: Some(exposed.handle.clone()),
                size: data.len() as u64,
            })
            .await;
        registry.unexpose(&exposed);
        Ok(result?.into_inner().into())
    }

    /// Read the model's full byte buffer. The returned bytes are only
    /// meaningful when the status is `Ok`.
    pub async fn read_model(
        &self,
        name: &str,
        signature: &str,
        size: u64,
    ) -> Result<(Status, Vec<u8>)> {
        let registry = self.engine.bulk();
        let exposed = registry.expose(vec![0u8; size as usize], BulkMode::WriteOnly);
        let mut master = self.master.clone();
        let result = master
            .read_model_data(ReadModelDataRequest {
                client_addr: self.addr().to_owned(),
                name: name.to_owned(),
                signature: signature.to_owned(),
                bulk: Some(exposed.handle.clone()),
                size,
            })
            .await;
        let data = exposed.bytes();
        registry.unexpose(&exposed);
        Ok((result?.into_inner().into(), data))
    }

    pub async fn duplicate_model(&self, name: &str, new_name: &str) -> Result<Status> {
        let mut master = self.master.clone();
        let status = master
            .dup_model(DupModelRequest {
                name: name.to_owned(),
                new_name: new_name.to_owned(),
            })
            .await?
            .into_inner();
        Ok(status.into())
    }

    /// Ask the master to drain and shut down the fleet.
    pub async fn shutdown(&self) -> Result<Status> {
        let mut master = self.master.clone();
        let status = master.shutdown(ShutdownRequest {}).await?.into_inner();
        Ok(status.into())
    }
}

impl Drop for FlameStoreClient {
    fn drop(&mut self) {
        self.engine.finalize();
    }
}
