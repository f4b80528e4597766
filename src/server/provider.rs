//! Master provider: the client-facing RPC surface. Every handler logs the
//! request, dispatches to the active backend (or answers that no backend is
//! configured), and sends the backend's status exactly once.

use crate::backend::Backend;
use crate::common::{Status, StatusCode};
use crate::proto::common::Status as WireStatus;
use crate::proto::master::master_server::{Master, MasterServer as MasterGrpcServer};
use crate::proto::master::{
    DupModelRequest, ReadModelDataRequest, RegisterModelRequest, ReloadModelRequest,
    ShutdownRequest, WriteModelDataRequest,
};
use crate::server::engine::Engine;
use std::sync::Arc;
use tonic::{Request, Response};

pub struct MasterProvider {
    engine: Arc<Engine>,
    backend: Option<Arc<dyn Backend>>,
}

impl MasterProvider {
    pub fn new(engine: Arc<Engine>, backend: Option<Arc<dyn Backend>>) -> Self {
        MasterProvider { engine, backend }
    }

    pub fn into_server(self) -> MasterGrpcServer<Self> {
        MasterGrpcServer::new(self)
    }

    fn no_backend() -> Status {
        tracing::error!("no backend configured");
        Status::new(StatusCode::Backend, "no backend configured")
    }
}

fn reply(status: Status) -> Result<Response<WireStatus>, tonic::Status> {
    Ok(Response::new(status.into()))
}

#[tonic::async_trait]
impl Master for MasterProvider {
    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        tracing::debug!("received a request to shut down");
        if let Some(backend) = &self.backend {
            backend.on_shutdown().await;
        }
        self.engine.finalize();
        reply(Status::ok())
    }

    async fn register_model(
        &self,
        request: Request<RegisterModelRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        let req = request.into_inner();
        tracing::debug!(model = %req.name, client = %req.client_addr, "register model");
        let status = match &self.backend {
            Some(backend) => {
                backend
                    .register_model(&req.client_addr, &req.name, &req.config, req.size, &req.signature)
                    .await
            }
            None => Self::no_backend(),
        };
        reply(status)
    }

    async fn reload_model(
        &self,
        request: Request<ReloadModelRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        let req = request.into_inner();
        tracing::debug!(model = %req.name, client = %req.client_addr, "reload model");
        let status = match &self.backend {
            Some(backend) => backend.reload_model(&req.client_addr, &req.name).await,
            None => Self::no_backend(),
        };
        reply(status)
    }

    async fn write_model_data(
        &self,
        request: Request<WriteModelDataRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        let req = request.into_inner();
        tracing::debug!(model = %req.name, client = %req.client_addr, "write model data");
        let bulk = req
            .bulk
            .ok_or_else(|| tonic::Status::invalid_argument("missing bulk handle"))?;
        let status = match &self.backend {
            Some(backend) => {
                backend
                    .write_model(&req.client_addr, &req.name, &req.signature, bulk, req.size)
                    .await
            }
            None => Self::no_backend(),
        };
        reply(status)
    }

    async fn read_model_data(
        &self,
        request: Request<ReadModelDataRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        let req = request.into_inner();
        tracing::debug!(model = %req.name, client = %req.client_addr, "read model data");
        let bulk = req
            .bulk
            .ok_or_else(|| tonic::Status::invalid_argument("missing bulk handle"))?;
        let status = match &self.backend {
            Some(backend) => {
                backend
                    .read_model(&req.client_addr, &req.name, &req.signature, bulk, req.size)
                    .await
            }
            None => Self::no_backend(),
        };
        reply(status)
    }

    async fn dup_model(
        &self,
        request: Request<DupModelRequest>,
    ) -> Result<Response<WireStatus>, tonic::Status> {
        let req = request.into_inner();
        tracing::debug!(model = %req.name, duplicate = %req.new_name, "duplicate model");
        let status = match &self.backend {
            Some(backend) => backend.duplicate_model(&req.name, &req.new_name).await,
            None => Self::no_backend(),
        };
        reply(status)
    }
}
