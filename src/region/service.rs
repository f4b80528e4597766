//! gRPC surface of a worker's region store.

use crate::bulk::{self, BulkMode};
use crate::proto::region::region_server::{Region, RegionServer};
use crate::proto::region::{
    CreateRequest, CreateResponse, MigrateRequest, MigrateResponse, PersistRequest,
    PersistResponse, ProbeRequest, ProbeResponse, ReadRequest, ReadResponse, ShutdownRequest,
    ShutdownResponse, WriteRequest, WriteResponse,
};
use crate::region::{RegionClient, RegionStore};
use crate::server::engine::Engine;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use uuid::Uuid;

pub struct RegionService {
    store: Arc<RegionStore>,
    engine: Arc<Engine>,
}

impl RegionService {
    pub fn new(store: Arc<RegionStore>, engine: Arc<Engine>) -> Self {
        RegionService { store, engine }
    }

    pub fn into_server(self) -> RegionServer<Self> {
        RegionServer::new(self)
    }
}

fn parse_id(raw: &str, what: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw)
        .map_err(|_| Status::invalid_argument(format!("malformed {} id: {}", what, raw)))
}

#[tonic::async_trait]
impl Region for RegionService {
    async fn create(
        &self,
        request: Request<CreateRequest>,
    ) -> Result<Response<CreateResponse>, Status> {
        let req = request.into_inner();
        let target = parse_id(&req.target, "target")?;
        tracing::debug!(%target, size = req.size, "create region");
        let region = self
            .store
            .create(target, req.size)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(CreateResponse {
            region: region.to_string(),
        }))
    }

    async fn write(
        &self,
        request: Request<WriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let req = request.into_inner();
        let target = parse_id(&req.target, "target")?;
        let region = parse_id(&req.region, "region")?;
        let bulk = req
            .bulk
            .ok_or_else(|| Status::invalid_argument("missing bulk handle"))?;
        tracing::debug!(%target, %region, origin = %req.origin_addr, size = req.size, "proxied write");

        // One-sided pull from the origin's exposed memory, then store.
        let data = bulk::pull(&req.origin_addr, &bulk, req.origin_offset, req.size)
            .await
            .map_err(|e| Status::unavailable(format!("pull from origin failed: {}", e)))?;
        self.store
            .write(target, region, req.offset, &data)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(WriteResponse {}))
    }

    async fn read(&self, request: Request<ReadRequest>) -> Result<Response<ReadResponse>, Status> {
        let req = request.into_inner();
        let target = parse_id(&req.target, "target")?;
        let region = parse_id(&req.region, "region")?;
        let bulk = req
            .bulk
            .ok_or_else(|| Status::invalid_argument("missing bulk handle"))?;
        tracing::debug!(%target, %region, origin = %req.origin_addr, size = req.size, "proxied read");

        let data = self
            .store
            .read(target, region, req.offset, req.size)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        let bytes_read = bulk::push(&req.origin_addr, &bulk, req.origin_offset, &data)
            .await
            .map_err(|e| Status::unavailable(format!("push to origin failed: {}", e)))?;
        Ok(Response::new(ReadResponse { bytes_read }))
    }

    async fn persist(
        &self,
        request: Request<PersistRequest>,
    ) -> Result<Response<PersistResponse>, Status> {
        let req = request.into_inner();
        let target = parse_id(&req.target, "target")?;
        let region = parse_id(&req.region, "region")?;
        self.store
            .persist(target, region)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(PersistResponse {}))
    }

    async fn migrate(
        &self,
        request: Request<MigrateRequest>,
    ) -> Result<Response<MigrateResponse>, Status> {
        let req = request.into_inner();
        let source_target = parse_id(&req.source_target, "target")?;
        let source_region = parse_id(&req.source_region, "region")?;
        let dest_target = parse_id(&req.dest_target, "target")?;
        tracing::info!(
            %source_region,
            dest = %req.dest_addr,
            size = req.size,
            "migrating region"
        );

        let data = self
            .store
            .read(source_target, source_region, 0, req.size)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;

        // Hand the bytes to the destination through the regular proxied
        // write path: expose them locally, let the destination pull.
        let dest = RegionClient::connect(&req.dest_addr)
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;
        let new_region = dest
            .create(dest_target, req.size)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        let registry = self.engine.bulk();
        let exposed = registry.expose(data, BulkMode::ReadOnly);
        let result = dest
            .write(
                dest_target,
                new_region,
                0,
                exposed.handle.clone(),
                0,
                self.engine.endpoint(),
                req.size,
            )
            .await;
        registry.unexpose(&exposed);
        result.map_err(|e| Status::internal(e.to_string()))?;

        Ok(Response::new(MigrateResponse {
            region: new_region.to_string(),
        }))
    }

    async fn probe(
        &self,
        _request: Request<ProbeRequest>,
    ) -> Result<Response<ProbeResponse>, Status> {
        let targets = self
            .store
            .targets()
            .iter()
            .map(|id| id.to_string())
            .collect();
        Ok(Response::new(ProbeResponse { targets }))
    }

    async fn shutdown(
        &self,
        _request: Request<ShutdownRequest>,
    ) -> Result<Response<ShutdownResponse>, Status> {
        tracing::info!("received remote shutdown");
        self.engine.finalize();
        Ok(Response::new(ShutdownResponse {}))
    }
}
