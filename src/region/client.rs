//! Client handle to a remote region store.

use crate::common::{Error, Result};
use crate::proto::common::BulkHandle;
use crate::proto::region::region_client::RegionClient as GrpcRegionClient;
use crate::proto::region::{
    CreateRequest, MigrateRequest, PersistRequest, ProbeRequest, ReadRequest, ShutdownRequest,
    WriteRequest,
};
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

fn parse_region_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::Storage(format!("malformed region id {}: {}", raw, e)))
}

/// Handle to one worker's region service. Clones share the underlying
/// channel, so any number of storage targets on the same worker cost one
/// connection.
#[derive(Clone)]
pub struct RegionClient {
    inner: GrpcRegionClient<Channel>,
}

impl RegionClient {
    pub fn new(channel: Channel) -> Self {
        RegionClient {
            inner: GrpcRegionClient::new(channel),
        }
    }

    pub async fn connect(endpoint: &str) -> Result<Self> {
        let channel = Endpoint::from_shared(endpoint.to_owned())
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", endpoint, e)))?
            .connect()
            .await?;
        Ok(Self::new(channel))
    }

    pub async fn create(&self, target: Uuid, size: u64) -> Result<Uuid> {
        let mut client = self.inner.clone();
        let response = client
            .create(CreateRequest {
                target: target.to_string(),
                size,
            })
            .await
            .map_err(|s| Error::Storage(format!("region create failed: {}", s.message())))?
            .into_inner();
        parse_region_id(&response.region)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn write(
        &self,
        target: Uuid,
        region: Uuid,
        offset: u64,
        bulk: BulkHandle,
        origin_offset: u64,
        origin_addr: &str,
        size: u64,
    ) -> Result<()> {
        let mut client = self.inner.clone();
        client
            .write(WriteRequest {
                target: target.to_string(),
                region: region.to_string(),
                offset,
                bulk: Some(bulk),
                origin_offset,
                origin_addr: origin_addr.to_owned(),
                size,
            })
            .await
            .map_err(|s| Error::Storage(format!("region write failed: {}", s.message())))?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn read(
        &self,
        target: Uuid,
        region: Uuid,
        offset: u64,
        bulk: BulkHandle,
        origin_offset: u64,
        origin_addr: &str,
        size: u64,
    ) -> Result<u64> {
        let mut client = self.inner.clone();
        let response = client
            .read(ReadRequest {
                target: target.to_string(),
                region: region.to_string(),
                offset,
                bulk: Some(bulk),
                origin_offset,
                origin_addr: origin_addr.to_owned(),
                size,
            })
            .await
            .map_err(|s| Error::Storage(format!("region read failed: {}", s.message())))?
            .into_inner();
        Ok(response.bytes_read)
    }

    pub async fn persist(&self, target: Uuid, region: Uuid, offset: u64, size: u64) -> Result<()> {
        let mut client = self.inner.clone();
        client
            .persist(PersistRequest {
                target: target.to_string(),
                region: region.to_string(),
                offset,
                size,
            })
            .await
            .map_err(|s| Error::Storage(format!("region persist failed: {}", s.message())))?;
        Ok(())
    }

    /// Copy a region to another worker's target. The source region is kept.
    pub async fn migrate(
        &self,
        source_target: Uuid,
        source_region: Uuid,
        size: u64,
        dest_addr: &str,
        dest_target: Uuid,
    ) -> Result<Uuid> {
        let mut client = self.inner.clone();
        let response = client
            .migrate(MigrateRequest {
                source_target: source_target.to_string(),
                source_region: source_region.to_string(),
                size,
                dest_addr: dest_addr.to_owned(),
                dest_target: dest_target.to_string(),
            })
            .await
            .map_err(|s| Error::Storage(format!("region migrate failed: {}", s.message())))?
            .into_inner();
        parse_region_id(&response.region)
    }

    /// Ask a worker which storage targets it advertises.
    pub async fn probe(&self) -> Result<Vec<Uuid>> {
        let mut client = self.inner.clone();
        let response = client
            .probe(ProbeRequest {})
            .await
            .map_err(|s| Error::Storage(format!("region probe failed: {}", s.message())))?
            .into_inner();
        response
            .targets
            .iter()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|e| Error::Storage(format!("malformed target id {}: {}", raw, e)))
            })
            .collect()
    }

    /// Remote-shutdown of the hosting worker.
    pub async fn shutdown(&self) -> Result<()> {
        let mut client = self.inner.clone();
        client
            .shutdown(ShutdownRequest {})
            .await
            .map_err(|s| Error::Storage(format!("remote shutdown failed: {}", s.message())))?;
        Ok(())
    }
}
