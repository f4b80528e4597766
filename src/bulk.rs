//! One-sided bulk transfers.
//!
//! A process that wants to expose memory registers a buffer with its
//! [`BulkRegistry`] and hands the resulting handle to its peer; the peer
//! pulls from or pushes into the buffer by calling the exposer's bulk
//! service. The exposer never initiates the transfer, which is what makes
//! proxied reads and writes possible: the master forwards a client's handle
//! to a worker and the worker moves the bytes directly.

use crate::common::{Error, Result};
use crate::proto::bulk::bulk_client::BulkClient;
use crate::proto::bulk::bulk_server::{Bulk, BulkServer};
use crate::proto::bulk::{push_request, PullChunk, PullRequest, PushHeader, PushRequest, PushResponse};
use crate::proto::common::BulkHandle;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tonic::{Request, Response, Status, Streaming};

pub const BULK_CHUNK_SIZE: usize = 1024 * 1024;

/// Access mode of an exposed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

struct Exposed {
    data: Mutex<Vec<u8>>,
    mode: BulkMode,
}

/// Registry of buffers exposed for one-sided transfer, shared between the
/// owning process and its bulk service.
#[derive(Default)]
pub struct BulkRegistry {
    buffers: RwLock<HashMap<u64, Arc<Exposed>>>,
    next_handle: AtomicU64,
}

/// An exposed buffer. Dropping the guard does not unregister; call
/// [`BulkRegistry::unexpose`] when the transfer is done.
pub struct BulkRef {
    pub handle: BulkHandle,
    exposed: Arc<Exposed>,
}

impl BulkRef {
    /// Copy of the buffer contents, after the peer pushed into it.
    pub fn bytes(&self) -> Vec<u8> {
        self.exposed.data.lock().expect("bulk buffer lock poisoned").clone()
    }
}

impl BulkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose a buffer and return the handle the peer needs to reach it.
    pub fn expose(&self, data: Vec<u8>, mode: BulkMode) -> BulkRef {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let size = data.len() as u64;
        let exposed = Arc::new(Exposed {
            data: Mutex::new(data),
            mode,
        });
        self.buffers
            .write()
            .expect("bulk registry lock poisoned")
            .insert(handle, exposed.clone());
        BulkRef {
            handle: BulkHandle { handle, size },
            exposed,
        }
    }

    pub fn unexpose(&self, bulk: &BulkRef) {
        self.buffers
            .write()
            .expect("bulk registry lock poisoned")
            .remove(&bulk.handle.handle);
    }

    fn get(&self, handle: u64) -> Option<Arc<Exposed>> {
        self.buffers
            .read()
            .expect("bulk registry lock poisoned")
            .get(&handle)
            .cloned()
    }
}

/// Bulk service hosted by every process that exposes memory.
pub struct BulkService {
    registry: Arc<BulkRegistry>,
}

impl BulkService {
    pub fn new(registry: Arc<BulkRegistry>) -> Self {
        BulkService { registry }
    }

    pub fn into_server(self) -> BulkServer<Self> {
        BulkServer::new(self)
    }
}

#[tonic::async_trait]
impl Bulk for BulkService {
    type PullStream = ReceiverStream<std::result::Result<PullChunk, Status>>;

    async fn pull(
        &self,
        request: Request<PullRequest>,
    ) -> std::result::Result<Response<Self::PullStream>, Status> {
        let req = request.into_inner();
        tracing::trace!(handle = req.handle, size = req.size, "bulk pull");
        let exposed = self
            .registry
            .get(req.handle)
            .ok_or_else(|| Status::not_found("no buffer exposed under this handle"))?;
        if exposed.mode == BulkMode::WriteOnly {
            return Err(Status::permission_denied("buffer exposed write-only"));
        }
        let start = req.offset as usize;
        let end = start + req.size as usize;
        let data: Bytes = {
            let buffer = exposed.data.lock().expect("bulk buffer lock poisoned");
            if end > buffer.len() {
                return Err(Status::out_of_range("pull past end of exposed buffer"));
            }
            Bytes::copy_from_slice(&buffer[start..end])
        };
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        tokio::spawn(async move {
            let mut offset = 0;
            while offset < data.len() {
                let chunk_end = (offset + BULK_CHUNK_SIZE).min(data.len());
                let msg = PullChunk {
                    data: data.slice(offset..chunk_end).to_vec(),
                };
                if tx.send(Ok(msg)).await.is_err() {
                    break;
                }
                offset = chunk_end;
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn push(
        &self,
        request: Request<Streaming<PushRequest>>,
    ) -> std::result::Result<Response<PushResponse>, Status> {
        let mut stream = request.into_inner();
        let first = stream
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty push stream"))?;
        let header = match first.data {
            Some(push_request::Data::Header(h)) => h,
            _ => return Err(Status::invalid_argument("first push message must be a header")),
        };
        tracing::trace!(handle = header.handle, size = header.size, "bulk push");
        let exposed = self
            .registry
            .get(header.handle)
            .ok_or_else(|| Status::not_found("no buffer exposed under this handle"))?;
        if exposed.mode == BulkMode::ReadOnly {
            return Err(Status::permission_denied("buffer exposed read-only"));
        }

        let mut incoming = Vec::with_capacity(header.size as usize);
        while let Some(msg) = stream.message().await? {
            match msg.data {
                Some(push_request::Data::Chunk(chunk)) => incoming.extend_from_slice(&chunk),
                _ => return Err(Status::invalid_argument("unexpected push message")),
            }
        }
        if incoming.len() as u64 != header.size {
            return Err(Status::invalid_argument(format!(
                "push size mismatch: announced {}, received {}",
                header.size,
                incoming.len()
            )));
        }

        let start = header.offset as usize;
        {
            let mut buffer = exposed.data.lock().expect("bulk buffer lock poisoned");
            if start + incoming.len() > buffer.len() {
                return Err(Status::out_of_range("push past end of exposed buffer"));
            }
            buffer[start..start + incoming.len()].copy_from_slice(&incoming);
        }
        Ok(Response::new(PushResponse {
            bytes_written: incoming.len() as u64,
        }))
    }
}

async fn connect(origin_addr: &str) -> Result<BulkClient<Channel>> {
    BulkClient::connect(origin_addr.to_owned())
        .await
        .map_err(|e| Error::Transport(format!("failed to reach bulk origin {}: {}", origin_addr, e)))
}

/// Pull `size` bytes out of the buffer a peer exposed.
pub async fn pull(origin_addr: &str, bulk: &BulkHandle, offset: u64, size: u64) -> Result<Vec<u8>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    let mut client = connect(origin_addr).await?;
    let request = Request::new(PullRequest {
        handle: bulk.handle,
        offset,
        size,
    });
    let mut stream = client.pull(request).await?.into_inner();
    let mut data = Vec::with_capacity(size as usize);
    while let Some(chunk) = stream.message().await? {
        data.extend_from_slice(&chunk.data);
    }
    if data.len() as u64 != size {
        return Err(Error::Transport(format!(
            "bulk pull returned {} bytes, expected {}",
            data.len(),
            size
        )));
    }
    Ok(data)
}

/// Push bytes into the buffer a peer exposed. Returns the byte count the
/// peer acknowledged.
pub async fn push(origin_addr: &str, bulk: &BulkHandle, offset: u64, data: &[u8]) -> Result<u64> {
    if data.is_empty() {
        return Ok(0);
    }
    let mut client = connect(origin_addr).await?;

    let mut requests = Vec::with_capacity(1 + data.len() / BULK_CHUNK_SIZE);
    requests.push(PushRequest {
        data: Some(push_request::Data::Header(PushHeader {
            handle: bulk.handle,
            offset,
            size: data.len() as u64,
        })),
    });
    for chunk in data.chunks(BULK_CHUNK_SIZE) {
        requests.push(PushRequest {
            data: Some(push_request::Data::Chunk(chunk.to_vec())),
        });
    }

    let response = client
        .push(Request::new(futures::stream::iter(requests)))
        .await?
        .into_inner();
    Ok(response.bytes_written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_assigns_distinct_handles() {
        let registry = BulkRegistry::new();
        let a = registry.expose(vec![0u8; 4], BulkMode::ReadWrite);
        let b = registry.expose(vec![0u8; 4], BulkMode::ReadWrite);
        assert_ne!(a.handle.handle, b.handle.handle);
        assert_eq!(a.handle.size, 4);
    }

    #[test]
    fn test_unexpose_removes_buffer() {
        let registry = BulkRegistry::new();
        let a = registry.expose(vec![1, 2, 3], BulkMode::ReadOnly);
        assert!(registry.get(a.handle.handle).is_some());
        registry.unexpose(&a);
        assert!(registry.get(a.handle.handle).is_none());
    }

    #[test]
    fn test_bytes_reflect_buffer() {
        let registry = BulkRegistry::new();
        let a = registry.expose(vec![7u8; 8], BulkMode::ReadWrite);
        assert_eq!(a.bytes(), vec![7u8; 8]);
    }
}
