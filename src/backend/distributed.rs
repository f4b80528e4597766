//! Backend placing each model on a remote region store.
//!
//! The master holds only metadata; bytes live in regions on storage
//! workers and move directly between worker and client. The registry of
//! live storage targets is driven entirely by membership events. Records
//! hold weak references to their target, so purging a departed worker from
//! the registry is enough to make its models fail fast.

use crate::backend::selection::Selection;
use crate::backend::{Backend, BackendContext};
use crate::common::config::BackendConfig;
use crate::common::{Result, Status, StatusCode};
use crate::model::ModelTable;
use crate::proto::common::BulkHandle;
use crate::region::RegionClient;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use uuid::Uuid;

/// One advertised storage target on a live worker. Shared by every record
/// placed on it; the registry owns the entry, records only borrow it.
pub struct StorageTarget {
    pub endpoint: String,
    pub member_id: u64,
    pub target_id: Uuid,
    pub regions: RegionClient,
}

/// Where a model's bytes live. The weak reference resolves for as long as
/// the owning worker is in the registry.
#[derive(Default)]
struct RegionPayload {
    location: Weak<StorageTarget>,
    region: Uuid,
}

pub struct DistributedBackend {
    models: ModelTable<RegionPayload>,
    targets: RwLock<Vec<Arc<StorageTarget>>>,
    selection: Selection,
}

impl DistributedBackend {
    pub fn create(ctx: BackendContext, config: &BackendConfig) -> Result<Box<dyn Backend>> {
        let selection = Selection::from_config(config)?;
        tracing::debug!(endpoint = %ctx.endpoint, ?selection, "initializing distributed backend");
        Ok(Box::new(DistributedBackend {
            models: ModelTable::new(),
            targets: RwLock::new(Vec::new()),
            selection,
        }))
    }

    /// Snapshot the registry and pick a target for `name`. None when the
    /// registry is empty.
    fn select_target(&self, name: &str) -> Option<Arc<StorageTarget>> {
        let targets = self.targets.read().expect("storage registry lock poisoned");
        if targets.is_empty() {
            return None;
        }
        let index = self.selection.pick(name, targets.len());
        tracing::debug!(model = name, index, total = targets.len(), "selected storage target");
        Some(targets[index].clone())
    }

    fn target_count(&self) -> usize {
        self.targets.read().expect("storage registry lock poisoned").len()
    }

    fn purge_member(&self, member_id: u64) {
        let mut targets = self.targets.write().expect("storage registry lock poisoned");
        let before = targets.len();
        targets.retain(|target| target.member_id != member_id);
        tracing::info!(
            member_id,
            removed = before - targets.len(),
            "purged storage targets"
        );
    }
}

#[async_trait]
impl Backend for DistributedBackend {
    async fn register_model(
        &self,
        _client_addr: &str,
        name: &str,
        config: &str,
        size: u64,
        signature: &str,
    ) -> Status {
        let (model, created) = self.models.find_or_create(name);
        if !created {
            tracing::error!(model = name, "model already exists");
            return Status::new(
                StatusCode::Exists,
                "a model with the same name is already registered",
            );
        }
        tracing::info!(model = name, size, "registering model");

        let Some(target) = self.select_target(name) else {
            tracing::error!(model = name, "no storage target available");
            self.models.remove(name);
            return Status::new(StatusCode::Storage, "no storage target available");
        };

        let mut state = model.lock().await;
        state.config = config.to_owned();
        state.signature = signature.to_owned();
        state.size = size;

        match target.regions.create(target.target_id, size).await {
            Ok(region) => {
                state.payload = RegionPayload {
                    location: Arc::downgrade(&target),
                    region,
                };
                Status::ok()
            }
            Err(e) => {
                tracing::error!(model = name, error = %e, "region creation failed");
                drop(state);
                self.models.remove(name);
                Status::new(StatusCode::Storage, "region creation failed")
            }
        }
    }

    async fn reload_model(&self, _client_addr: &str, name: &str) -> Status {
        let Some(model) = self.models.find(name) else {
            tracing::error!(model = name, "model does not exist");
            return Status::new(StatusCode::NoExists, "no model found with provided name");
        };
        tracing::info!(model = name, "reloading model config");
        let state = model.lock().await;
        Status::ok_with(state.config.clone())
    }

    async fn write_model(
        &self,
        client_addr: &str,
        name: &str,
        signature: &str,
        bulk: BulkHandle,
        size: u64,
    ) -> Status {
        let Some(model) = self.models.find(name) else {
            tracing::error!(model = name, "model does not exist");
            return Status::new(StatusCode::NoExists, "no model found with provided name");
        };
        let state = model.lock().await;
        if state.signature != signature {
            tracing::error!(model = name, "unmatching signatures on write");
            return Status::new(StatusCode::Signature, "unmatching signatures");
        }
        if size != state.size {
            tracing::error!(model = name, expected = state.size, got = size, "size mismatch");
            return Status::new(StatusCode::Io, "transfer size differs from registered size");
        }
        if size == 0 {
            return Status::ok();
        }
        let Some(target) = state.payload.location.upgrade() else {
            tracing::error!(model = name, "storage target is gone");
            return Status::new(
                StatusCode::Io,
                "the worker holding this model left; re-register it",
            );
        };
        tracing::info!(model = name, worker = %target.endpoint, "proxy-writing model");
        let region = state.payload.region;
        if let Err(e) = target
            .regions
            .write(target.target_id, region, 0, bulk, 0, client_addr, size)
            .await
        {
            tracing::error!(model = name, error = %e, "region write failed");
            return Status::new(StatusCode::Storage, "failed to write region");
        }
        // The write is acknowledged even if durability flushing fails; the
        // next read may then return pre-write contents after a worker crash.
        if let Err(e) = target.regions.persist(target.target_id, region, 0, size).await {
            tracing::warn!(model = name, error = %e, "region persist failed after write");
        }
        Status::ok()
    }

    async fn read_model(
        &self,
        client_addr: &str,
        name: &str,
        signature: &str,
        bulk: BulkHandle,
        size: u64,
    ) -> Status {
        let Some(model) = self.models.find(name) else {
            tracing::error!(model = name, "model does not exist");
            return Status::new(StatusCode::NoExists, "no model found with provided name");
        };
        let state = model.lock().await;
        if state.signature != signature {
            tracing::error!(model = name, "unmatching signatures on read");
            return Status::new(StatusCode::Signature, "unmatching signatures");
        }
        if size != state.size {
            tracing::error!(model = name, expected = state.size, got = size, "size mismatch");
            return Status::new(StatusCode::Io, "transfer size differs from registered size");
        }
        if size == 0 {
            return Status::ok();
        }
        let Some(target) = state.payload.location.upgrade() else {
            tracing::error!(model = name, "storage target is gone");
            return Status::new(
                StatusCode::Io,
                "the worker holding this model left; re-register it",
            );
        };
        tracing::info!(model = name, worker = %target.endpoint, "proxy-reading model");
        match target
            .regions
            .read(target.target_id, state.payload.region, 0, bulk, 0, client_addr, size)
            .await
        {
            Ok(bytes_read) if bytes_read == size => Status::ok(),
            Ok(bytes_read) => {
                tracing::error!(model = name, bytes_read, size, "short region read");
                Status::new(StatusCode::Io, "short read from region")
            }
            Err(e) => {
                tracing::error!(model = name, error = %e, "region read failed");
                Status::new(StatusCode::Storage, "failed to read region")
            }
        }
    }

    async fn duplicate_model(&self, name: &str, new_name: &str) -> Status {
        let Some(model) = self.models.find(name) else {
            tracing::error!(model = name, "model does not exist");
            return Status::new(StatusCode::NoExists, "no model found with provided name");
        };
        let (new_model, created) = self.models.find_or_create(new_name);
        if !created {
            tracing::error!(model = new_name, "model already exists");
            return Status::new(
                StatusCode::Exists,
                "a model with the same name is already registered",
            );
        }
        tracing::info!(model = name, duplicate = new_name, "duplicating model");

        // Copy the source out first; record locks are never held in pairs.
        let (config, signature, size, source_location, source_region) = {
            let state = model.lock().await;
            (
                state.config.clone(),
                state.signature.clone(),
                state.size,
                state.payload.location.clone(),
                state.payload.region,
            )
        };
        let Some(source_target) = source_location.upgrade() else {
            tracing::error!(model = name, "source storage target is gone");
            self.models.remove(new_name);
            return Status::new(
                StatusCode::Io,
                "the worker holding the source model left; re-register it",
            );
        };
        let Some(new_target) = self.select_target(new_name) else {
            tracing::error!(model = new_name, "no storage target available");
            self.models.remove(new_name);
            return Status::new(StatusCode::Storage, "no storage target available");
        };

        let mut state = new_model.lock().await;
        state.config = config;
        state.signature = signature;
        state.size = size;

        match source_target
            .regions
            .migrate(
                source_target.target_id,
                source_region,
                size,
                &new_target.endpoint,
                new_target.target_id,
            )
            .await
        {
            Ok(region) => {
                state.payload = RegionPayload {
                    location: Arc::downgrade(&new_target),
                    region,
                };
                Status::ok()
            }
            Err(e) => {
                tracing::error!(model = new_name, error = %e, "region migration failed");
                drop(state);
                self.models.remove(new_name);
                Status::new(StatusCode::Storage, "region migration failed")
            }
        }
    }

    async fn on_shutdown(&self) {
        tracing::debug!("asking all storage workers to shut down");
        let snapshot: Vec<Arc<StorageTarget>> = self
            .targets
            .read()
            .expect("storage registry lock poisoned")
            .clone();
        let mut endpoints = HashSet::new();
        for target in snapshot {
            if endpoints.insert(target.endpoint.clone()) {
                if let Err(e) = target.regions.shutdown().await {
                    tracing::warn!(worker = %target.endpoint, error = %e, "remote shutdown failed");
                }
            }
        }
        // Drain barrier: wait for the membership callbacks to reap every
        // target, yielding between checks.
        while self.target_count() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tracing::debug!("all storage workers have shut down");
    }

    async fn on_worker_joined(&self, member_id: u64, addr: &str) {
        tracing::info!(member_id, addr, "storage worker joined");
        let client = match RegionClient::connect(addr).await {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(member_id, addr, error = %e, "could not reach new worker");
                return;
            }
        };
        let target_ids = match client.probe().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(member_id, addr, error = %e, "could not probe new worker");
                return;
            }
        };
        tracing::info!(member_id, targets = target_ids.len(), "new worker advertised targets");
        let mut targets = self.targets.write().expect("storage registry lock poisoned");
        for target_id in target_ids {
            targets.push(Arc::new(StorageTarget {
                endpoint: addr.to_owned(),
                member_id,
                target_id,
                // Clones share one connection per worker.
                regions: client.clone(),
            }));
        }
    }

    async fn on_worker_left(&self, member_id: u64) {
        self.purge_member(member_id);
    }

    async fn on_worker_died(&self, member_id: u64) {
        self.purge_member(member_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::transport::Endpoint;

    fn backend() -> DistributedBackend {
        DistributedBackend {
            models: ModelTable::new(),
            targets: RwLock::new(Vec::new()),
            selection: Selection::HashName,
        }
    }

    // A client whose connection will never be driven; only useful for
    // registry bookkeeping tests.
    fn idle_client() -> RegionClient {
        let channel = Endpoint::from_static("http://127.0.0.1:1").connect_lazy();
        RegionClient::new(channel)
    }

    fn push_target(backend: &DistributedBackend, member_id: u64) {
        let mut targets = backend.targets.write().unwrap();
        targets.push(Arc::new(StorageTarget {
            endpoint: format!("http://127.0.0.1:{}", 9000 + member_id),
            member_id,
            target_id: Uuid::new_v4(),
            regions: idle_client(),
        }));
    }

    #[tokio::test]
    async fn test_register_with_empty_registry_rolls_back() {
        let backend = backend();
        let status = backend
            .register_model("client", "m1", "cfg", 64, "sig")
            .await;
        assert_eq!(status.code, StatusCode::Storage);
        // The rollback removed the record: a retry gets the same status,
        // not an exists error.
        let status = backend
            .register_model("client", "m1", "cfg", 64, "sig")
            .await;
        assert_eq!(status.code, StatusCode::Storage);
    }

    #[tokio::test]
    async fn test_operations_on_unknown_model() {
        let backend = backend();
        let bulk = BulkHandle { handle: 0, size: 0 };
        let status = backend.reload_model("client", "m1").await;
        assert_eq!(status.code, StatusCode::NoExists);
        let status = backend
            .write_model("client", "m1", "sig", bulk.clone(), 8)
            .await;
        assert_eq!(status.code, StatusCode::NoExists);
        let status = backend.read_model("client", "m1", "sig", bulk, 8).await;
        assert_eq!(status.code, StatusCode::NoExists);
        let status = backend.duplicate_model("m1", "m2").await;
        assert_eq!(status.code, StatusCode::NoExists);
    }

    #[tokio::test]
    async fn test_membership_closure() {
        let backend = backend();
        push_target(&backend, 1);
        push_target(&backend, 1);
        push_target(&backend, 2);
        assert_eq!(backend.target_count(), 3);
        backend.on_worker_left(1).await;
        assert_eq!(backend.target_count(), 1);
        backend.on_worker_died(2).await;
        assert_eq!(backend.target_count(), 0);
        // Unknown member ids are a no-op.
        backend.on_worker_left(7).await;
        assert_eq!(backend.target_count(), 0);
    }

    #[tokio::test]
    async fn test_departed_target_fails_with_io() {
        let backend = backend();
        // Build a record whose target is already gone.
        let (model, created) = backend.models.find_or_create("m1");
        assert!(created);
        {
            let target = Arc::new(StorageTarget {
                endpoint: "http://127.0.0.1:9001".to_owned(),
                member_id: 1,
                target_id: Uuid::new_v4(),
                regions: idle_client(),
            });
            let mut state = model.lock().await;
            state.signature = "sig".to_owned();
            state.size = 8;
            state.payload = RegionPayload {
                location: Arc::downgrade(&target),
                region: Uuid::new_v4(),
            };
            // `target` drops here; the weak reference dangles.
        }
        let bulk = BulkHandle { handle: 0, size: 8 };
        let status = backend
            .write_model("client", "m1", "sig", bulk.clone(), 8)
            .await;
        assert_eq!(status.code, StatusCode::Io);
        let status = backend.read_model("client", "m1", "sig", bulk, 8).await;
        assert_eq!(status.code, StatusCode::Io);
    }
}
