//! In-process backend keeping model bytes in resident buffers.

use crate::backend::{Backend, BackendContext};
use crate::bulk;
use crate::common::config::BackendConfig;
use crate::common::{Result, Status, StatusCode};
use crate::model::ModelTable;
use crate::proto::common::BulkHandle;
use async_trait::async_trait;

/// Payload of a memory-resident model: a buffer of exactly `size` bytes,
/// zero-filled at registration.
type MemoryPayload = Vec<u8>;

pub struct MemoryBackend {
    models: ModelTable<MemoryPayload>,
}

impl MemoryBackend {
    pub fn create(_ctx: BackendContext, _config: &BackendConfig) -> Result<Box<dyn Backend>> {
        tracing::debug!("initializing memory backend");
        Ok(Box::new(MemoryBackend {
            models: ModelTable::new(),
        }))
    }
}

#[async_trait]
impl Backend for MemoryBackend {
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

        let mut state = model.lock().await;
        state.config = config.to_owned();
        state.signature = signature.to_owned();
        state.size = size;
        state.payload = vec![0u8; size as usize];
        Status::ok()
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
        let mut state = model.lock().await;
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
        tracing::info!(model = name, client = client_addr, "pulling model data");
        match bulk::pull(client_addr, &bulk, 0, size).await {
            Ok(data) => {
                state.payload.copy_from_slice(&data);
                Status::ok()
            }
            Err(e) => {
                tracing::error!(model = name, error = %e, "bulk pull failed");
                Status::new(StatusCode::Io, "failed to pull model data from client")
            }
        }
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
        tracing::info!(model = name, client = client_addr, "pushing model data");
        match bulk::push(client_addr, &bulk, 0, &state.payload).await {
            Ok(_) => Status::ok(),
            Err(e) => {
                tracing::error!(model = name, error = %e, "bulk push failed");
                Status::new(StatusCode::Io, "failed to push model data to client")
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
        let (config, signature, size, data) = {
            let state = model.lock().await;
            (
                state.config.clone(),
                state.signature.clone(),
                state.size,
                state.payload.clone(),
            )
        };
        let mut state = new_model.lock().await;
        state.config = config;
        state.signature = signature;
        state.size = size;
        state.payload = data;
        Status::ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::create_backend;

    fn backend() -> Box<dyn Backend> {
        let ctx = BackendContext {
            endpoint: "http://127.0.0.1:0".to_owned(),
        };
        create_backend("memory", ctx, &BackendConfig::new()).unwrap()
    }

    fn handle() -> BulkHandle {
        BulkHandle { handle: 0, size: 0 }
    }

    #[tokio::test]
    async fn test_register_is_exclusive() {
        let backend = backend();
        let first = backend
            .register_model("client", "m1", "cfg", 16, "sigA")
            .await;
        assert_eq!(first.code, StatusCode::Ok);
        let second = backend
            .register_model("client", "m1", "cfg2", 32, "sigB")
            .await;
        assert_eq!(second.code, StatusCode::Exists);
        // The record keeps the state of the first registration.
        let reload = backend.reload_model("client", "m1").await;
        assert_eq!(reload.code, StatusCode::Ok);
        assert_eq!(reload.message, "cfg");
    }

    async fn register(backend: &dyn Backend, name: &str, size: u64) {
        let status = backend
            .register_model("client", name, "cfg", size, "sigA")
            .await;
        assert_eq!(status.code, StatusCode::Ok, "register {name}");
    }

    #[tokio::test]
    async fn test_reload_returns_config() {
        let backend = backend();
        let status = backend
            .register_model("client", "m1", "layers:2", 8, "sigA")
            .await;
        assert_eq!(status.code, StatusCode::Ok);
        let reload = backend.reload_model("client", "m1").await;
        assert_eq!(reload.code, StatusCode::Ok);
        assert_eq!(reload.message, "layers:2");
    }

    #[tokio::test]
    async fn test_write_checks_before_transfer() {
        let backend = backend();
        register(&*backend, "m1", 16).await;
        // Signature mismatch is rejected before any bulk traffic.
        let status = backend
            .write_model("client", "m1", "sigB", handle(), 16)
            .await;
        assert_eq!(status.code, StatusCode::Signature);
        // So is a size mismatch.
        let status = backend
            .write_model("client", "m1", "sigA", handle(), 8)
            .await;
        assert_eq!(status.code, StatusCode::Io);
        // Unknown model.
        let status = backend
            .write_model("client", "m2", "sigA", handle(), 16)
            .await;
        assert_eq!(status.code, StatusCode::NoExists);
    }

    #[tokio::test]
    async fn test_zero_size_transfers_are_noops() {
        let backend = backend();
        register(&*backend, "m0", 0).await;
        let status = backend
            .write_model("client", "m0", "sigA", handle(), 0)
            .await;
        assert_eq!(status.code, StatusCode::Ok);
        let status = backend
            .read_model("client", "m0", "sigA", handle(), 0)
            .await;
        assert_eq!(status.code, StatusCode::Ok);
    }

    #[tokio::test]
    async fn test_duplicate_copies_metadata() {
        let backend = backend();
        register(&*backend, "m1", 4).await;
        let status = backend.duplicate_model("m1", "m2").await;
        assert_eq!(status.code, StatusCode::Ok);
        let reload = backend.reload_model("client", "m2").await;
        assert_eq!(reload.code, StatusCode::Ok);
        assert_eq!(reload.message, "cfg");
        // Duplicating onto an existing name is rejected.
        let status = backend.duplicate_model("m1", "m2").await;
        assert_eq!(status.code, StatusCode::Exists);
        // Duplicating a missing model is rejected.
        let status = backend.duplicate_model("nope", "m3").await;
        assert_eq!(status.code, StatusCode::NoExists);
    }
}
