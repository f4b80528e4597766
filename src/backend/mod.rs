//! Storage backends.
//!
//! A backend implements the model operations behind the master's RPC
//! surface. Each operation returns the [`Status`] to reply with; the
//! provider sends it exactly once. Exactly one backend is active for the
//! lifetime of a master process, selected by name at startup.

pub mod distributed;
pub mod memory;
pub mod selection;

use crate::common::config::BackendConfig;
use crate::common::{Error, Result, Status};
use crate::proto::common::BulkHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Server-side context handed to backend factories.
#[derive(Debug, Clone)]
pub struct BackendContext {
    /// Endpoint URL the master itself is reachable at.
    pub endpoint: String,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn register_model(
        &self,
        client_addr: &str,
        name: &str,
        config: &str,
        size: u64,
        signature: &str,
    ) -> Status;

    /// On `Ok`, the status message carries the model config.
    async fn reload_model(&self, client_addr: &str, name: &str) -> Status;

    async fn write_model(
        &self,
        client_addr: &str,
        name: &str,
        signature: &str,
        bulk: BulkHandle,
        size: u64,
    ) -> Status;

    async fn read_model(
        &self,
        client_addr: &str,
        name: &str,
        signature: &str,
        bulk: BulkHandle,
        size: u64,
    ) -> Status;

    async fn duplicate_model(&self, name: &str, new_name: &str) -> Status;

    /// Graceful-drain barrier, run before the master finalizes its engine.
    async fn on_shutdown(&self) {}

    async fn on_worker_joined(&self, _member_id: u64, _addr: &str) {}

    async fn on_worker_left(&self, _member_id: u64) {}

    async fn on_worker_died(&self, _member_id: u64) {}
}

pub type BackendFactory = fn(BackendContext, &BackendConfig) -> Result<Box<dyn Backend>>;

static FACTORIES: OnceLock<HashMap<&'static str, BackendFactory>> = OnceLock::new();

fn factories() -> &'static HashMap<&'static str, BackendFactory> {
    FACTORIES.get_or_init(|| {
        let mut map: HashMap<&'static str, BackendFactory> = HashMap::new();
        map.insert("memory", memory::MemoryBackend::create);
        map.insert("distributed", distributed::DistributedBackend::create);
        map
    })
}

/// Instantiate a backend by name. An unknown name is an error; the caller
/// is expected to run without a backend and answer every operation with a
/// backend-absent status.
pub fn create_backend(
    name: &str,
    ctx: BackendContext,
    config: &BackendConfig,
) -> Result<Box<dyn Backend>> {
    match factories().get(name) {
        Some(factory) => {
            tracing::info!(backend = name, "creating backend");
            factory(ctx, config)
        }
        None => Err(Error::UnknownBackend(name.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BackendContext {
        BackendContext {
            endpoint: "http://127.0.0.1:0".to_owned(),
        }
    }

    #[test]
    fn test_known_backends() {
        assert!(create_backend("memory", ctx(), &BackendConfig::new()).is_ok());
        assert!(create_backend("distributed", ctx(), &BackendConfig::new()).is_ok());
    }

    #[test]
    fn test_unknown_backend() {
        match create_backend("papyrus", ctx(), &BackendConfig::new()) {
            Err(Error::UnknownBackend(name)) => assert_eq!(name, "papyrus"),
            other => panic!("expected UnknownBackend, got {:?}", other.map(|_| ())),
        }
    }
}
