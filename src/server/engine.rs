//! Transport engine: a bound listener, a shutdown signal, and the
//! process-wide bulk registry. One engine per process, shared by every
//! service it hosts and every client handle it opens.

use crate::bulk::BulkRegistry;
use crate::common::{Error, Result};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::server::Router;

pub struct Engine {
    addr: SocketAddr,
    endpoint: String,
    listener: Mutex<Option<TcpListener>>,
    shutdown: watch::Sender<bool>,
    bulk: Arc<BulkRegistry>,
}

impl Engine {
    /// Bind a listener. Passing port 0 picks an ephemeral port; the
    /// resolved address is what gets advertised.
    pub async fn bind(addr: &str) -> Result<Arc<Engine>> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| Error::InvalidAddress(format!("{}: {}", addr, e)))?;
        let local = listener
            .local_addr()
            .map_err(|e| Error::InvalidAddress(e.to_string()))?;
        let (shutdown, _) = watch::channel(false);
        Ok(Arc::new(Engine {
            addr: local,
            endpoint: format!("http://{}", local),
            listener: Mutex::new(Some(listener)),
            shutdown,
            bulk: Arc::new(BulkRegistry::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL other processes use to reach this engine.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn bulk(&self) -> Arc<BulkRegistry> {
        self.bulk.clone()
    }

    /// Signal the engine to finalize. The acceptor stops, in-flight
    /// handlers run to completion, then `serve` returns. Safe to call from
    /// any task, any number of times.
    pub fn finalize(&self) {
        let _ = self.shutdown.send(true);
    }

    /// A receiver that resolves once `finalize` has been called. Detached
    /// tasks select on this to stop with the engine.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Serve a router on the bound listener until finalized. Consumes the
    /// listener; an engine serves once.
    pub async fn serve(&self, router: Router) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .expect("engine listener lock poisoned")
            .take()
            .ok_or_else(|| Error::Internal("engine is already serving".to_owned()))?;
        let mut signal = self.shutdown.subscribe();
        tracing::info!(addr = %self.addr, "engine serving");
        router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                let _ = signal.wait_for(|finalized| *finalized).await;
            })
            .await
            .map_err(Error::from)?;
        tracing::debug!(addr = %self.addr, "engine finalized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_resolves_ephemeral_port() {
        let engine = Engine::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(engine.local_addr().port(), 0);
        assert!(engine.endpoint().starts_with("http://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_shutdown_signal_fires_on_finalize() {
        let engine = Engine::bind("127.0.0.1:0").await.unwrap();
        let mut signal = engine.shutdown_signal();
        assert!(!*signal.borrow());
        engine.finalize();
        signal.wait_for(|finalized| *finalized).await.unwrap();
    }
}
