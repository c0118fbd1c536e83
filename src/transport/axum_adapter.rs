use super::server::ServerCore;
use super::tracker::TrackedStream;
use super::{AdapterType, MiddlewareChain, Request, Result, Transport};
use crate::drain::{DrainableResource, PoolStat};
use async_trait::async_trait;
use axum::Router;
use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Transport backed by `axum::serve`.
///
/// The listener is wrapped in a gate: closing the gate drops the listening
/// socket immediately, while axum's graceful shutdown lets accepted
/// connections finish their in-flight requests.
pub struct AxumTransport {
    core: Arc<ServerCore>,
}

impl Default for AxumTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl AxumTransport {
    pub fn new() -> Self {
        Self {
            core: Arc::new(ServerCore::new(AdapterType::Axum)),
        }
    }

    fn router(&self) -> Router {
        let core = Arc::clone(&self.core);
        Router::new().fallback(move |request: Request| {
            let core = Arc::clone(&core);
            async move { core.handle(request).await }
        })
    }
}

#[async_trait]
impl DrainableResource for AxumTransport {
    fn stat(&self) -> PoolStat {
        self.core.stat()
    }

    async fn close(&self) {
        self.core.close();
    }
}

#[async_trait]
impl Transport for AxumTransport {
    fn adapter(&self) -> AdapterType {
        AdapterType::Axum
    }

    fn mount(&self, chain: MiddlewareChain) -> Result<()> {
        self.core.mount(chain)
    }

    async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr> {
        self.core.bind(addr).await
    }

    async fn serve(self: Arc<Self>) -> Result<()> {
        let Some(listener) = self.core.take_listener().await? else {
            return Ok(());
        };

        let gated = GatedListener {
            listener: Some(listener),
            core: Arc::clone(&self.core),
        };
        let gate = self.core.gate.clone();
        let server = axum::serve(gated, self.router())
            .with_graceful_shutdown(async move { gate.cancelled().await })
            .into_future();

        tokio::select! {
            result = server => result?,
            _ = self.core.force.cancelled() => {
                tracing::debug!(adapter = %AdapterType::Axum, "Serve loop abandoned after forced close");
            }
        }
        tracing::info!(adapter = %AdapterType::Axum, "Transport stopped");
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    async fn stop_accepting(&self) {
        self.core.stop_accepting().await;
    }
}

/// `TcpListener` that drops itself once the gate closes and reports the
/// socket as closed when it goes away.
struct GatedListener {
    listener: Option<TcpListener>,
    core: Arc<ServerCore>,
}

impl GatedListener {
    fn release(&mut self) {
        if let Some(listener) = self.listener.take() {
            drop(listener);
            self.core.closed.cancel();
        }
    }
}

impl Drop for GatedListener {
    fn drop(&mut self) {
        self.release();
    }
}

impl axum::serve::Listener for GatedListener {
    type Io = TrackedStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            let Some(listener) = self.listener.as_ref() else {
                return std::future::pending().await;
            };

            let accepted = tokio::select! {
                _ = self.core.gate.cancelled() => None,
                accepted = listener.accept() => Some(accepted),
            };

            match accepted {
                None => self.release(),
                Some(Ok((stream, peer))) => {
                    let stream = TrackedStream::new(stream, &self.core.tracker, &self.core.force);
                    tracing::trace!(connection_id = %stream.id(), peer = %peer, "Accepted");
                    return (stream, peer);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        match &self.listener {
            Some(listener) => listener.local_addr(),
            None => self
                .core
                .local_addr()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "listener closed")),
        }
    }
}
