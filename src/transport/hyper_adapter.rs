use super::server::ServerCore;
use super::tracker::TrackedStream;
use super::{AdapterType, MiddlewareChain, Result, Transport};
use crate::drain::{DrainableResource, PoolStat};
use async_trait::async_trait;
use axum::body::Body;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Transport with a hand-written accept loop over hyper-util's HTTP/1+2
/// connection builder.
///
/// Each connection watches the gate; once it closes, the connection is told
/// to shut down gracefully, so idle keep-alive connections go away at once
/// and busy ones after their current request.
pub struct HyperTransport {
    core: Arc<ServerCore>,
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HyperTransport {
    pub fn new() -> Self {
        Self {
            core: Arc::new(ServerCore::new(AdapterType::Hyper)),
        }
    }
}

#[async_trait]
impl DrainableResource for HyperTransport {
    fn stat(&self) -> PoolStat {
        self.core.stat()
    }

    async fn close(&self) {
        self.core.close();
    }
}

#[async_trait]
impl Transport for HyperTransport {
    fn adapter(&self) -> AdapterType {
        AdapterType::Hyper
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

        loop {
            let accepted = tokio::select! {
                _ = self.core.gate.cancelled() => None,
                accepted = listener.accept() => Some(accepted),
            };

            match accepted {
                None => break,
                Some(Ok((stream, peer))) => {
                    let stream = TrackedStream::new(stream, &self.core.tracker, &self.core.force);
                    tracing::trace!(connection_id = %stream.id(), peer = %peer, "Accepted");
                    tokio::spawn(serve_connection(Arc::clone(&self.core), stream));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }

        drop(listener);
        self.core.closed.cancel();
        tracing::info!(adapter = %AdapterType::Hyper, "Accept loop stopped");
        Ok(())
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.core.local_addr()
    }

    async fn stop_accepting(&self) {
        self.core.stop_accepting().await;
    }
}

async fn serve_connection(core: Arc<ServerCore>, stream: TrackedStream) {
    let id = stream.id();
    let service_core = Arc::clone(&core);
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let core = Arc::clone(&service_core);
        async move { Ok::<_, Infallible>(core.handle(request.map(Body::new)).await) }
    });

    let builder = Builder::new(TokioExecutor::new());
    let connection = builder.serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    let finished = tokio::select! {
        result = connection.as_mut() => Some(result),
        _ = core.gate.cancelled() => None,
    };
    let result = match finished {
        Some(result) => result,
        None => {
            tracing::trace!(connection_id = %id, "Graceful shutdown requested");
            connection.as_mut().graceful_shutdown();
            tokio::select! {
                result = connection.as_mut() => result,
                _ = core.force.cancelled() => {
                    tracing::debug!(connection_id = %id, "Connection force-closed");
                    return;
                }
            }
        }
    };

    if let Err(e) = result {
        tracing::debug!(connection_id = %id, error = %e, "Connection ended with an error");
    }
}
