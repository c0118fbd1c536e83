use super::{AdapterType, MiddlewareChain, Request, TransportError, tracker::ConnectionTracker};
use crate::drain::PoolStat;
use axum::response::Response;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{OnceLock, PoisonError, RwLock};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// State shared by every adapter: the mounted chain, the bound listener,
/// connection counts and the three shutdown tokens.
///
/// - `gate`: stop accepting; idle connections are asked to close.
/// - `closed`: the listening socket has been dropped.
/// - `force`: abort IO on every remaining connection.
pub(crate) struct ServerCore {
    adapter: AdapterType,
    chain: RwLock<MiddlewareChain>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: OnceLock<SocketAddr>,
    serving: AtomicBool,
    pub(crate) gate: CancellationToken,
    pub(crate) closed: CancellationToken,
    pub(crate) force: CancellationToken,
    pub(crate) tracker: ConnectionTracker,
}

impl ServerCore {
    pub(crate) fn new(adapter: AdapterType) -> Self {
        Self {
            adapter,
            chain: RwLock::new(MiddlewareChain::default()),
            listener: Mutex::new(None),
            local_addr: OnceLock::new(),
            serving: AtomicBool::new(false),
            gate: CancellationToken::new(),
            closed: CancellationToken::new(),
            force: CancellationToken::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    pub(crate) fn adapter(&self) -> AdapterType {
        self.adapter
    }

    pub(crate) fn mount(&self, chain: MiddlewareChain) -> Result<(), TransportError> {
        if self.serving.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyServing);
        }
        *self.chain.write().unwrap_or_else(PoisonError::into_inner) = chain;
        Ok(())
    }

    pub(crate) async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        if self.local_addr.get().is_some() {
            return Err(TransportError::AlreadyBound);
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| TransportError::Bind { addr, source })?;

        let mut slot = self.listener.lock().await;
        self.local_addr
            .set(local)
            .map_err(|_| TransportError::AlreadyBound)?;
        *slot = Some(listener);
        tracing::info!(adapter = %self.adapter, address = %local, "Listening");
        Ok(local)
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Hand the bound listener to the serve loop.
    ///
    /// `None` means accepting was already stopped, so there is nothing to serve.
    pub(crate) async fn take_listener(&self) -> Result<Option<TcpListener>, TransportError> {
        let mut slot = self.listener.lock().await;
        if self.gate.is_cancelled() {
            return Ok(None);
        }
        if self.serving.load(Ordering::SeqCst) {
            return Err(TransportError::AlreadyServing);
        }
        let listener = slot.take().ok_or(TransportError::NotBound)?;
        self.serving.store(true, Ordering::SeqCst);
        Ok(Some(listener))
    }

    /// Close the gate and wait until the listening socket is gone.
    pub(crate) async fn stop_accepting(&self) {
        if !self.gate.is_cancelled() {
            tracing::info!(adapter = %self.adapter, "Refusing new connections");
        }
        self.gate.cancel();

        {
            let mut slot = self.listener.lock().await;
            if let Some(listener) = slot.take() {
                // Bound but never served.
                drop(listener);
                self.closed.cancel();
            } else if !self.serving.load(Ordering::SeqCst) {
                self.closed.cancel();
            }
        }

        self.closed.cancelled().await;
        tracing::debug!(adapter = %self.adapter, "Listener closed");
    }

    /// Run one request through the mounted chain, counted as in flight.
    pub(crate) async fn handle(&self, request: Request) -> Response {
        let _busy = self.tracker.busy();
        metrics::counter!("keelson_http_requests_total", "adapter" => self.adapter.to_string())
            .increment(1);
        let chain = self
            .chain
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        chain.dispatch(request).await
    }

    pub(crate) fn stat(&self) -> PoolStat {
        self.tracker.stat()
    }

    pub(crate) fn close(&self) {
        let stat = self.stat();
        if stat.total > 0 {
            tracing::warn!(
                adapter = %self.adapter,
                connections = stat.total,
                "Force-closing remaining connections"
            );
        }
        self.gate.cancel();
        self.force.cancel();
    }
}
