//! Connection and request tracking for draining.
//!
//! # Responsibilities
//! - Count open connections and connections with a request in flight
//! - Hand out guards that decrement on drop, so a panicking handler cannot
//!   leak a count
//! - Wrap accepted sockets so a forced close aborts their IO

use crate::drain::PoolStat;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Relaxed ordering is enough; ids only need to be unique.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Tracks open connections and in-flight requests of one transport.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    open: Arc<AtomicUsize>,
    busy: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection.
    pub fn open(&self) -> ConnectionGuard {
        self.open.fetch_add(1, Ordering::SeqCst);
        let id = ConnectionId::new();
        tracing::trace!(connection_id = %id, "Connection opened");
        ConnectionGuard {
            open: Arc::clone(&self.open),
            id,
        }
    }

    /// Record a request in flight.
    pub fn busy(&self) -> RequestGuard {
        self.busy.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            busy: Arc::clone(&self.busy),
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn busy_count(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Open connections as `total`, those serving a request as `acquired`.
    pub fn stat(&self) -> PoolStat {
        let total = self.open_count();
        let acquired = self.busy_count();
        PoolStat::new(total, total.saturating_sub(acquired), acquired)
    }
}

/// Decrements the open-connection count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    open: Arc<AtomicUsize>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Decrements the in-flight count when dropped.
#[derive(Debug)]
pub struct RequestGuard {
    busy: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An accepted socket that counts itself as open and fails all further IO
/// once the transport is force-closed.
pub(crate) struct TrackedStream {
    inner: TcpStream,
    force: CancellationToken,
    aborted: Pin<Box<WaitForCancellationFutureOwned>>,
    guard: ConnectionGuard,
}

impl TrackedStream {
    pub(crate) fn new(inner: TcpStream, tracker: &ConnectionTracker, force: &CancellationToken) -> Self {
        Self {
            inner,
            force: force.clone(),
            aborted: Box::pin(force.clone().cancelled_owned()),
            guard: tracker.open(),
        }
    }

    pub(crate) fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    fn poll_aborted(&mut self, cx: &mut Context<'_>) -> Poll<io::Error> {
        if self.force.is_cancelled() || self.aborted.as_mut().poll(cx).is_ready() {
            return Poll::Ready(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "transport force-closed",
            ));
        }
        Poll::Pending
    }
}

impl AsyncRead for TrackedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Poll::Ready(e) = self.poll_aborted(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TrackedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Poll::Ready(e) = self.poll_aborted(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Poll::Ready(e) = self.poll_aborted(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn guards_release_their_counts() {
        let tracker = ConnectionTracker::new();
        let first = tracker.open();
        let second = tracker.open();
        let request = tracker.busy();
        assert_eq!(tracker.stat(), PoolStat::new(2, 1, 1));

        drop(request);
        assert_eq!(tracker.stat(), PoolStat::new(2, 2, 0));
        drop(first);
        drop(second);
        assert_eq!(tracker.stat(), PoolStat::default());
    }

    #[tokio::test]
    async fn forced_close_aborts_stream_io() {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (socket, _) = listener.accept().await.unwrap();
        let _client = client.await.unwrap();

        let tracker = ConnectionTracker::new();
        let force = CancellationToken::new();
        let mut stream = TrackedStream::new(socket, &tracker, &force);
        assert_eq!(tracker.open_count(), 1);

        force.cancel();
        let mut buf = [0_u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);

        drop(stream);
        assert_eq!(tracker.open_count(), 0);
    }
}
