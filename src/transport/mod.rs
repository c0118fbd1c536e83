//! Transport Adapters
//!
//! Interchangeable HTTP servers behind one contract.
//!
//! ```text
//! TransportConfig { adapter = "axum" | "hyper", address, port, ... }
//!    ↓ AdapterRegistry::create
//! Arc<dyn Transport>
//!    ↓ mount(chain) → start(addr)       (bind, then serve on its own task)
//! [Serving...]
//!    ↓ shutdown(drain)
//! stop_accepting() → drain() → close()
//! ```

mod axum_adapter;
mod hyper_adapter;
mod logging;
mod middleware;
mod registry;
mod server;
mod tracker;

pub use axum_adapter::AxumTransport;
pub use hyper_adapter::HyperTransport;
pub use logging::{REQUEST_ID_HEADER, RequestId, RequestLogging};
pub use middleware::{
    Endpoint, Middleware, MiddlewareChain, MiddlewareError, MiddlewareResult, Next, Request,
    error_response,
};
pub use registry::{AdapterFactory, AdapterRegistry, register_all_adapters};
pub use tracker::{ConnectionGuard, ConnectionId, ConnectionTracker, RequestGuard};

use crate::drain::{DrainConfig, DrainReport, DrainableResource, drain};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// The built-in server implementations.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    AsRefStr,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    #[default]
    Axum,
    Hyper,
}

/// Errors raised by transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport is already bound")]
    AlreadyBound,

    #[error("Transport is not bound")]
    NotBound,

    #[error("Transport is already serving")]
    AlreadyServing,

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport section of the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub adapter: AdapterType,
    pub address: String,
    pub port: u16,
    pub drain_timeout_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            adapter: AdapterType::default(),
            address: "0.0.0.0".to_string(),
            port: 8080,
            drain_timeout_ms: 10_000,
            poll_interval_ms: 100,
        }
    }
}

impl TransportConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|e: std::net::AddrParseError| TransportError::InvalidAddress {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig::new(Duration::from_millis(self.drain_timeout_ms))
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }
}

/// Uniform server contract every adapter implements.
///
/// The drainable side reports the adapter's connections, so the generic
/// [`drain`] protocol applies unchanged.
#[async_trait]
pub trait Transport: DrainableResource + 'static {
    fn adapter(&self) -> AdapterType;

    /// Replace the middleware chain. Only allowed before serving starts.
    fn mount(&self, chain: MiddlewareChain) -> Result<()>;

    /// Bind the listening socket. Returns the actual local address, which
    /// differs from `addr` when port 0 was requested.
    async fn bind(&self, addr: SocketAddr) -> Result<SocketAddr>;

    /// Accept and serve connections until accepting is stopped and every
    /// connection has finished or been force-closed.
    async fn serve(self: Arc<Self>) -> Result<()>;

    fn local_addr(&self) -> Option<SocketAddr>;

    /// Close the listening socket. Completes once new connections are
    /// refused; connections already accepted keep running.
    async fn stop_accepting(&self);

    /// Bind, then run [`serve`](Self::serve) on its own task.
    async fn start(self: Arc<Self>, addr: SocketAddr) -> Result<SocketAddr> {
        let local = self.bind(addr).await?;
        let adapter = self.adapter();
        let server = Arc::clone(&self);
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::error!(adapter = %adapter, error = %e, "Transport stopped with an error");
            }
        });
        Ok(local)
    }

    /// Stop accepting, then drain the remaining connections.
    async fn shutdown(&self, config: &DrainConfig) -> DrainReport {
        self.stop_accepting().await;
        drain(self, self.adapter().as_ref(), config).await
    }
}

#[cfg(test)]
mod tests;
