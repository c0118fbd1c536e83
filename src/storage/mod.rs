//! In-process bounded connection pool.
//!
//! Stands in for a database driver's pool: a fixed number of connection
//! slots guarded by a semaphore. Holding a [`PooledConnection`] counts as
//! one acquired connection until it is dropped.

use crate::component::{HealthProbe, ProbeResult};
use crate::drain::{DrainConfig, DrainableResource, PoolStat};
use crate::lifecycle::ShutdownSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Pool '{pool}' is closed")]
    Closed { pool: String },

    #[error("Timed out after {timeout:?} waiting for a connection from '{pool}'")]
    AcquireTimeout { pool: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// One `[[storage]]` entry of the runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub name: String,
    pub max_connections: usize,
    pub drain_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            max_connections: 10,
            drain_timeout_ms: 5_000,
            acquire_timeout_ms: 1_000,
        }
    }
}

impl StorageConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn drain_config(&self) -> DrainConfig {
        DrainConfig::new(Duration::from_millis(self.drain_timeout_ms))
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

/// A bounded pool of connection slots.
#[derive(Debug)]
pub struct Pool {
    name: String,
    slots: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
    next_id: AtomicU64,
}

impl Pool {
    pub fn new(config: &StorageConfig) -> Self {
        tracing::info!(
            pool = %config.name,
            max_connections = config.max_connections,
            "Opening connection pool"
        );
        Self {
            name: config.name.clone(),
            slots: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    /// Check out a connection, waiting up to the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.slots).acquire_owned(),
        )
        .await
        .map_err(|_| StorageError::AcquireTimeout {
            pool: self.name.clone(),
            timeout: self.acquire_timeout,
        })?
        .map_err(|_| StorageError::Closed {
            pool: self.name.clone(),
        })?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(pool = %self.name, connection = id, "Connection acquired");
        Ok(PooledConnection {
            id,
            pool: self.name.clone(),
            _permit: permit,
        })
    }
}

#[async_trait]
impl DrainableResource for Pool {
    fn stat(&self) -> PoolStat {
        let idle = self.slots.available_permits().min(self.max_connections);
        PoolStat::new(self.max_connections, idle, self.max_connections - idle)
    }

    async fn close(&self) {
        self.slots.close();
        tracing::info!(pool = %self.name, "Connection pool closed");
    }
}

#[async_trait]
impl HealthProbe for Pool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, _signal: &ShutdownSignal) -> ProbeResult {
        if self.is_closed() {
            return ProbeResult::fail("pool closed");
        }
        let stat = self.stat();
        ProbeResult::pass(format!("{}/{} connections in use", stat.acquired, stat.total))
    }
}

/// A checked-out connection. Returned to the pool on drop.
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    pool: String,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }
}
