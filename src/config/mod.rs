//! Runtime configuration.
//!
//! Loaded in three steps: a TOML file (every field defaulted), an overlay of
//! `KEELSON_*` environment variables held in a [`ConfigService`], then
//! validation that reports every problem at once.
//!
//! ```toml
//! [runtime]
//! stop_timeout_ms = 30000
//!
//! [log]
//! level = "info,keelson=debug"
//! format = "compact"
//!
//! [transport]
//! adapter = "hyper"
//! port = 8080
//! drain_timeout_ms = 10000
//!
//! [[storage]]
//! name = "primary"
//! max_connections = 20
//! ```

mod service;
mod validation;

use crate::component::DEFAULT_STOP_TIMEOUT;
use crate::error::Result;
use crate::storage::StorageConfig;
use crate::telemetry::{LogConfig, MetricsConfig};
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub use service::{ConfigService, ENV_PREFIX};
pub use validation::validate;

/// `[runtime]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// Default deadline of every stop hook.
    pub stop_timeout_ms: u64,
    /// Deadline of every construct/start hook. Unbounded when unset.
    pub start_timeout_ms: Option<u64>,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            stop_timeout_ms: DEFAULT_STOP_TIMEOUT.as_millis() as u64,
            start_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub runtime: RuntimeSection,
    pub log: LogConfig,
    pub transport: TransportConfig,
    pub storage: Vec<StorageConfig>,
    pub metrics: MetricsConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeSection::default(),
            log: LogConfig::default(),
            transport: TransportConfig::default(),
            storage: vec![StorageConfig::named("primary"), StorageConfig::named("replica")],
            metrics: MetricsConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file without overlay or validation.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.stop_timeout_ms)
    }

    pub fn start_timeout(&self) -> Option<Duration> {
        self.runtime.start_timeout_ms.map(Duration::from_millis)
    }

    pub fn storage_pool(&self, name: &str) -> Option<&StorageConfig> {
        self.storage.iter().find(|pool| pool.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        validate(self)
    }
}

/// Load the effective configuration: file (or defaults), then `overrides`,
/// then validation.
///
/// # Errors
/// IO and parse errors for the file, [`Error::UnknownAdapter`] for an
/// unknown adapter override, [`Error::InvalidConfig`] listing every other
/// problem.
///
/// [`Error::UnknownAdapter`]: crate::Error::UnknownAdapter
/// [`Error::InvalidConfig`]: crate::Error::InvalidConfig
pub fn load(path: Option<&Path>, overrides: &ConfigService) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            RuntimeConfig::from_file(path)?
        }
        None => {
            tracing::info!("No configuration file given, using defaults");
            RuntimeConfig::default()
        }
    };

    overrides.apply(&mut config)?;
    config.validate()?;

    tracing::debug!(
        adapter = %config.transport.adapter,
        port = config.transport.port,
        pools = config.storage.len(),
        "Configuration loaded"
    );
    Ok(config)
}
