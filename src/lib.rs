//! # Keelson
//!
//! A component lifecycle runtime: components declare what they provide and
//! require, start in dependency order, share one shutdown signal, and stop in
//! exact reverse order under per-component deadlines. Pooled resources,
//! including the pluggable HTTP transports, are drained within a bounded
//! window before they close.
//!
//! ## Features
//!
//! - **Typed capabilities**: `Capability<T>` keys instead of reflection-based
//!   injection; constructors only see what they declared
//! - **Deterministic ordering**: cycles, missing and duplicate providers are
//!   rejected before anything is constructed
//! - **One shutdown signal**: SIGINT, SIGTERM, a parent token or an explicit
//!   trigger, whichever comes first
//! - **Bounded drain**: idle detection with polling, forced close at the
//!   deadline
//! - **Transport adapters**: `axum` and `hyper` servers behind one contract,
//!   chosen by configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use keelson::prelude::*;
//! use keelson::assembly::standard_components;
//! use keelson::config::{self, ConfigService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load(None, &ConfigService::from_env())?;
//!     let registry = Arc::new(AdapterRegistry::with_builtin());
//!
//!     let report = Runtime::builder()
//!         .components(standard_components(&config, registry)?)
//!         .build()?
//!         .run()
//!         .await?;
//!
//!     println!("stopped: {:?}", report.stop_order());
//!     Ok(())
//! }
//! ```

pub mod assembly;
pub mod component;
pub mod config;
pub mod drain;
pub mod error;
pub mod graph;
pub mod lifecycle;
pub mod storage;
pub mod telemetry;
pub mod transport;

pub use error::{Error, Result};

/// Prelude module for convenient imports
///
/// ```rust
/// use keelson::prelude::*;
/// ```
pub mod prelude {
    pub use crate::component::{
        Capability, ComponentDescriptor, Dependencies, DescriptorBuilder, HealthProbe,
        ProbeResult,
    };
    pub use crate::config::RuntimeConfig;
    pub use crate::drain::{DrainConfig, DrainableResource, PoolStat, drain};
    pub use crate::error::{Error, Result};
    pub use crate::lifecycle::{
        LifecycleError, Runtime, ShutdownReason, ShutdownReport, ShutdownSignal, StopContext,
        StopOutcome,
    };
    pub use crate::transport::{
        AdapterRegistry, AdapterType, Middleware, MiddlewareChain, Next, Transport,
    };
    pub use async_trait::async_trait;
    pub use std::sync::Arc;
}
