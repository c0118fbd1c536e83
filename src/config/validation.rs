//! Semantic checks on a parsed [`RuntimeConfig`].
//!
//! Serde handles syntax; this catches values that parse but cannot work.
//! Every problem is collected so a bad file is fixed in one pass.

use super::RuntimeConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing_subscriber::EnvFilter;

pub fn validate(config: &RuntimeConfig) -> Result<()> {
    let mut problems = Vec::new();

    if config.runtime.stop_timeout_ms == 0 {
        problems.push("runtime.stop_timeout_ms must be greater than 0".to_string());
    }
    if config.runtime.start_timeout_ms == Some(0) {
        problems.push("runtime.start_timeout_ms must be greater than 0 when set".to_string());
    }

    if let Err(e) = EnvFilter::try_new(&config.log.level) {
        problems.push(format!("log.level '{}' is not a valid filter: {e}", config.log.level));
    }

    let transport = &config.transport;
    if let Err(e) = transport.socket_addr() {
        problems.push(format!("transport.address: {e}"));
    }
    if transport.drain_timeout_ms == 0 {
        problems.push("transport.drain_timeout_ms must be greater than 0".to_string());
    }
    if transport.poll_interval_ms == 0 {
        problems.push("transport.poll_interval_ms must be greater than 0".to_string());
    } else if transport.poll_interval_ms > transport.drain_timeout_ms {
        problems.push(format!(
            "transport.poll_interval_ms ({}) exceeds transport.drain_timeout_ms ({})",
            transport.poll_interval_ms, transport.drain_timeout_ms
        ));
    }

    let mut seen = HashSet::new();
    for pool in &config.storage {
        if pool.name.trim().is_empty() {
            problems.push("storage pool name must not be empty".to_string());
            continue;
        }
        if !seen.insert(pool.name.as_str()) {
            problems.push(format!("storage pool '{}' is declared twice", pool.name));
        }
        if pool.max_connections == 0 {
            problems.push(format!(
                "storage '{}': max_connections must be greater than 0",
                pool.name
            ));
        }
        if pool.drain_timeout_ms == 0 {
            problems.push(format!(
                "storage '{}': drain_timeout_ms must be greater than 0",
                pool.name
            ));
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        for problem in &problems {
            tracing::error!(problem = %problem, "Invalid configuration");
        }
        Err(Error::InvalidConfig { problems })
    }
}
