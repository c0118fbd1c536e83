use super::RuntimeConfig;
use crate::error::{Error, Result};
use crate::storage::StorageConfig;
use crate::transport::AdapterType;
use dashmap::DashMap;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

/// Environment variables with this prefix override configuration values.
pub const ENV_PREFIX: &str = "KEELSON_";

/// Key/value configuration overrides.
///
/// Keys are lowercase with `_` separators, the env var name without the
/// prefix: `KEELSON_TRANSPORT_PORT` → `transport_port`. Per-pool storage
/// keys carry the pool name: `storage_primary_max_connections`.
#[derive(Debug, Clone, Default)]
pub struct ConfigService {
    values: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect every `KEELSON_*` variable of the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let service = Self::new();
        for (key, value) in vars {
            if let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) {
                service.set(key, value);
            }
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(&normalize(key)).map(|v| v.clone())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize(key), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overlay every known key onto `config`.
    ///
    /// Unknown keys are logged and ignored. Values that do not parse are
    /// collected and reported together.
    pub fn apply(&self, config: &mut RuntimeConfig) -> Result<()> {
        let mut overlay = Overlay::default();

        let mut entries: Vec<(String, String)> = self
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort();

        for (key, value) in &entries {
            if !overlay.apply(config, key, value) {
                tracing::warn!(key = %key, "Ignoring unknown configuration override");
            }
        }

        overlay.finish()
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace(['.', '-'], "_")
}

#[derive(Default)]
struct Overlay {
    problems: Vec<String>,
    unknown_adapter: Option<String>,
}

impl Overlay {
    /// Returns `false` when `key` names no configuration value.
    fn apply(&mut self, config: &mut RuntimeConfig, key: &str, value: &str) -> bool {
        match key {
            "runtime_stop_timeout_ms" => self.set(key, value, &mut config.runtime.stop_timeout_ms),
            "runtime_start_timeout_ms" => {
                if let Some(ms) = self.parse(key, value) {
                    config.runtime.start_timeout_ms = Some(ms);
                }
            }
            "log_level" => config.log.level = value.to_string(),
            "log_format" => self.set(key, value, &mut config.log.format),
            "transport_adapter" => match AdapterType::from_str(value) {
                Ok(adapter) => config.transport.adapter = adapter,
                Err(_) => self.unknown_adapter = Some(value.to_string()),
            },
            "transport_address" => config.transport.address = value.to_string(),
            "transport_port" => self.set(key, value, &mut config.transport.port),
            "transport_drain_timeout_ms" => {
                self.set(key, value, &mut config.transport.drain_timeout_ms)
            }
            "transport_poll_interval_ms" => {
                self.set(key, value, &mut config.transport.poll_interval_ms)
            }
            "metrics_enabled" => self.set(key, value, &mut config.metrics.enabled),
            _ => return self.apply_storage(&mut config.storage, key, value),
        }
        true
    }

    fn apply_storage(&mut self, pools: &mut [StorageConfig], key: &str, value: &str) -> bool {
        let Some(rest) = key.strip_prefix("storage_") else {
            return false;
        };
        for pool in pools.iter_mut() {
            let Some(field) = rest
                .strip_prefix(normalize(&pool.name).as_str())
                .and_then(|field| field.strip_prefix('_'))
            else {
                continue;
            };
            match field {
                "max_connections" => self.set(key, value, &mut pool.max_connections),
                "drain_timeout_ms" => self.set(key, value, &mut pool.drain_timeout_ms),
                "acquire_timeout_ms" => self.set(key, value, &mut pool.acquire_timeout_ms),
                _ => continue,
            };
            return true;
        }
        false
    }

    fn set<T>(&mut self, key: &str, value: &str, target: &mut T)
    where
        T: FromStr,
        T::Err: Display,
    {
        if let Some(parsed) = self.parse(key, value) {
            *target = parsed;
        }
    }

    /// Records a problem when `value` does not parse.
    fn parse<T>(&mut self, key: &str, value: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match value.trim().parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                self.problems
                    .push(format!("{ENV_PREFIX}{}='{value}': {e}", key.to_ascii_uppercase()));
                None
            }
        }
    }

    fn finish(self) -> Result<()> {
        if let Some(adapter) = self.unknown_adapter {
            return Err(Error::UnknownAdapter { adapter });
        }
        if !self.problems.is_empty() {
            return Err(Error::InvalidConfig {
                problems: self.problems,
            });
        }
        Ok(())
    }
}
