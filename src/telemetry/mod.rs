//! Logging and metrics setup.
//!
//! Both facades (`tracing`, `metrics`) have process-wide dispatchers. They
//! are installed from here only, by the `log` and `metrics` components, and
//! handed to the rest of the runtime as capabilities.

use crate::error::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing_subscriber::EnvFilter;

/// Output layout of the fmt subscriber.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Full,
    Compact,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
        }
    }
}

impl LogConfig {
    /// The filter `init_logging` would install.
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .map_err(|e| Error::invalid_config(format!("log.level '{}': {e}", self.level)))
    }
}

/// What the `log` component provides.
#[derive(Debug, Clone)]
pub struct LogHandle {
    filter: String,
    format: LogFormat,
    installed: bool,
}

impl LogHandle {
    /// The active filter directive.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn format(&self) -> LogFormat {
        self.format
    }

    /// `false` when another global subscriber was already in place.
    pub fn installed(&self) -> bool {
        self.installed
    }
}

/// Install the global fmt subscriber.
///
/// A subscriber installed earlier (by a test harness or an embedding
/// application) is kept; the returned handle reports `installed == false`.
///
/// # Errors
/// [`Error::InvalidConfig`] when the level is not a valid filter directive.
pub fn init_logging(config: &LogConfig) -> Result<LogHandle> {
    let filter = config.env_filter()?;
    let directive = filter.to_string();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match config.format {
        LogFormat::Full => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    let installed = match installed {
        Ok(()) => {
            tracing::info!(filter = %directive, format = %config.format, "Logging initialized");
            true
        }
        Err(e) => {
            tracing::debug!(error = %e, "Global subscriber already set, keeping it");
            false
        }
    };

    Ok(LogHandle {
        filter: directive,
        format: config.format,
        installed,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// What the `metrics` component provides: the Prometheus render handle, or
/// nothing when metrics are disabled or another recorder won the race.
#[derive(Clone, Default)]
pub struct MetricsHandle {
    prometheus: Option<PrometheusHandle>,
}

impl MetricsHandle {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn from_prometheus(handle: PrometheusHandle) -> Self {
        Self {
            prometheus: Some(handle),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.prometheus.is_some()
    }

    /// Current metrics in the Prometheus text format. Empty when disabled.
    pub fn render(&self) -> String {
        self.prometheus
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MetricsHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandle")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Install the global Prometheus recorder and describe the runtime's metrics.
pub fn install_metrics(config: &MetricsConfig) -> MetricsHandle {
    if !config.enabled {
        tracing::info!("Metrics disabled");
        return MetricsHandle::disabled();
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            describe_metrics();
            tracing::info!("Prometheus recorder installed");
            MetricsHandle::from_prometheus(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Could not install metrics recorder, metrics disabled");
            MetricsHandle::disabled()
        }
    }
}

fn describe_metrics() {
    use metrics::{Unit, describe_counter, describe_histogram};

    describe_counter!("keelson_component_starts_total", "Components started");
    describe_counter!(
        "keelson_component_start_failures_total",
        "Components whose construct or start hook failed"
    );
    describe_histogram!(
        "keelson_component_start_seconds",
        Unit::Seconds,
        "Time spent constructing and starting a component"
    );
    describe_histogram!(
        "keelson_component_stop_seconds",
        Unit::Seconds,
        "Time spent in a component's stop hook"
    );
    describe_counter!(
        "keelson_component_stop_failures_total",
        "Stop hooks that failed, panicked or timed out"
    );
    describe_histogram!(
        "keelson_drain_seconds",
        Unit::Seconds,
        "Time from drain start to close"
    );
    describe_counter!(
        "keelson_drain_timeouts_total",
        "Drains force-closed at their deadline"
    );
    describe_counter!("keelson_http_requests_total", "Requests dispatched by a transport");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn log_config_parses_with_defaults() {
        let config: LogConfig = toml::from_str("format = \"compact\"").unwrap();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert!(toml::from_str::<LogConfig>("format = \"json\"").is_err());
    }

    #[test]
    fn invalid_level_is_a_config_error() {
        let config = LogConfig {
            level: "keelson=loud".into(),
            ..Default::default()
        };
        // RUST_LOG takes precedence when it is set and valid.
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(
                config.env_filter(),
                Err(Error::InvalidConfig { .. })
            ));
        }
    }

    #[test]
    fn second_init_keeps_the_first_subscriber() {
        let config = LogConfig {
            level: "warn".into(),
            ..Default::default()
        };
        let _first = init_logging(&config).unwrap();
        let second = init_logging(&config).unwrap();
        assert!(!second.installed());
        assert_eq!(second.format(), LogFormat::Full);
    }

    #[test]
    fn disabled_metrics_render_nothing() {
        let handle = install_metrics(&MetricsConfig { enabled: false });
        assert!(!handle.is_enabled());
        assert_eq!(handle.render(), "");
    }

    #[test]
    fn prometheus_handle_renders_recorded_counters() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = MetricsHandle::from_prometheus(recorder.handle());
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("keelson_component_starts_total", "component" => "config")
                .increment(2);
        });
        let rendered = handle.render();
        assert!(rendered.contains("keelson_component_starts_total"), "{rendered}");
        assert!(rendered.contains("component=\"config\""), "{rendered}");
    }
}
