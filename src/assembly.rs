//! The standard component set.
//!
//! ```text
//! config ← log ← storage.<pool>... ← transport
//!             ↖ metrics
//! ```
//!
//! Each function returns a typed builder so callers can add hooks, probes
//! or timeouts before registering it. [`standard_components`] wires the
//! whole set from a [`RuntimeConfig`].

use crate::component::{Capability, ComponentDescriptor, DescriptorBuilder};
use crate::config::RuntimeConfig;
use crate::drain::drain;
use crate::error::{Error, Result};
use crate::storage::{Pool, StorageConfig};
use crate::telemetry::{LogHandle, MetricsHandle, init_logging, install_metrics};
use crate::transport::{
    AdapterRegistry, MiddlewareChain, MiddlewareError, Request, RequestId, RequestLogging,
    Transport, TransportConfig, error_response,
};
use axum::Json;
use axum::http::{Method, StatusCode};
use axum::response::IntoResponse;
use serde_json::json;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

pub static CONFIG: Capability<RuntimeConfig> = Capability::new("config");
pub static LOG: Capability<LogHandle> = Capability::new("log");
pub static TRANSPORT: Capability<dyn Transport> = Capability::new("transport");
pub static METRICS: Capability<MetricsHandle> = Capability::new("metrics");

/// Added to a drain timeout to form the stop deadline of a draining
/// component, so the drain's own forced close runs before the sequencer
/// gives up on the hook.
pub const DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Capability under which the pool named `pool` is published.
pub fn storage_capability(pool: &str) -> Capability<Pool> {
    Capability::named(format!("storage.{pool}"))
}

pub fn config_component(config: RuntimeConfig) -> DescriptorBuilder<RuntimeConfig> {
    ComponentDescriptor::new("config", move |_deps| async move { Ok(config) }).provides(&CONFIG)
}

/// Installs the global `tracing` subscriber from the `[log]` section.
pub fn log_component() -> DescriptorBuilder<LogHandle> {
    ComponentDescriptor::new("log", |deps| async move {
        let config = deps.get(&CONFIG)?;
        Ok(init_logging(&config.log)?)
    })
    .requires(&CONFIG)
    .provides(&LOG)
}

/// One connection pool. Drained on stop within its `drain_timeout_ms`.
pub fn storage_component(config: &StorageConfig) -> DescriptorBuilder<Pool> {
    let name = format!("storage.{}", config.name);
    let drain_config = config.drain_config();
    let pool_config = config.clone();

    ComponentDescriptor::new(name.clone(), move |_deps| async move {
        Ok(Pool::new(&pool_config))
    })
    .requires(&CONFIG)
    .requires(&LOG)
    .provides(&storage_capability(&config.name))
    .probe_self()
    .on_stop(move |pool, _ctx| async move {
        drain(pool.as_ref(), &name, &drain_config).await;
        Ok(())
    })
    .stop_timeout(drain_config.timeout + DRAIN_GRACE)
}

/// The HTTP transport selected by `config.adapter`.
///
/// Started after every pool in `pools`, so it stops, and finishes its
/// in-flight requests, before they are drained.
pub fn transport_component(
    config: &TransportConfig,
    registry: Arc<AdapterRegistry>,
    chain: MiddlewareChain,
    pools: &[StorageConfig],
) -> DescriptorBuilder<Arc<dyn Transport>> {
    let drain_config = config.drain_config();
    let transport_config = config.clone();
    let listen_config = config.clone();

    let mut builder = ComponentDescriptor::new("transport", move |_deps| async move {
        Ok(registry.create(&transport_config)?)
    })
    .requires(&CONFIG)
    .requires(&LOG);
    for pool in pools {
        builder = builder.requires(&storage_capability(&pool.name));
    }

    builder
        .provides_as(&TRANSPORT, |transport| Arc::clone(&*transport))
        .on_start(move |transport, _signal| async move {
            let addr = listen_config.socket_addr()?;
            transport.mount(chain)?;
            let local = Arc::clone(&*transport).start(addr).await?;
            tracing::info!(adapter = %transport.adapter(), address = %local, "Listening");
            Ok(())
        })
        .on_stop(move |transport, _ctx| async move {
            transport.shutdown(&drain_config).await;
            Ok(())
        })
        .stop_timeout(drain_config.timeout + DRAIN_GRACE)
}

/// Shared slot the metrics component fills once its recorder is installed.
/// Lets the HTTP chain, built before any component starts, serve `/metrics`.
#[derive(Debug, Clone, Default)]
pub struct MetricsSlot(Arc<OnceLock<MetricsHandle>>);

impl MetricsSlot {
    pub fn get(&self) -> Option<&MetricsHandle> {
        self.0.get()
    }

    pub fn render(&self) -> String {
        self.get().map(MetricsHandle::render).unwrap_or_default()
    }
}

/// Installs the Prometheus recorder from the `[metrics]` section.
pub fn metrics_component(slot: MetricsSlot) -> DescriptorBuilder<MetricsHandle> {
    ComponentDescriptor::new("metrics", move |deps| async move {
        let config = deps.get(&CONFIG)?;
        let handle = install_metrics(&config.metrics);
        if slot.0.set(handle.clone()).is_err() {
            tracing::debug!("Metrics slot already filled");
        }
        Ok(handle)
    })
    .requires(&CONFIG)
    .requires(&LOG)
    .provides(&METRICS)
}

/// `GET /healthz` and `GET /metrics`, wrapped in request-id and request
/// logging middlewares. Everything else is a JSON 404.
pub fn standard_chain(metrics: MetricsSlot) -> MiddlewareChain {
    MiddlewareChain::new(move |request: Request| {
        let metrics = metrics.clone();
        async move {
            let response = match (request.method(), request.uri().path()) {
                (&Method::GET, "/healthz") => Json(json!({ "status": "ok" })).into_response(),
                (&Method::GET, "/metrics") => metrics.render().into_response(),
                _ => error_response(StatusCode::NOT_FOUND, "Not Found"),
            };
            Ok::<_, MiddlewareError>(response)
        }
    })
    .with(RequestId)
    .with(RequestLogging)
}

/// `config`, `log`, one `storage.<name>` per pool, `transport`, `metrics`,
/// in that declaration order.
///
/// # Errors
/// [`Error::UnknownAdapter`] when `registry` has no factory for the
/// configured adapter. Nothing has been constructed at that point.
pub fn standard_components(
    config: &RuntimeConfig,
    registry: Arc<AdapterRegistry>,
) -> Result<Vec<ComponentDescriptor>> {
    let adapter = config.transport.adapter;
    if !registry.is_registered(adapter) {
        return Err(Error::UnknownAdapter {
            adapter: adapter.to_string(),
        });
    }

    let slot = MetricsSlot::default();
    let stop_timeout = config.stop_timeout();

    let mut components = vec![
        bounded(config_component(config.clone()).stop_timeout(stop_timeout), config),
        bounded(log_component().stop_timeout(stop_timeout), config),
    ];
    components.extend(
        config
            .storage
            .iter()
            .map(|pool| bounded(storage_component(pool), config)),
    );
    components.push(bounded(
        transport_component(
            &config.transport,
            registry,
            standard_chain(slot.clone()),
            &config.storage,
        ),
        config,
    ));
    components.push(bounded(metrics_component(slot).stop_timeout(stop_timeout), config));
    Ok(components)
}

fn bounded<T: Send + Sync + 'static>(
    builder: DescriptorBuilder<T>,
    config: &RuntimeConfig,
) -> ComponentDescriptor {
    match config.start_timeout() {
        Some(timeout) => builder.start_timeout(timeout).build(),
        None => builder.build(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drain::{DrainableResource, PoolStat};
    use crate::lifecycle::{Runtime, StopOutcome};
    use crate::transport::{AdapterType, TransportError};
    use async_trait::async_trait;
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// A transport whose single connection finishes 2s after accepting stops.
    #[derive(Default)]
    struct SlowTransport {
        busy_until: Mutex<Option<Instant>>,
        addr: OnceLock<SocketAddr>,
    }

    #[async_trait]
    impl DrainableResource for SlowTransport {
        fn stat(&self) -> PoolStat {
            let idle = matches!(*self.busy_until.lock().unwrap(), Some(t) if Instant::now() >= t);
            if idle {
                PoolStat::new(1, 1, 0)
            } else {
                PoolStat::new(1, 0, 1)
            }
        }

        async fn close(&self) {}
    }

    #[async_trait]
    impl Transport for SlowTransport {
        fn adapter(&self) -> AdapterType {
            AdapterType::Axum
        }

        fn mount(&self, _chain: MiddlewareChain) -> crate::transport::Result<()> {
            Ok(())
        }

        async fn bind(&self, addr: SocketAddr) -> crate::transport::Result<SocketAddr> {
            self.addr.set(addr).map_err(|_| TransportError::AlreadyBound)?;
            Ok(addr)
        }

        async fn serve(self: Arc<Self>) -> crate::transport::Result<()> {
            Ok(())
        }

        fn local_addr(&self) -> Option<SocketAddr> {
            self.addr.get().copied()
        }

        async fn stop_accepting(&self) {
            *self.busy_until.lock().unwrap() = Some(Instant::now() + Duration::from_secs(2));
        }
    }

    fn test_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.storage = vec![StorageConfig::named("primary")];
        config.metrics.enabled = false;
        config.log.level = "warn".into();
        config
    }

    fn slow_registry() -> Arc<AdapterRegistry> {
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterType::Axum, |_config| {
            Ok(Arc::new(SlowTransport::default()) as Arc<dyn Transport>)
        });
        Arc::new(registry)
    }

    #[tokio::test(start_paused = true)]
    async fn standard_set_stops_in_reverse_and_waits_for_the_transport() {
        let config = test_config();
        let runtime = Runtime::builder()
            .components(standard_components(&config, slow_registry()).unwrap())
            .without_os_signals()
            .build()
            .unwrap();
        assert_eq!(
            runtime.start_order(),
            ["config", "log", "storage.primary", "transport", "metrics"]
        );

        let running = runtime.start().await.unwrap();
        assert_eq!(running.probes().len(), 1);
        let transport = running.capabilities().resolve(&TRANSPORT).unwrap();
        assert_eq!(transport.local_addr(), Some("0.0.0.0:8080".parse().unwrap()));

        let report = running.stop().await;
        assert_eq!(
            report.stop_order(),
            ["metrics", "transport", "storage.primary", "log", "config"]
        );
        assert!(report.all_ok(), "{report:?}");
        assert!(report.elapsed >= Duration::from_secs(2), "{:?}", report.elapsed);
        assert!(report.elapsed < Duration::from_millis(2_500), "{:?}", report.elapsed);
        assert!(report.get("transport").unwrap().elapsed >= Duration::from_secs(2));
        assert!(report.get("storage.primary").unwrap().elapsed < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn broken_stop_hooks_do_not_block_the_rest() {
        let config = test_config();
        let failing = ComponentDescriptor::new("audit", |_deps| async { Ok(()) })
            .requires(&TRANSPORT)
            .on_stop(|_, _ctx| async { Err::<(), _>(anyhow::anyhow!("flush failed")) });
        let panicking = ComponentDescriptor::new("cache", |_deps| async { Ok(()) })
            .requires(&LOG)
            .on_stop(|_, _ctx| async {
                if true {
                    panic!("cache poisoned");
                }
                Ok(())
            });

        let running = Runtime::builder()
            .components(standard_components(&config, slow_registry()).unwrap())
            .component(failing)
            .component(panicking)
            .without_os_signals()
            .build()
            .unwrap()
            .start()
            .await
            .unwrap();
        let report = running.stop().await;

        assert_eq!(
            report.stop_order(),
            ["cache", "audit", "metrics", "transport", "storage.primary", "log", "config"]
        );
        assert_eq!(report.get("cache").unwrap().outcome, StopOutcome::Panicked);
        assert!(matches!(report.get("audit").unwrap().outcome, StopOutcome::Failed(_)));
        assert_eq!(report.failures().count(), 2);
        for name in ["metrics", "transport", "storage.primary", "log", "config"] {
            assert!(report.get(name).unwrap().outcome.is_ok(), "{name}");
        }
    }

    #[test]
    fn unknown_adapter_is_rejected_during_assembly() {
        let config = test_config();
        let mut registry = AdapterRegistry::new();
        registry.register(AdapterType::Hyper, |_config| {
            Ok(Arc::new(SlowTransport::default()) as Arc<dyn Transport>)
        });

        let result = standard_components(&config, Arc::new(registry));
        assert!(
            matches!(result, Err(Error::UnknownAdapter { ref adapter }) if adapter == "axum"),
            "{:?}",
            result.map(|components| components.len())
        );
    }

    #[tokio::test]
    async fn standard_chain_serves_health_and_metrics() {
        let chain = standard_chain(MetricsSlot::default());
        let request = axum::http::Request::builder()
            .uri("/healthz")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = chain.dispatch(request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(crate::transport::REQUEST_ID_HEADER));

        let request = axum::http::Request::builder()
            .uri("/missing")
            .body(axum::body::Body::empty())
            .unwrap();
        assert_eq!(chain.dispatch(request).await.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn drainers_outlive_their_drain_timeout() {
        let descriptor = storage_component(&StorageConfig::named("primary")).build();
        assert_eq!(descriptor.name(), "storage.primary");
        assert_eq!(descriptor.stop_timeout(), Duration::from_secs(6));
        assert_eq!(descriptor.provides(), &[storage_capability("primary").id().clone()]);
    }
}
