use super::*;
use crate::drain::DrainOutcome;
use crate::error::Error;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn slow_chain(delay: Duration) -> MiddlewareChain {
    MiddlewareChain::new(move |_request: Request| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, MiddlewareError>((StatusCode::OK, "done").into_response())
    })
    .with(RequestId)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

/// Start a request, stop accepting while it is in flight, check that new
/// connections are refused, then drain and read the original response.
async fn refuses_new_connections_then_drains(transport: Arc<dyn Transport>) {
    transport.mount(slow_chain(Duration::from_millis(300))).unwrap();
    let addr = Arc::clone(&transport).start(loopback()).await.unwrap();
    assert_eq!(transport.local_addr(), Some(addr));

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /work HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    wait_until(|| transport.stat().acquired == 1).await;

    transport.stop_accepting().await;
    assert!(TcpStream::connect(addr).await.is_err());

    let report = drain(
        transport.as_ref(),
        "transport",
        &DrainConfig::new(Duration::from_secs(5)),
    )
    .await;
    assert_eq!(report.outcome, DrainOutcome::Idle);
    assert_eq!(report.initial.acquired, 1);
    assert!(report.elapsed < Duration::from_secs(5));

    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.to_ascii_lowercase().contains("x-request-id"));
    assert!(response.ends_with("done"));
}

#[tokio::test]
async fn axum_refuses_new_connections_before_draining() {
    refuses_new_connections_then_drains(Arc::new(AxumTransport::new())).await;
}

#[tokio::test]
async fn hyper_refuses_new_connections_before_draining() {
    refuses_new_connections_then_drains(Arc::new(HyperTransport::new())).await;
}

#[tokio::test]
async fn stuck_request_is_cut_off_at_the_drain_deadline() {
    let transport: Arc<dyn Transport> = Arc::new(HyperTransport::new());
    transport.mount(slow_chain(Duration::from_secs(60))).unwrap();
    let addr = Arc::clone(&transport).start(loopback()).await.unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\n\r\n")
        .await
        .unwrap();
    wait_until(|| transport.stat().acquired == 1).await;

    let config = DrainConfig::new(Duration::from_millis(300));
    let report = transport.shutdown(&config).await;
    assert_eq!(report.outcome, DrainOutcome::TimedOut { remaining: 1 });

    // The forced close drops the connection without a response.
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
}

#[tokio::test]
async fn shutdown_without_serving_completes_immediately() {
    let transport = AxumTransport::new();
    transport.bind(loopback()).await.unwrap();
    let report = transport.shutdown(&DrainConfig::transport()).await;
    assert_eq!(report.outcome, DrainOutcome::Idle);
}

#[tokio::test]
async fn serve_requires_bind() {
    let transport = Arc::new(HyperTransport::new());
    assert!(matches!(
        transport.serve().await,
        Err(TransportError::NotBound)
    ));
}

#[tokio::test]
async fn mount_is_rejected_once_serving() {
    let transport: Arc<dyn Transport> = Arc::new(AxumTransport::new());
    Arc::clone(&transport).start(loopback()).await.unwrap();
    wait_until(|| matches!(transport.mount(MiddlewareChain::default()), Err(TransportError::AlreadyServing))).await;
    transport.shutdown(&DrainConfig::transport()).await;
}

#[test]
fn create_with_unregistered_adapter_fails() {
    let registry = AdapterRegistry::new();
    let config = TransportConfig {
        adapter: AdapterType::Hyper,
        ..Default::default()
    };
    let err = registry.create(&config).err().unwrap();
    assert!(matches!(err, Error::UnknownAdapter { ref adapter } if adapter == "hyper"));
}

#[test]
fn re_registering_replaces_the_factory() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = AdapterRegistry::with_builtin();

    let counted = Arc::clone(&calls);
    let previous = registry.register(AdapterType::Axum, move |_config| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(HyperTransport::new()) as Arc<dyn Transport>)
    });
    assert!(previous.is_some());

    let transport = registry.create(&TransportConfig::default()).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.adapter(), AdapterType::Hyper);
}

#[test]
fn builtin_registry_knows_both_adapters() {
    let registry = AdapterRegistry::with_builtin();
    assert_eq!(registry.adapters(), vec![AdapterType::Axum, AdapterType::Hyper]);

    let config = TransportConfig {
        adapter: AdapterType::Hyper,
        ..Default::default()
    };
    assert_eq!(registry.create(&config).unwrap().adapter(), AdapterType::Hyper);
}

#[test]
fn adapter_type_round_trips_through_strings() {
    assert_eq!(AdapterType::default(), AdapterType::Axum);
    assert_eq!(AdapterType::from_str("hyper").unwrap(), AdapterType::Hyper);
    assert!(AdapterType::from_str("tomcat").is_err());
    assert_eq!(AdapterType::Axum.to_string(), "axum");
}

#[test]
fn transport_config_defaults_and_parsing() {
    let config: TransportConfig = toml::from_str("adapter = \"hyper\"\nport = 9000").unwrap();
    assert_eq!(config.adapter, AdapterType::Hyper);
    assert_eq!(config.port, 9000);
    assert_eq!(config.address, "0.0.0.0");
    assert_eq!(config.drain_config(), DrainConfig::transport());
    assert_eq!(config.socket_addr().unwrap(), "0.0.0.0:9000".parse().unwrap());

    let bad = TransportConfig {
        address: "not-an-ip".into(),
        ..Default::default()
    };
    assert!(matches!(
        bad.socket_addr(),
        Err(TransportError::InvalidAddress { .. })
    ));

    assert!(toml::from_str::<TransportConfig>("adapter = \"tomcat\"").is_err());
}
