// End-to-end harness: a real HTTP server (axum/hyper) in front of the full
// dispatch pipeline, against a mock upstream, using the in-memory fakes for
// the registry/cache/log collaborators.

use axum::routing::get;
use axum::Router;
use midgate::cache::InMemoryCacheStore;
use midgate::controller::{Controller, HealthController, PrometheusMetricsController, ProxyController};
use midgate::health::Supervisor;
use midgate::http::{client::create_client, HttpServer, Server};
use midgate::logsink::InMemoryLogStore;
use midgate::proxy::Dispatcher;
use midgate::registry::{Collection, InMemoryRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new().route("/hello", get(|| async { (axum::http::StatusCode::OK, "hi") }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_gateway(registry: Arc<InMemoryRegistry>) -> SocketAddr {
    let cache = Arc::new(InMemoryCacheStore::new());
    let logs = Arc::new(InMemoryLogStore::new());
    let health = Supervisor::new(create_client(), Duration::from_secs(1));
    let dispatcher = Arc::new(Dispatcher::new(
        registry,
        health,
        cache,
        logs,
        create_client(),
        Duration::from_secs(5),
    ));

    let controllers: Vec<Box<dyn Controller>> = vec![
        Box::new(HealthController::new()),
        Box::new(PrometheusMetricsController::new()),
        Box::new(ProxyController::new(dispatcher)),
    ];

    let server = HttpServer::new(CancellationToken::new(), 0, controllers, vec![]).unwrap();
    let server_clone = server.clone();
    tokio::spawn(async move {
        let _ = server_clone.listen_and_serve().await;
    });

    // Wait for the listener to bind.
    for _ in 0..50 {
        if let Some(addr) = server.local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("gateway never bound a listener");
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let registry = Arc::new(InMemoryRegistry::new());
    let addr = spawn_gateway(registry).await;

    let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn metrics_endpoint_serves_prometheus_text() {
    let registry = Arc::new(InMemoryRegistry::new());
    let addr = spawn_gateway(registry).await;

    let resp = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("requests_total"));
}

#[tokio::test]
async fn proxied_request_reaches_upstream_end_to_end() {
    let upstream_addr = spawn_upstream().await;
    let registry = Arc::new(InMemoryRegistry::new());
    registry.insert(Collection::new("things", format!("http://{}", upstream_addr)));

    let addr = spawn_gateway(registry).await;

    let resp = reqwest::get(format!("http://{}/proxy/things/hello", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "hi");
}

#[tokio::test]
async fn unknown_collection_prefix_is_404_end_to_end() {
    let registry = Arc::new(InMemoryRegistry::new());
    let addr = spawn_gateway(registry).await;

    let resp = reqwest::get(format!("http://{}/proxy/missing/hello", addr))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}
