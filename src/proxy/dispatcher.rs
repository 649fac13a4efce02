// The core request-forwarding pipeline: resolve the target collection,
// enforce admission, probe the cache, forward on a miss, then log and
// populate the cache from the captured response.

use axum::body::Bytes as AxumBytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::error;

use crate::cache::{CacheEntry, CacheStore, SharedCacheStore};
use crate::health::HealthSupervisor;
use crate::http::client::HyperClient;
use crate::logsink::{LogStore, RequestLog, SharedLogStore};
use crate::metrics;
use crate::proxy::cache_key::cache_key;
use crate::proxy::forward::{forward, target_url, ForwardError};
use crate::registry::{Registry, SharedRegistry};

const CACHE_HIT_HEADER: &str = "x-cache";

/// A single proxied request's inbound shape, gathered by the HTTP
/// controller before the body is fully buffered.
pub struct Inbound {
    pub method: String,
    pub prefix: String,
    /// The wildcard tail, with no leading slash.
    pub path: String,
    pub raw_query: String,
    pub headers: Vec<(String, String)>,
    pub body: AxumBytes,
    pub client_ip: String,
}

pub struct Dispatcher {
    registry: SharedRegistry,
    health: Arc<dyn HealthSupervisor>,
    cache: SharedCacheStore,
    logs: SharedLogStore,
    client: HyperClient,
    forward_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: SharedRegistry,
        health: Arc<dyn HealthSupervisor>,
        cache: SharedCacheStore,
        logs: SharedLogStore,
        client: HyperClient,
        forward_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            health,
            cache,
            logs,
            client,
            forward_timeout,
        }
    }

    pub async fn dispatch(&self, inbound: Inbound) -> Response {
        let start = Instant::now();
        metrics::inc_requests_total();

        let collection = match self.registry.get_by_prefix(&inbound.prefix).await {
            Ok(c) => c,
            Err(crate::registry::RegistryError::NotFound) => {
                metrics::inc_status_code(StatusCode::NOT_FOUND.as_u16());
                return error_response(StatusCode::NOT_FOUND, "Collection not found");
            }
            Err(crate::registry::RegistryError::InvalidRegistryState) => {
                error!(component = "proxy", event = "invalid_registry_state", prefix = %inbound.prefix, "multiple active collections share this prefix");
                metrics::inc_status_code(StatusCode::SERVICE_UNAVAILABLE.as_u16());
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "Registry is in an invalid state for this prefix");
            }
        };

        if !collection.active {
            metrics::inc_status_code(StatusCode::SERVICE_UNAVAILABLE.as_u16());
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Collection is not active");
        }
        if collection.has_health_check() && !self.health.is_healthy(&collection.id) {
            metrics::inc_status_code(StatusCode::SERVICE_UNAVAILABLE.as_u16());
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service is unhealthy");
        }

        let target = target_url(&collection.base_url, &inbound.path, &inbound.raw_query);

        let key = if collection.cache_enabled {
            Some(cache_key(
                &collection.id,
                &inbound.method,
                &inbound.path,
                &inbound.raw_query,
                &inbound.body,
                collection.cache_key_strategy,
            ))
        } else {
            None
        };

        if let Some(ref key) = key {
            if let Some(raw) = self.cache.get(key).await {
                if let Ok(entry) = serde_json::from_slice::<CacheEntry>(&raw) {
                    metrics::inc_cache_hits();
                    metrics::inc_status_code(entry.status);
                    if collection.log_enabled {
                        self.record_log(&collection, &inbound, &target, entry.status, 0, entry.body.len(), true)
                            .await;
                    }
                    return replay(entry);
                }
            }
            metrics::inc_cache_misses();
        }

        let result = forward(
            &self.client,
            &inbound.method,
            &target,
            &inbound.headers,
            inbound.body.clone(),
            self.forward_timeout,
        )
        .await;

        let forwarded = match result {
            Ok(f) => f,
            Err(e) => {
                error!(component = "proxy", event = "forward_failed", collection_id = %collection.id, target = %target, error = %e, "upstream forward failed");
                metrics::inc_upstream_errors();
                let status = match e {
                    ForwardError::Timeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                metrics::inc_status_code(status.as_u16());
                if collection.log_enabled {
                    self.record_log(
                        &collection,
                        &inbound,
                        &target,
                        status.as_u16(),
                        start.elapsed().as_millis() as u64,
                        0,
                        false,
                    )
                    .await;
                }
                return error_response(status, "upstream request failed");
            }
        };

        metrics::inc_status_code(forwarded.status);

        if collection.log_enabled {
            self.record_log(
                &collection,
                &inbound,
                &target,
                forwarded.status,
                start.elapsed().as_millis() as u64,
                forwarded.body.len(),
                false,
            )
            .await;
        }

        if collection.cache_enabled && forwarded.status == 200 {
            if let Some(key) = key {
                let entry = CacheEntry {
                    status: forwarded.status,
                    body: forwarded.body.clone(),
                    headers: forwarded.headers.clone(),
                };
                if let Ok(raw) = serde_json::to_vec(&entry) {
                    self.cache.set(&key, raw, collection.cache_ttl_secs).await;
                }
            }
        }

        let mut response = Response::builder().status(
            StatusCode::from_u16(forwarded.status).unwrap_or(StatusCode::OK),
        );
        for (k, v) in &forwarded.headers {
            response = response.header(k, v);
        }
        response
            .body(axum::body::Body::from(forwarded.body))
            .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "response build failed"))
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_log(
        &self,
        collection: &crate::registry::Collection,
        inbound: &Inbound,
        target: &str,
        status: u16,
        duration_ms: u64,
        response_size: usize,
        from_cache: bool,
    ) {
        let params = parse_query_params(&inbound.raw_query);

        let entry = RequestLog {
            collection_id: collection.id.clone(),
            path: inbound.path.clone(),
            method: inbound.method.clone(),
            target_url: target.to_string(),
            status,
            duration_ms,
            request_size: inbound.body.len(),
            response_size,
            client_ip: inbound.client_ip.clone(),
            request_headers: inbound.headers.clone(),
            response_headers: vec![],
            request_body: String::from_utf8_lossy(&inbound.body).to_string(),
            request_params: params,
            from_cache,
            timestamp: Utc::now(),
        };

        self.logs
            .record(entry, collection.log_rolling, collection.log_max_entries)
            .await;
    }
}

/// Decodes a raw query string into grouped params, mirroring Go's
/// `url.ParseQuery`: `+` is a literal space, values are percent-decoded, and
/// repeated keys accumulate into an array rather than overwriting.
fn parse_query_params(raw_query: &str) -> std::collections::BTreeMap<String, Vec<String>> {
    let mut params: std::collections::BTreeMap<String, Vec<String>> = std::collections::BTreeMap::new();

    for pair in raw_query.split('&').filter(|s| !s.is_empty()) {
        let mut it = pair.splitn(2, '=');
        let raw_key = it.next().unwrap_or("");
        let raw_value = it.next().unwrap_or("");

        let key = decode_query_component(raw_key);
        let value = decode_query_component(raw_value);

        params.entry(key).or_default().push(value);
    }

    params
}

fn decode_query_component(s: &str) -> String {
    let with_spaces = s.replace('+', " ");
    urlencoding::decode(&with_spaces)
        .map(|cow| cow.into_owned())
        .unwrap_or(with_spaces)
}

fn replay(entry: CacheEntry) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK))
        .header(CACHE_HIT_HEADER, "HIT");
    for (k, v) in &entry.headers {
        builder = builder.header(k, v);
    }
    builder
        .body(axum::body::Body::from(entry.body))
        .unwrap_or_else(|_| error_response(StatusCode::INTERNAL_SERVER_ERROR, "cache replay failed"))
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        axum::Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::health::Supervisor;
    use crate::logsink::InMemoryLogStore;
    use crate::registry::{Collection, InMemoryRegistry, Registry};
    use axum::routing::{get, post};
    use axum::Router;
    use std::net::SocketAddr;

    #[test]
    fn query_params_are_percent_decoded() {
        let params = parse_query_params("q=a%20b");
        assert_eq!(params.get("q").unwrap(), &vec!["a b".to_string()]);
    }

    #[test]
    fn query_params_plus_decodes_to_space() {
        let params = parse_query_params("q=a+b");
        assert_eq!(params.get("q").unwrap(), &vec!["a b".to_string()]);
    }

    #[test]
    fn repeated_keys_group_into_an_array() {
        let params = parse_query_params("a=1&a=2");
        assert_eq!(params.get("a").unwrap(), &vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn empty_query_yields_empty_params() {
        assert!(parse_query_params("").is_empty());
    }
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    async fn spawn_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_for_route = hits.clone();

        let app = Router::new()
            .route(
                "/echo",
                get(move || {
                    let hits = hits_for_route.clone();
                    async move {
                        hits.fetch_add(1, Ordering::Relaxed);
                        (StatusCode::OK, "hello")
                    }
                }),
            )
            .route("/broken", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/healthz", get(|| async { StatusCode::OK }))
            .route("/echo-body", post(|body: axum::body::Bytes| async move { body }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, hits)
    }

    fn new_dispatcher(
        registry: Arc<InMemoryRegistry>,
    ) -> (Dispatcher, Arc<InMemoryCacheStore>, Arc<InMemoryLogStore>) {
        let cache = Arc::new(InMemoryCacheStore::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let health = Supervisor::new(crate::http::client::create_client(), Duration::from_secs(1));
        let dispatcher = Dispatcher::new(
            registry,
            health,
            cache.clone(),
            logs.clone(),
            crate::http::client::create_client(),
            Duration::from_secs(5),
        );
        (dispatcher, cache, logs)
    }

    fn inbound(prefix: &str, path: &str) -> Inbound {
        Inbound {
            method: "GET".to_string(),
            prefix: prefix.to_string(),
            path: path.to_string(),
            raw_query: String::new(),
            headers: vec![],
            body: AxumBytes::new(),
            client_ip: "127.0.0.1".to_string(),
        }
    }

    #[tokio::test]
    async fn happy_forward_reaches_upstream() {
        let (addr, hits) = spawn_upstream().await;
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(Collection::new("things", format!("http://{}", addr)));
        let (dispatcher, _cache, _logs) = new_dispatcher(registry);

        let resp = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_prefix_is_404() {
        let registry = Arc::new(InMemoryRegistry::new());
        let (dispatcher, _cache, _logs) = new_dispatcher(registry);

        let resp = dispatcher.dispatch(inbound("missing", "echo")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn colliding_prefixes_are_503() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(Collection::new("things", "http://upstream-a.local"));
        registry.insert(Collection::new("things", "http://upstream-b.local"));
        let (dispatcher, _cache, _logs) = new_dispatcher(registry);

        let resp = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn inactive_collection_is_503_and_unlogged() {
        let (addr, _hits) = spawn_upstream().await;
        let registry = Arc::new(InMemoryRegistry::new());
        let mut c = Collection::new("things", format!("http://{}", addr));
        c.active = false;
        c.log_enabled = true;
        let id = c.id.clone();
        registry.insert(c);
        let (dispatcher, _cache, logs) = new_dispatcher(registry);

        let resp = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(logs.count_for(&id).await, 0);
    }

    #[tokio::test]
    async fn cache_miss_then_hit_skips_second_upstream_call() {
        let (addr, hits) = spawn_upstream().await;
        let registry = Arc::new(InMemoryRegistry::new());
        let mut c = Collection::new("things", format!("http://{}", addr));
        c.cache_enabled = true;
        c.cache_ttl_secs = 60;
        registry.insert(c);
        let (dispatcher, _cache, _logs) = new_dispatcher(registry);

        let first = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers().get("x-cache").unwrap(), "HIT");

        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn non_200_response_is_not_cached() {
        let (addr, _hits) = spawn_upstream().await;
        let registry = Arc::new(InMemoryRegistry::new());
        let mut c = Collection::new("things", format!("http://{}", addr));
        c.cache_enabled = true;
        c.cache_ttl_secs = 60;
        let id = c.id.clone();
        registry.insert(c);
        let (dispatcher, cache, _logs) = new_dispatcher(registry);

        let resp = dispatcher.dispatch(inbound("things", "broken")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let key = cache_key(&id, "GET", "broken", "", b"", crate::registry::CacheKeyStrategy::Params);
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn unhealthy_collection_is_rejected() {
        // Points at a closed port, so the probe's first tick marks it unhealthy.
        let mut c = Collection::new("things", "http://127.0.0.1:1");
        c.health_path = "/healthz".to_string();
        c.health_interval_secs = 3600;

        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(c.clone());

        let cache = Arc::new(InMemoryCacheStore::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let health = Supervisor::new(crate::http::client::create_client(), Duration::from_secs(1));
        health.start(&c);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!health.is_healthy(&c.id));

        let dispatcher = Dispatcher::new(registry, health, cache, logs, crate::http::client::create_client(), Duration::from_secs(5));

        let resp = dispatcher.dispatch(inbound("things", "echo")).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
