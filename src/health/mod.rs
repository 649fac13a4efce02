// Per-collection upstream health checking.
//
// One background task per collection with a configured `health_path`, doing
// an immediate GET followed by a fixed-interval GET loop. Absence of a probe
// for an id means "not configured, treat as healthy" -- callers must not
// distinguish "never checked" from "healthy".

use dashmap::DashMap;
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http::client::HyperClient;
use crate::registry::Collection;

const DEFAULT_INTERVAL_SECS: u64 = 30;

struct ProbeHandle {
    healthy: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl Drop for ProbeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Contract consumed by the proxy dispatcher's admission check.
#[async_trait::async_trait]
pub trait HealthSupervisor: Send + Sync {
    /// Starts (or, if one already exists, replaces) the probe for `collection`.
    /// A no-op if the collection has no `health_path`.
    fn start(&self, collection: &Collection);
    /// Cancels and removes the probe for `id`, if any.
    fn stop(&self, id: &str);
    /// Non-blocking; `true` if the collection is healthy or has no probe.
    fn is_healthy(&self, id: &str) -> bool;
}

/// `DashMap`-backed supervisor: concurrent `is_healthy` reads, exclusive
/// `start`/`stop` per entry via the map's own sharded locking.
pub struct Supervisor {
    probes: DashMap<String, ProbeHandle>,
    client: HyperClient,
    timeout: Duration,
}

impl Supervisor {
    pub fn new(client: HyperClient, timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            probes: DashMap::new(),
            client,
            timeout,
        })
    }

    /// Seeds probes for every collection that declares a `health_path`,
    /// called once at startup from the registry's snapshot.
    pub fn bootstrap(self: &Arc<Self>, collections: &[Collection]) {
        for c in collections {
            if c.has_health_check() {
                self.start(c);
            }
        }
    }

    async fn probe_once(client: &HyperClient, url: &str, timeout: Duration) -> bool {
        let req = match hyper::Request::get(url).body(Empty::<Bytes>::new().boxed()) {
            Ok(r) => r,
            Err(e) => {
                warn!(component = "health", event = "build_request_failed", url, error = %e, "failed to build probe request");
                return false;
            }
        };

        match tokio::time::timeout(timeout, client.request(req)).await {
            Ok(Ok(resp)) => {
                let status = resp.status().as_u16();
                (200..300).contains(&status)
            }
            Ok(Err(e)) => {
                debug!(component = "health", event = "probe_failed", url, error = %e, "probe request failed");
                false
            }
            Err(_) => {
                debug!(component = "health", event = "probe_timeout", url, "probe timed out");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl HealthSupervisor for Supervisor {
    fn start(&self, collection: &Collection) {
        if !collection.has_health_check() {
            return;
        }

        let url = format!("{}{}", collection.base_url, collection.health_path);
        let interval_secs = if collection.health_interval_secs == 0 {
            DEFAULT_INTERVAL_SECS
        } else {
            collection.health_interval_secs
        };

        let healthy = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        // Replace-not-stack: inserting under the same key drops (and thus
        // cancels) any previously running probe for this id.
        self.probes.insert(
            collection.id.clone(),
            ProbeHandle {
                healthy: healthy.clone(),
                cancel: cancel.clone(),
            },
        );

        let client = self.client.clone();
        let probe_timeout = self.timeout;
        let id = collection.id.clone();

        tokio::task::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                let ok = Supervisor::probe_once(&client, &url, probe_timeout).await;
                healthy.store(ok, Ordering::Relaxed);
                debug!(component = "health", event = "probe_result", collection_id = %id, healthy = ok, url = %url, "probe completed");

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(component = "health", event = "probe_stopped", collection_id = %id, "probe task stopped");
                        return;
                    }
                    _ = ticker.tick() => {}
                }
            }
        });
    }

    fn stop(&self, id: &str) {
        self.probes.remove(id);
    }

    fn is_healthy(&self, id: &str) -> bool {
        match self.probes.get(id) {
            Some(handle) => handle.healthy.load(Ordering::Relaxed),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_probe_is_treated_as_healthy() {
        let sup = Supervisor::new(crate::http::client::create_client(), Duration::from_secs(1));
        assert!(sup.is_healthy("nonexistent"));
    }

    #[test]
    fn start_with_empty_health_path_is_noop() {
        let sup = Supervisor::new(crate::http::client::create_client(), Duration::from_secs(1));
        let c = Collection::new("orders", "http://127.0.0.1:1");
        sup.start(&c);
        assert_eq!(sup.probes.len(), 0);
    }

    #[tokio::test]
    async fn start_twice_replaces_rather_than_stacking() {
        let sup = Supervisor::new(crate::http::client::create_client(), Duration::from_millis(50));
        let mut c = Collection::new("orders", "http://127.0.0.1:1");
        c.health_path = "/health".to_string();
        c.health_interval_secs = 3600;

        sup.start(&c);
        sup.start(&c);
        assert_eq!(sup.probes.len(), 1);
    }

    #[tokio::test]
    async fn stop_removes_probe_and_reverts_to_healthy_default() {
        let sup = Supervisor::new(crate::http::client::create_client(), Duration::from_millis(50));
        let mut c = Collection::new("orders", "http://127.0.0.1:1");
        c.health_path = "/health".to_string();
        c.health_interval_secs = 3600;

        sup.start(&c);
        sup.stop(&c.id);
        assert!(sup.is_healthy(&c.id));
    }
}
