// Wires the gateway's collaborators together: registry, health supervisor,
// cache adapter, log sink, and the proxy dispatcher behind the HTTP server.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::{InMemoryCacheStore, RedisCacheStore, SharedCacheStore};
use crate::config::Config;
use crate::health::{HealthSupervisor, Supervisor};
use crate::http::client::create_client;
use crate::logsink::{InMemoryLogStore, SharedLogStore, SqlxLogStore};
use crate::proxy::Dispatcher;
use crate::registry::{InMemoryRegistry, Registry, SharedRegistry};

use super::server::HttpServer;

/// Top-level application state: every collaborator the dispatcher needs,
/// plus the HTTP server that fronts it.
pub struct App {
    shutdown_token: CancellationToken,
    registry: SharedRegistry,
    health: Arc<dyn HealthSupervisor>,
    server: Arc<HttpServer>,
}

impl App {
    /// Builds the gateway. Connects to Redis and Postgres up front -- a
    /// failure here is fatal at startup, matching a listener bind failure.
    pub async fn new(shutdown_token: CancellationToken, cfg: Config) -> Result<Self> {
        let registry: SharedRegistry = Arc::new(InMemoryRegistry::new());

        let cache: SharedCacheStore = if cfg.env == crate::config::TEST {
            Arc::new(InMemoryCacheStore::new())
        } else {
            match RedisCacheStore::connect(&cfg.redis.url()).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!(component = "app", event = "redis_connect_failed", error = %e, "falling back to in-memory cache store");
                    Arc::new(InMemoryCacheStore::new())
                }
            }
        };

        let logs: SharedLogStore = if cfg.env == crate::config::TEST {
            Arc::new(InMemoryLogStore::new())
        } else {
            let store = SqlxLogStore::connect(&cfg.database.url())
                .await
                .context("failed to connect to the log database")?;
            store
                .ensure_schema()
                .await
                .context("failed to ensure request_logs schema")?;
            Arc::new(store)
        };

        let client = create_client();
        let health = Supervisor::new(client.clone(), cfg.proxy.health_timeout);
        health.bootstrap(&registry.list_all().await);

        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            health.clone(),
            cache,
            logs,
            client,
            cfg.proxy.forward_timeout,
        ));

        let server = Arc::new(HttpServer::new(
            shutdown_token.clone(),
            cfg.server.port,
            dispatcher,
        )?);

        Ok(Self {
            shutdown_token,
            registry,
            health,
            server,
        })
    }

    /// Exposes the registry so a standalone deployment can seed collections
    /// without the (out-of-scope) admin surface.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub async fn serve(&self, gsh: Arc<crate::shutdown::GracefulShutdown>) -> Result<()> {
        let server = self.server.clone();
        let shutdown_token = self.shutdown_token.clone();

        tokio::task::spawn(async move {
            if let Err(e) = server.listen_and_serve().await {
                error!(component = "app", event = "serve_failed", error = %e, "server failed to serve");
            }
            shutdown_token.cancel();
            gsh.done();
        });

        info!(component = "app", event = "started", "application lifecycle");
        Ok(())
    }

    pub fn is_alive(&self) -> bool {
        self.server.is_alive()
    }

    pub fn health(&self) -> Arc<dyn HealthSupervisor> {
        self.health.clone()
    }
}
