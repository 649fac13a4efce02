//! HTTP server implementation: assembles controllers and middlewares into an
//! axum router and serves it with graceful shutdown.

use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use crate::controller::Controller;
use crate::middleware::Middleware;

/// Server trait for HTTP server operations.
#[async_trait::async_trait]
pub trait Server: Send + Sync {
    /// Starts the server (blocking).
    async fn listen_and_serve(&self) -> Result<()>;
    /// Returns the bound local address once the server has started. Used by
    /// tests to discover an ephemeral port.
    fn local_addr(&self) -> Option<SocketAddr>;
}

/// HTTP server implementation.
pub struct HttpServer {
    shutdown_token: CancellationToken,
    port: u16,
    router: Router,
    bound_addr: tokio::sync::Mutex<Option<SocketAddr>>,
}

impl HttpServer {
    /// Creates a new HTTP server.
    pub fn new(
        shutdown_token: CancellationToken,
        port: u16,
        controllers: Vec<Box<dyn Controller>>,
        middlewares: Vec<Box<dyn Middleware>>,
    ) -> Result<Arc<Self>> {
        let router = Self::build_router(controllers);
        let router = Self::merge_middlewares(router, middlewares);

        Ok(Arc::new(Self {
            shutdown_token,
            port,
            router,
            bound_addr: tokio::sync::Mutex::new(None),
        }))
    }

    /// Starts the HTTP server (async version).
    pub async fn listen_and_serve(&self) -> Result<()> {
        let addr: SocketAddr = format!("0.0.0.0:{}", self.port)
            .parse()
            .context("failed to parse server address")?;

        let listener = TcpListener::bind(&addr)
            .await
            .context("failed to bind TCP listener")?;

        let bound = listener.local_addr().context("failed to read bound address")?;
        *self.bound_addr.lock().await = Some(bound);

        info!(component = "server", event = "started", addr = %bound, "server started");

        let shutdown_token = self.shutdown_token.clone();
        let make_service = self
            .router
            .clone()
            .into_make_service_with_connect_info::<SocketAddr>();
        let serve_future = axum::serve(listener, make_service).with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        });

        if let Err(e) = serve_future.await {
            error!(component = "server", event = "listen_and_serve_failed", addr = %bound, error = %e, "server failed to listen and serve");
            return Err(e.into());
        }

        info!(component = "server", event = "stopped", addr = %bound, "server stopped");

        Ok(())
    }

    fn build_router(controllers: Vec<Box<dyn Controller>>) -> Router {
        let mut router = Router::new();
        for controller in controllers {
            router = controller.add_route(router);
        }
        router
    }

    /// Applies middlewares in reverse order (last registered wraps first),
    /// then CORS, response compression, and request-timeout layers closest
    /// to the transport.
    fn merge_middlewares(router: Router, middlewares: Vec<Box<dyn Middleware>>) -> Router {
        let mut result = router;

        for middleware in middlewares.iter().rev() {
            result = middleware.apply(result);
        }

        result
            .layer(CorsLayer::permissive())
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::new(Duration::from_secs(30)))
    }
}

#[async_trait::async_trait]
impl Server for HttpServer {
    async fn listen_and_serve(&self) -> Result<()> {
        HttpServer::listen_and_serve(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.bound_addr.try_lock().ok().and_then(|g| *g)
    }
}

#[async_trait::async_trait]
impl Server for Arc<HttpServer> {
    async fn listen_and_serve(&self) -> Result<()> {
        HttpServer::listen_and_serve(self).await
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        HttpServer::local_addr(self)
    }
}
