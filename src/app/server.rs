// HTTP server wiring: assembles the gateway's controllers and middlewares
// around a shared `Dispatcher` and tracks liveness for the app layer.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::controller::{Controller, HealthController, PrometheusMetricsController, ProxyController};
use crate::http::HttpServer as InnerHttpServer;
use crate::middleware::{Middleware, PanicRecoverMiddleware};
use crate::proxy::Dispatcher;

/// Wraps the generic `http::HttpServer` with the gateway's concrete
/// controller/middleware list and a liveness flag the app layer can poll.
pub struct HttpServer {
    server: Arc<InnerHttpServer>,
    is_alive: Arc<AtomicBool>,
}

impl HttpServer {
    pub fn new(
        shutdown_token: CancellationToken,
        port: u16,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self> {
        let controllers = Self::controllers(dispatcher);
        let middlewares = Self::middlewares();

        let server = InnerHttpServer::new(shutdown_token, port, controllers, middlewares)?;

        Ok(Self {
            server,
            is_alive: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.is_alive.load(Ordering::Relaxed)
    }

    pub async fn listen_and_serve(&self) -> Result<()> {
        self.is_alive.store(true, Ordering::Relaxed);
        let result = self.server.listen_and_serve().await;
        self.is_alive.store(false, Ordering::Relaxed);
        result
    }

    fn controllers(dispatcher: Arc<Dispatcher>) -> Vec<Box<dyn Controller>> {
        vec![
            Box::new(HealthController::new()),
            Box::new(PrometheusMetricsController::new()),
            Box::new(ProxyController::new(dispatcher)),
        ]
    }

    /// Executed in reverse registration order, so panic recovery ends up
    /// outermost.
    fn middlewares() -> Vec<Box<dyn Middleware>> {
        vec![Box::new(PanicRecoverMiddleware::new())]
    }
}
