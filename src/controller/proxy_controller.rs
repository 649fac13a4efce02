// Main proxy entrypoint: `ANY /proxy/:prefix/*path`.

use axum::extract::{ConnectInfo, Path};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::controller::Controller;
use crate::proxy::{Dispatcher, Inbound};

pub struct ProxyController {
    dispatcher: Arc<Dispatcher>,
}

impl ProxyController {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    async fn handle(
        &self,
        prefix: String,
        path: String,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        request: axum::extract::Request,
    ) -> Response {
        let method = request.method().to_string();
        let raw_query = request.uri().query().unwrap_or("").to_string();

        let headers: Vec<(String, String)> = request
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
            .collect();

        let client_ip = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("x-forwarded-for"))
            .map(|(_, v)| v.split(',').next().unwrap_or(v).trim().to_string())
            .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let body = match axum::body::to_bytes(request.into_body(), 10 << 20).await {
            Ok(b) => b,
            Err(_) => axum::body::Bytes::new(),
        };

        self.dispatcher
            .dispatch(Inbound {
                method,
                prefix,
                path,
                raw_query,
                headers,
                body,
                client_ip,
            })
            .await
    }
}

impl Controller for ProxyController {
    fn add_route(&self, router: Router) -> Router {
        let controller = Arc::new(Self {
            dispatcher: self.dispatcher.clone(),
        });

        router.route(
            "/proxy/:prefix/*path",
            any(move |Path((prefix, path)): Path<(String, String)>,
                      connect_info: Option<ConnectInfo<SocketAddr>>,
                      request: axum::extract::Request| {
                let controller = controller.clone();
                async move { controller.handle(prefix, path, connect_info, request).await }
            }),
        )
    }
}
