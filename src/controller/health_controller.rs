// Gateway liveness endpoint: `GET /health`.

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use crate::controller::Controller;

pub struct HealthController;

impl HealthController {
    pub fn new() -> Self {
        Self
    }

    async fn handle() -> Response {
        axum::Json(serde_json::json!({ "status": "ok" })).into_response()
    }
}

impl Default for HealthController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for HealthController {
    fn add_route(&self, router: Router) -> Router {
        router.route("/health", get(Self::handle))
    }
}
