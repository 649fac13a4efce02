//! Prometheus text exposition for the gateway's request-plane counters.

use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};

use crate::controller::Controller;
use crate::metrics;

pub const PROMETHEUS_METRICS_PATH: &str = "/metrics";

fn format_prometheus_metrics() -> String {
    let mut output = String::with_capacity(1024);

    output.push_str("# HELP requests_total Total number of proxied requests\n");
    output.push_str("# TYPE requests_total counter\n");
    output.push_str("requests_total ");
    output.push_str(&metrics::requests_total().to_string());
    output.push('\n');

    output.push_str("# HELP cache_hits_total Total number of cache hits\n");
    output.push_str("# TYPE cache_hits_total counter\n");
    output.push_str("cache_hits_total ");
    output.push_str(&metrics::cache_hits().to_string());
    output.push('\n');

    output.push_str("# HELP cache_misses_total Total number of cache misses\n");
    output.push_str("# TYPE cache_misses_total counter\n");
    output.push_str("cache_misses_total ");
    output.push_str(&metrics::cache_misses().to_string());
    output.push('\n');

    output.push_str("# HELP upstream_errors_total Total number of failed upstream forwards\n");
    output.push_str("# TYPE upstream_errors_total counter\n");
    output.push_str("upstream_errors_total ");
    output.push_str(&metrics::upstream_errors_total().to_string());
    output.push('\n');

    output.push_str("# HELP resp_status_total Total number of responses by status code\n");
    output.push_str("# TYPE resp_status_total counter\n");
    for (code, count) in metrics::status_code_snapshot() {
        output.push_str("resp_status_total{code=\"");
        output.push_str(&code.to_string());
        output.push_str("\"} ");
        output.push_str(&count.to_string());
        output.push('\n');
    }

    output
}

/// Serves Prometheus-format text exposition of the gateway's counters.
pub struct PrometheusMetricsController;

impl PrometheusMetricsController {
    pub fn new() -> Self {
        Self
    }

    async fn get_metrics() -> impl IntoResponse {
        (
            StatusCode::OK,
            [("content-type", "text/plain; charset=utf-8")],
            format_prometheus_metrics(),
        )
    }
}

impl Default for PrometheusMetricsController {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller for PrometheusMetricsController {
    fn add_route(&self, router: Router) -> Router {
        router.route(PROMETHEUS_METRICS_PATH, get(Self::get_metrics))
    }
}
