// HTTP controllers for the gateway's own surface: the proxy entrypoint,
// liveness, and Prometheus metrics exposition.

pub mod controller;
pub mod health_controller;
pub mod metrics;
pub mod proxy_controller;

pub use controller::Controller;
pub use health_controller::HealthController;
pub use metrics::PrometheusMetricsController;
pub use proxy_controller::ProxyController;
