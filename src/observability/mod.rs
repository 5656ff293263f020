// Metrics collection and Prometheus export
pub mod metrics;

// Structured logging
pub mod logging;

// Re-export commonly used types for convenience
pub use logging::init_logging;
pub use metrics::{install_prometheus_exporter, GatewayMetrics, MetricsError};
