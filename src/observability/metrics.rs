//! # Metrics Collection
//!
//! Gateway metrics are recorded through the `metrics` facade and exported in Prometheus
//! format when an exporter is installed. Without an exporter every call is a no-op, which
//! is what tests rely on.
//!
//! [`GatewayMetrics`] is created once per gateway instance and handed to the components
//! that record into it; there is no process-wide collector object.
//!
//! ## Usage Example
//! ```rust,ignore
//! let metrics = GatewayMetrics::new();
//! metrics.record_request("users", "GET", 200, started.elapsed());
//! ```

use metrics::{Counter, Histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while setting up metrics export
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Failed to initialize metrics exporter: {0}")]
    InitializationError(String),
}

/// Latency buckets in seconds shared by the request histograms
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Install the Prometheus recorder and serve `/metrics` on `addr`
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), LATENCY_BUCKETS)
        .map_err(|e| MetricsError::InitializationError(format!("Failed to set histogram buckets: {}", e)))?
        .install()
        .map_err(|e| MetricsError::InitializationError(e.to_string()))
}

/// Owned handle to the gateway's metrics
#[derive(Clone)]
pub struct GatewayMetrics {
    // Retry metrics
    pub retry_count: Counter,
    pub exhausted_count: Counter,

    // Enrichment metrics
    pub enrichment_jobs: Counter,
    pub enrichment_failures: Counter,
    pub enrichment_duration: Histogram,
    pub origin_parse_failures: Counter,

    // Aggregation metrics
    pub aggregate_requests: Counter,
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayMetrics {
    /// Register the standard gateway metrics
    pub fn new() -> Self {
        Self {
            retry_count: metrics::counter!("gateway_upstream_retries_total"),
            exhausted_count: metrics::counter!("gateway_upstream_exhausted_total"),

            enrichment_jobs: metrics::counter!("gateway_enrichment_jobs_total"),
            enrichment_failures: metrics::counter!("gateway_enrichment_failures_total"),
            enrichment_duration: metrics::histogram!("gateway_enrichment_duration_seconds"),
            origin_parse_failures: metrics::counter!("gateway_enrichment_origin_parse_failures_total"),

            aggregate_requests: metrics::counter!("gateway_aggregate_requests_total"),
        }
    }

    /// Record one completed client request
    pub fn record_request(&self, service: &str, method: &str, status_code: u16, duration: Duration) {
        let service_owned = service.to_string();
        let method_owned = method.to_string();
        let status_code_owned = status_code.to_string();

        metrics::counter!("gateway_requests_total", "service" => service_owned.clone(), "method" => method_owned.clone(), "status_code" => status_code_owned.clone()).increment(1);
        metrics::histogram!("gateway_request_duration_seconds", "service" => service_owned.clone(), "method" => method_owned.clone())
            .record(duration.as_secs_f64());

        if status_code >= 500 {
            metrics::counter!("gateway_errors_total", "service" => service_owned, "method" => method_owned, "status_code" => status_code_owned).increment(1);
        }
    }

    /// Record one attempt against a backend target
    pub fn record_upstream_attempt(&self, service: &str, outcome: &'static str, duration: Duration) {
        let service_owned = service.to_string();

        metrics::counter!("gateway_upstream_requests_total", "service" => service_owned.clone(), "outcome" => outcome).increment(1);
        metrics::histogram!("gateway_upstream_request_duration_seconds", "service" => service_owned)
            .record(duration.as_secs_f64());
    }

    pub fn record_retry(&self) {
        self.retry_count.increment(1);
    }

    pub fn record_exhausted(&self) {
        self.exhausted_count.increment(1);
    }

    /// Record the outcome of one enrichment job
    pub fn record_enrichment_job(&self, succeeded: bool) {
        self.enrichment_jobs.increment(1);
        if !succeeded {
            self.enrichment_failures.increment(1);
        }
    }
}
