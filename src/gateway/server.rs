//! # HTTP Server Module
//!
//! Assembles the gateway: one shared `reqwest::Client`, the service registry, one
//! [`ProxyHandler`] per service, the enrichment engine and the aggregator. These are
//! exposed through an Axum router:
//!
//! - `GET /health`: liveness and the number of registered services
//! - `GET|POST /aggregate`: multi-service aggregation
//! - everything else: dispatched by longest base-path match to that service's handler
//!
//! ## Rust Concepts Used
//!
//! - `Arc<T>` for sharing server state across async tasks
//! - `async/await` for non-blocking I/O operations
//! - `tokio::net::TcpListener` for accepting incoming connections
//! - Axum's `fallback` so any method and any sub-path reaches the proxy

use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::aggregation::Aggregator;
use crate::core::config::GatewayConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::registry::ServiceRegistry;
use crate::enrichment::EnrichmentEngine;
use crate::observability::GatewayMetrics;
use crate::proxy::ProxyHandler;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct GatewayState {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    registry: Arc<ServiceRegistry>,
    handlers: HashMap<String, Arc<ProxyHandler>>,
    enrichment: Arc<EnrichmentEngine>,
    aggregator: Aggregator,
}

impl GatewayState {
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.inner.registry
    }

    /// The engine used by proxy handlers, usable on its own for already-fetched bodies
    pub fn enrichment(&self) -> &Arc<EnrichmentEngine> {
        &self.inner.enrichment
    }

    pub fn handler(&self, service: &str) -> Option<&Arc<ProxyHandler>> {
        self.inner.handlers.get(service)
    }
}

/// The assembled gateway
pub struct GatewayServer {
    config: GatewayConfig,
    state: GatewayState,
    app: Router,
}

impl GatewayServer {
    /// Build the gateway with a fresh metrics handle
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        Self::with_metrics(config, GatewayMetrics::new())
    }

    /// Build the gateway around an existing metrics handle
    pub fn with_metrics(config: GatewayConfig, metrics: GatewayMetrics) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::internal(format!("Failed to build HTTP client: {}", e)))?;

        let registry = Arc::new(ServiceRegistry::load(config.services.clone()));
        if registry.is_empty() {
            info!("⚠️  No services registered, only /health and /aggregate will respond");
        }

        let enrichment = Arc::new(EnrichmentEngine::new(
            client.clone(),
            Arc::clone(&registry),
            config.enrichment.clone(),
            metrics.clone(),
        ));

        let handlers: HashMap<String, Arc<ProxyHandler>> = registry
            .services()
            .map(|service| {
                let handler = ProxyHandler::new(
                    Arc::clone(service),
                    client.clone(),
                    Arc::clone(&enrichment),
                    metrics.clone(),
                    config.server.max_body_size,
                );
                (service.name().to_string(), Arc::new(handler))
            })
            .collect();

        let aggregator = Aggregator::new(
            client,
            Arc::clone(&registry),
            metrics,
            config.server.max_body_size,
        );

        let state = GatewayState {
            inner: Arc::new(GatewayInner {
                registry,
                handlers,
                enrichment,
                aggregator,
            }),
        };

        let app = Router::new()
            .route("/health", get(health_check))
            .route("/aggregate", get(aggregate).post(aggregate))
            .fallback(proxy_request)
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        Ok(Self { config, state, app })
    }

    /// The Axum router, for serving or for driving in tests
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn state(&self) -> &GatewayState {
        &self.state
    }

    /// Gateway bind address from configuration
    pub fn bind_addr(&self) -> GatewayResult<SocketAddr> {
        let raw = format!("{}:{}", self.config.server.bind_address, self.config.server.port);
        raw.parse()
            .map_err(|e| GatewayError::config(format!("Invalid bind address {}: {}", raw, e)))
    }

    /// Serve until `shutdown` resolves
    pub async fn start<F>(self, shutdown: F) -> GatewayResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.bind_addr()?;
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| GatewayError::internal(format!("Failed to bind gateway server to {}: {}", bind_addr, e)))?;

        info!("🌐 Gateway HTTP server listening on {}", bind_addr);

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| GatewayError::internal(format!("Gateway server error: {}", e)))
    }
}

/// Health check handler
async fn health_check(State(state): State<GatewayState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "services": state.registry().len(),
        })),
    )
}

async fn aggregate(State(state): State<GatewayState>, request: Request<Body>) -> Response {
    state.inner.aggregator.handle(request).await
}

/// Dispatch to the service mounted at the longest matching base path
async fn proxy_request(State(state): State<GatewayState>, request: Request<Body>) -> Response {
    let path = request.uri().path().to_string();

    let handler = state
        .registry()
        .find_by_path(&path)
        .and_then(|service| state.handler(service.name()).cloned());

    match handler {
        Some(handler) => handler.handle(request).await,
        None => {
            debug!(path = %path, "No service mounted at path");
            GatewayError::RouteNotFound { path }.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ServiceSpec;
    use tower::ServiceExt;

    fn config_with(services: Vec<ServiceSpec>) -> GatewayConfig {
        GatewayConfig {
            services,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_creation() {
        let mut config = config_with(vec![ServiceSpec::new(
            "users",
            "/api/users",
            vec!["http://127.0.0.1:9".to_string()],
        )]);
        config.server.bind_address = "127.0.0.1".to_string();
        config.server.port = 0;

        let server = GatewayServer::new(config).unwrap();
        assert_eq!(server.bind_addr().unwrap().ip().to_string(), "127.0.0.1");
        assert_eq!(server.state().registry().len(), 1);
        assert!(server.state().handler("users").is_some());
    }

    #[tokio::test]
    async fn test_invalid_bind_address() {
        let mut config = config_with(vec![]);
        config.server.bind_address = "not an address".to_string();

        let server = GatewayServer::new(config).unwrap();
        assert!(server.bind_addr().is_err());
    }

    #[tokio::test]
    async fn test_health_and_fallback_routes() {
        let server = GatewayServer::new(config_with(vec![ServiceSpec::new(
            "users",
            "/api/users",
            vec!["http://127.0.0.1:9".to_string()],
        )]))
        .unwrap();

        let health = server
            .router()
            .oneshot(axum::http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(health.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"status": "healthy", "services": 1}));

        let missing = server
            .router()
            .oneshot(axum::http::Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
