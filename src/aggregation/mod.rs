//! # Multi-Service Aggregation
//!
//! `GET|POST /aggregate?services=a,b&endpoint=/path` calls every named service
//! concurrently and returns one document keyed by service name:
//!
//! ```json
//! {
//!   "services": {
//!     "users":  { "service": "users",  "status": 200, "data": { ... } },
//!     "orders": { "service": "orders", "status": 503, "data": null, "error": "Request failed: ..." }
//!   },
//!   "timestamp": 1700000000
//! }
//! ```
//!
//! Unknown service names are skipped. A backend body that is not a JSON object is
//! wrapped as `{"raw": "<body>"}`.

use axum::body::Body;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::core::error::GatewayError;
use crate::core::registry::{RegisteredService, ServiceRegistry};
use crate::observability::GatewayMetrics;
use crate::proxy::forwardable_headers;

/// Result of calling one service
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ServiceResult {
    pub service: String,
    pub status: u16,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Serves the `/aggregate` endpoint
pub struct Aggregator {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    metrics: GatewayMetrics,
    max_body_size: usize,
}

impl Aggregator {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<ServiceRegistry>,
        metrics: GatewayMetrics,
        max_body_size: usize,
    ) -> Self {
        Self {
            client,
            registry,
            metrics,
            max_body_size,
        }
    }

    /// Handle one aggregate request
    #[instrument(skip_all, fields(method = %request.method()))]
    pub async fn handle(&self, request: Request<Body>) -> Response {
        self.metrics.aggregate_requests.increment(1);
        let (parts, body) = request.into_parts();

        let params: Vec<(String, String)> = parts
            .uri
            .query()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        let param = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let Some(names) = param("services") else {
            return GatewayError::validation("services", "services parameter is required").into_response();
        };
        let endpoint = param("endpoint").unwrap_or_else(|| "/".to_string());

        let body = if parts.method == Method::POST || parts.method == Method::PUT {
            match axum::body::to_bytes(body, self.max_body_size).await {
                Ok(bytes) => bytes,
                Err(e) => return GatewayError::validation("body", e.to_string()).into_response(),
            }
        } else {
            Bytes::new()
        };

        let services: Vec<Arc<RegisteredService>> = names
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| {
                let found = self.registry.get(name);
                if found.is_none() {
                    debug!(service = %name, "Skipping unknown service in aggregate request");
                }
                found
            })
            .collect();

        let results = join_all(
            services
                .iter()
                .map(|service| self.call_service(service, &parts.method, &endpoint, &parts.headers, &body)),
        )
        .await;

        let services: BTreeMap<String, ServiceResult> = results
            .into_iter()
            .map(|result| (result.service.clone(), result))
            .collect();

        (
            StatusCode::OK,
            Json(json!({
                "services": services,
                "timestamp": chrono::Utc::now().timestamp(),
            })),
        )
            .into_response()
    }

    async fn call_service(
        &self,
        service: &RegisteredService,
        method: &Method,
        endpoint: &str,
        inbound_headers: &HeaderMap,
        body: &Bytes,
    ) -> ServiceResult {
        let spec = &service.spec;
        let (path, query) = match endpoint.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (endpoint, None),
        };
        let url = service.next_url(path, query);

        let mut headers = forwardable_headers(inbound_headers, false);
        for (name, value) in &spec.static_headers {
            match (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(service = %spec.name, header = %name, "Skipping invalid static header"),
            }
        }

        let mut request = self
            .client
            .request(method.clone(), url)
            .headers(headers)
            .timeout(spec.timeout);
        if !body.is_empty() {
            request = request.body(body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(service = %spec.name, error = %e, "Aggregate call failed");
                return ServiceResult {
                    service: spec.name.clone(),
                    status: StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                    data: Value::Null,
                    error: Some(format!("Request failed: {}", e)),
                };
            }
        };

        let status = response.status().as_u16();
        match response.bytes().await {
            Ok(bytes) => ServiceResult {
                service: spec.name.clone(),
                status,
                data: wrap_body(&bytes),
                error: None,
            },
            Err(e) => ServiceResult {
                service: spec.name.clone(),
                status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                data: Value::Null,
                error: Some(format!("Failed to read response: {}", e)),
            },
        }
    }
}

/// JSON objects pass through; anything else is wrapped as `{"raw": text}`
fn wrap_body(bytes: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            let mut raw = Map::new();
            raw.insert("raw".to_string(), Value::String(String::from_utf8_lossy(bytes).into_owned()));
            Value::Object(raw)
        }
    }
}
