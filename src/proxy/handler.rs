//! # Proxy Handler
//!
//! The per-service request entry point. One handler is built per registered service and
//! shared by every request routed to it.
//!
//! ## Request lifecycle
//!
//! 1. Buffer the inbound body so it can be replayed on retry
//! 2. Copy forwardable headers, apply static headers, run request transform rules
//! 3. Rewrite the path (optionally stripping the base path) and pick a target
//! 4. Send, retrying transport failures up to `retry_count` times after `retry_delay`,
//!    each retry re-picking a target; all attempts share one deadline from `timeout`
//! 5. Relay the backend status; for a JSON response of any status run response transform
//!    rules and, when the service has dependencies, enrichment
//! 6. Copy backend headers and recompute `Content-Type`
//!
//! Backend statuses (4xx and 5xx included) are relayed as-is. Only retry exhaustion
//! produces a gateway error.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::core::error::GatewayError;
use crate::core::registry::RegisteredService;
use crate::enrichment::EnrichmentEngine;
use crate::middleware::{OutboundRequest, TransformEngine};
use crate::observability::GatewayMetrics;

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Backend response after a successful attempt
struct BackendResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// Forwards requests for one service
pub struct ProxyHandler {
    service: Arc<RegisteredService>,
    client: reqwest::Client,
    static_headers: Vec<(HeaderName, HeaderValue)>,
    request_transform: TransformEngine,
    response_transform: TransformEngine,
    enrichment: Arc<EnrichmentEngine>,
    metrics: GatewayMetrics,
    max_body_size: usize,
}

impl ProxyHandler {
    pub fn new(
        service: Arc<RegisteredService>,
        client: reqwest::Client,
        enrichment: Arc<EnrichmentEngine>,
        metrics: GatewayMetrics,
        max_body_size: usize,
    ) -> Self {
        let spec = &service.spec;
        let static_headers = compile_static_headers(&spec.name, &spec.static_headers);
        let request_transform = TransformEngine::new(&spec.name, "request", &spec.request_transform);
        let response_transform = TransformEngine::new(&spec.name, "response", &spec.response_transform);

        Self {
            service,
            client,
            static_headers,
            request_transform,
            response_transform,
            enrichment,
            metrics,
            max_body_size,
        }
    }

    pub fn service(&self) -> &Arc<RegisteredService> {
        &self.service
    }

    /// Forward `request` to the service and build the client response
    #[instrument(
        skip_all,
        fields(service = %self.service.name(), method = %request.method(), path = %request.uri().path())
    )]
    pub async fn handle(&self, request: Request<Body>) -> Response {
        let started = Instant::now();
        let method = request.method().clone();
        let response = self.forward(request).await;

        self.metrics
            .record_request(self.service.name(), method.as_str(), response.status().as_u16(), started.elapsed());
        response
    }

    async fn forward(&self, request: Request<Body>) -> Response {
        let spec = &self.service.spec;
        let (parts, body) = request.into_parts();

        let body = match axum::body::to_bytes(body, self.max_body_size).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                return GatewayError::validation("body", e.to_string()).into_response();
            }
        };

        let auth_token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let mut outbound = OutboundRequest {
            headers: forwardable_headers(&parts.headers, false),
            query: parts.uri.query().map(str::to_string),
            body,
        };
        for (name, value) in &self.static_headers {
            outbound.headers.insert(name.clone(), value.clone());
        }
        self.request_transform.apply_request(&mut outbound);

        let path = rewrite_path(parts.uri.path(), &spec.base_path, spec.strip_base_path);
        debug!(original_path = %parts.uri.path(), rewritten_path = %path, "Rewrote request path");

        let backend = match self.send_with_retries(&parts.method, &path, &outbound).await {
            Ok(backend) => backend,
            Err(error) => {
                self.metrics.record_exhausted();
                let wants_html = parts
                    .headers
                    .get(header::ACCEPT)
                    .and_then(|value| value.to_str().ok())
                    .map_or(false, |accept| accept.contains("text/html"));

                if wants_html {
                    return StatusCode::BAD_GATEWAY.into_response();
                }
                return error.into_response();
            }
        };

        let BackendResponse {
            status,
            mut headers,
            mut body,
        } = backend;

        let backend_content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let is_json = backend_content_type
            .as_deref()
            .map_or(false, |ct| ct.contains("application/json"))
            || is_json_content(&body);

        if is_json {
            if !self.response_transform.is_empty() {
                let applied = self.response_transform.apply_response(&mut headers, &mut body);
                debug!(rules_applied = applied, "Applied response transform");
            }

            if !spec.dependencies.is_empty() {
                body = match self.enrichment.enrich(spec, body, &parts.headers, auth_token).await {
                    Ok(enriched) => enriched,
                    Err(e) => {
                        warn!(error = %e, "Enrichment skipped, returning original response");
                        e.into_original()
                    }
                };
            }
        }

        let mut response_headers = forwardable_headers(&headers, true);
        let content_type = if is_json {
            HeaderValue::from_static(JSON_CONTENT_TYPE)
        } else {
            backend_content_type
                .and_then(|ct| HeaderValue::from_str(&ct).ok())
                .unwrap_or_else(|| HeaderValue::from_static(sniff_content_type(&body)))
        };
        response_headers.insert(header::CONTENT_TYPE, content_type);

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        response
    }

    /// Run the retry loop; every attempt re-picks a target and shares one deadline
    async fn send_with_retries(
        &self,
        method: &axum::http::Method,
        path: &str,
        outbound: &OutboundRequest,
    ) -> Result<BackendResponse, GatewayError> {
        let spec = &self.service.spec;
        let deadline = tokio::time::Instant::now() + spec.timeout;
        let mut last_error = String::from("no attempt was made");

        for attempt in 0..=spec.retry_count {
            if attempt > 0 {
                self.metrics.record_retry();
                let wake = (tokio::time::Instant::now() + spec.retry_delay).min(deadline);
                tokio::time::sleep_until(wake).await;
                if tokio::time::Instant::now() >= deadline {
                    last_error = format!("deadline of {:?} exceeded", spec.timeout);
                    break;
                }
            }

            let url = self.service.next_url(path, outbound.query.as_deref());
            let attempt_started = Instant::now();
            info!(attempt = attempt, target_url = %url, "Forwarding to target");

            let call = async {
                let response = self
                    .client
                    .request(method.clone(), url.clone())
                    .headers(outbound.headers.clone())
                    .body(outbound.body.clone())
                    .send()
                    .await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await?;
                Ok::<_, reqwest::Error>(BackendResponse { status, headers, body })
            };

            match tokio::time::timeout_at(deadline, call).await {
                Ok(Ok(backend)) => {
                    self.metrics
                        .record_upstream_attempt(self.service.name(), "response", attempt_started.elapsed());
                    debug!(status = backend.status.as_u16(), attempt = attempt, "Received response from target");
                    return Ok(backend);
                }
                Ok(Err(e)) => {
                    self.metrics
                        .record_upstream_attempt(self.service.name(), "error", attempt_started.elapsed());
                    warn!(attempt = attempt, target_url = %url, error = %e, "Request to target failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    self.metrics
                        .record_upstream_attempt(self.service.name(), "timeout", attempt_started.elapsed());
                    warn!(attempt = attempt, target_url = %url, "Request deadline exceeded");
                    last_error = format!("deadline of {:?} exceeded", spec.timeout);
                    break;
                }
            }
        }

        warn!(error = %last_error, "All retry attempts failed");
        Err(GatewayError::service_unavailable(self.service.name(), last_error))
    }
}

/// Compute the backend path for `path` under `base_path`
///
/// With stripping, `/api/users/123` under `/api/users` becomes `/123`, and the base path
/// itself (with or without a trailing slash) becomes `/`.
pub fn rewrite_path(path: &str, base_path: &str, strip: bool) -> String {
    if !strip {
        return path.to_string();
    }

    let base = base_path.trim_end_matches('/');
    match path.strip_prefix(base) {
        Some("") | Some("/") => "/".to_string(),
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) => format!("/{}", rest),
        None => path.to_string(),
    }
}

/// Copy headers minus hop-by-hop headers, `Content-Length` and either `Host` (requests)
/// or `Content-Type` (responses, where it is recomputed)
pub fn forwardable_headers(headers: &HeaderMap, is_response: bool) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let skip = HOP_BY_HOP_HEADERS.contains(&name.as_str())
            || name == header::CONTENT_LENGTH
            || (!is_response && name == header::HOST)
            || (is_response && name == header::CONTENT_TYPE);
        if !skip {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// Whether the first non-whitespace byte opens a JSON object, array or string
pub fn is_json_content(body: &[u8]) -> bool {
    matches!(
        body.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[') | Some(b'"')
    )
}

/// Best-effort content type for a body the backend did not label
pub fn sniff_content_type(body: &[u8]) -> &'static str {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let head: Vec<u8> = body[start..].iter().take(14).map(u8::to_ascii_lowercase).collect();

    if head.starts_with(b"<!doctype html") || head.starts_with(b"<html") {
        return "text/html; charset=utf-8";
    }

    match std::str::from_utf8(body) {
        Ok(text) if !text.chars().any(|c| c.is_control() && !c.is_whitespace()) => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

fn compile_static_headers(
    service: &str,
    headers: &std::collections::HashMap<String, String>,
) -> Vec<(HeaderName, HeaderValue)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            match (HeaderName::from_str(name), HeaderValue::from_str(value)) {
                (Ok(name), Ok(value)) => Some((name, value)),
                _ => {
                    warn!(service = %service, header = %name, "Skipping invalid static header");
                    None
                }
            }
        })
        .collect()
}
