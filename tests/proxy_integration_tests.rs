//! # Proxy Integration Tests
//!
//! Drives the full gateway router against wiremock backends:
//! - round-robin distribution across targets
//! - base path stripping and query forwarding
//! - static headers and request/response transforms
//! - retry budget, shared deadline and the 502 on exhaustion
//! - relaying of non-2xx backend responses

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use compose_gateway::core::config::{MappingRule, ServiceSpec, Surface};
use compose_gateway::{GatewayConfig, GatewayServer};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UNREACHABLE: &str = "http://127.0.0.1:1";

fn build_gateway(services: Vec<ServiceSpec>) -> (GatewayServer, TestServer) {
    let config = GatewayConfig {
        services,
        ..Default::default()
    };
    let gateway = GatewayServer::new(config).unwrap();
    let server = TestServer::new(gateway.router()).unwrap();
    (gateway, server)
}

fn service(name: &str, base_path: &str, targets: Vec<String>) -> ServiceSpec {
    let mut spec = ServiceSpec::new(name, base_path, targets);
    spec.retry_delay = Duration::from_millis(10);
    spec.timeout = Duration::from_secs(5);
    spec
}

/// Test that requests alternate between targets
#[tokio::test]
async fn test_round_robin_distribution() {
    let backend_a = MockServer::start().await;
    let backend_b = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"backend": "a"})))
        .expect(2)
        .mount(&backend_a)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/users/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"backend": "b"})))
        .expect(2)
        .mount(&backend_b)
        .await;

    let (_gateway, server) = build_gateway(vec![service(
        "users",
        "/api/users",
        vec![backend_a.uri(), backend_b.uri()],
    )]);

    let mut seen = Vec::new();
    for _ in 0..4 {
        let response = server.get("/api/users/ping").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        seen.push(body["backend"].as_str().unwrap().to_string());
    }

    assert_eq!(seen, vec!["a", "b", "a", "b"]);
}

/// Test base path stripping with query forwarding
#[tokio::test]
async fn test_strip_base_path() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/123"))
        .and(query_param("expand", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 123})))
        .expect(1)
        .mount(&backend)
        .await;

    let mut spec = service("users", "/api/users", vec![backend.uri()]);
    spec.strip_base_path = true;
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server
        .get("/api/users/123")
        .add_query_param("expand", "true")
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"id": 123}));
}

/// Test that the full path is forwarded when stripping is off
#[tokio::test]
async fn test_path_preserved_without_strip() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/users/123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 123})))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = build_gateway(vec![service("users", "/api/users", vec![backend.uri()])]);

    let response = server.get("/api/users/123").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

/// Test that the longest matching base path wins
#[tokio::test]
async fn test_longest_prefix_dispatch() {
    let general = MockServer::start().await;
    let admin = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"service": "admin"})))
        .expect(1)
        .mount(&admin)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"service": "general"})))
        .expect(0)
        .mount(&general)
        .await;

    let (_gateway, server) = build_gateway(vec![
        service("api", "/api", vec![general.uri()]),
        service("admin", "/api/admin", vec![admin.uri()]),
    ]);

    let response = server.get("/api/admin/settings").await;
    assert_eq!(response.json::<Value>()["service"], "admin");
}

/// Test that static headers override client-supplied values
#[tokio::test]
async fn test_static_headers_override_client() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .and(header("x-service", "gateway"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&backend)
        .await;

    let mut spec = service("users", "/api/users", vec![backend.uri()]);
    spec.static_headers
        .insert("X-Service".to_string(), "gateway".to_string());
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server
        .get("/api/users/me")
        .add_header(
            HeaderName::from_static("x-service"),
            HeaderValue::from_static("client"),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

/// Test that the request body is forwarded on POST
#[tokio::test]
async fn test_post_body_forwarded() {
    let backend = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(body_json(json!({"name": "Ann"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1, "name": "Ann"})))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = build_gateway(vec![service("users", "/api/users", vec![backend.uri()])]);

    let response = server.post("/api/users").json(&json!({"name": "Ann"})).await;

    assert_eq!(response.status_code(), StatusCode::CREATED);
    assert_eq!(response.json::<Value>()["id"], 1);
}

/// Test query, header and body request transform rules
#[tokio::test]
async fn test_request_transform_rules() {
    let backend = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/orders"))
        .and(query_param("tenant_id", "public"))
        .and(header("authorization", "ApiKey abc"))
        .and(body_json(json!({"customer": {"id": 42}, "customer_id": 42})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&backend)
        .await;

    let mut spec = service("orders", "/api/orders", vec![backend.uri()]);
    spec.request_transform = vec![
        MappingRule::new("tenant", "tenant_id")
            .on(Surface::Query)
            .with_default(json!("public")),
        MappingRule::new("x-api-key", "authorization")
            .on(Surface::Header)
            .with_template("ApiKey {value|trim}"),
        MappingRule::new("customer.id", "customer_id"),
    ];
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server
        .post("/api/orders")
        .add_header(
            HeaderName::from_static("x-api-key"),
            HeaderValue::from_static("abc"),
        )
        .json(&json!({"customer": {"id": 42}}))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
}

/// Test response transform rules on a JSON response
#[tokio::test]
async fn test_response_transform_rules() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"meta": {"requestId": "r-1"}})))
        .mount(&backend)
        .await;

    let mut spec = service("orders", "/api/orders", vec![backend.uri()]);
    spec.response_transform = vec![MappingRule::new("meta.requestId", "request_id")];
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server.get("/api/orders/1").await;
    let body: Value = response.json();

    assert_eq!(body["request_id"], "r-1");
    assert_eq!(body["meta"]["requestId"], "r-1");
}

/// Test that response transform rules also apply to JSON error bodies
#[tokio::test]
async fn test_response_transform_on_error_status() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"meta": {"requestId": "r-1"}, "id": 5})),
        )
        .expect(1)
        .mount(&backend)
        .await;

    let mut spec = service("orders", "/api/orders", vec![backend.uri()]);
    spec.response_transform = vec![MappingRule::new("meta.requestId", "request_id")];
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server.get("/api/orders/5").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["request_id"], "r-1");
    assert_eq!(body["id"], 5);
}

/// Test that backend error statuses are relayed without retrying
#[tokio::test]
async fn test_backend_error_status_relayed() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "no such user"})))
        .expect(1)
        .mount(&backend)
        .await;

    let (_gateway, server) = build_gateway(vec![service("users", "/api/users", vec![backend.uri()])]);

    let response = server.get("/api/users/999").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>(), json!({"error": "no such user"}));
}

/// Test that a 5xx response also ends the attempt loop
#[tokio::test]
async fn test_server_error_not_retried() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&backend)
        .await;

    let (gateway, server) = build_gateway(vec![service("users", "/api/users", vec![backend.uri()])]);

    let response = server.get("/api/users").await;

    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text(), "maintenance");
    let users = gateway.state().registry().get("users").unwrap();
    assert_eq!(users.balancer.selections(), 1);
}

/// Test the retry budget against an unreachable target
#[tokio::test]
async fn test_retry_exhaustion_returns_bad_gateway() {
    let mut spec = service("users", "/api/users", vec![UNREACHABLE.to_string()]);
    spec.retry_count = 3;
    spec.retry_delay = Duration::from_millis(50);
    let (gateway, server) = build_gateway(vec![spec]);

    let started = Instant::now();
    let response = server.get("/api/users/1").await;
    let elapsed = started.elapsed();

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.json::<Value>(), json!({"error": "Service unavailable"}));
    assert!(elapsed >= Duration::from_millis(150), "elapsed {:?}", elapsed);

    let users = gateway.state().registry().get("users").unwrap();
    assert_eq!(users.balancer.selections(), 4);
}

/// Test the bare 502 returned to browsers
#[tokio::test]
async fn test_retry_exhaustion_for_html_clients() {
    let mut spec = service("users", "/api/users", vec![UNREACHABLE.to_string()]);
    spec.retry_count = 0;
    let (_gateway, server) = build_gateway(vec![spec]);

    let response = server
        .get("/api/users/1")
        .add_header(
            HeaderName::from_static("accept"),
            HeaderValue::from_static("text/html,application/xhtml+xml"),
        )
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(response.text().is_empty());
}

/// Test that a retry picks the next target and succeeds
#[tokio::test]
async fn test_retry_moves_to_next_target() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&backend)
        .await;

    let mut spec = service("users", "/api/users", vec![UNREACHABLE.to_string(), backend.uri()]);
    spec.retry_count = 1;
    let (gateway, server) = build_gateway(vec![spec]);

    let response = server.get("/api/users/1").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    let users = gateway.state().registry().get("users").unwrap();
    assert_eq!(users.balancer.selections(), 2);
}

/// Test that every attempt shares one deadline
#[tokio::test]
async fn test_deadline_shared_across_attempts() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&backend)
        .await;

    let mut spec = service("slow", "/slow", vec![backend.uri()]);
    spec.timeout = Duration::from_millis(300);
    spec.retry_count = 3;
    let (_gateway, server) = build_gateway(vec![spec]);

    let started = Instant::now();
    let response = server.get("/slow").await;

    assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    assert!(started.elapsed() < Duration::from_secs(2));
}

/// Test content type normalization for JSON and non-JSON bodies
#[tokio::test]
async fn test_content_type_recomputed() {
    let backend = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"a":1}"#, "text/plain"))
        .mount(&backend)
        .await;
    Mock::given(method("GET"))
        .and(path("/text"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("plain words", "text/plain"))
        .mount(&backend)
        .await;

    let (_gateway, server) = build_gateway(vec![service("files", "/", vec![backend.uri()])]);

    let json_response = server.get("/json").await;
    assert_eq!(
        json_response.header("content-type"),
        "application/json; charset=utf-8"
    );

    let text_response = server.get("/text").await;
    assert_eq!(text_response.header("content-type"), "text/plain");
    assert_eq!(text_response.text(), "plain words");
}

/// Test the health endpoint
#[tokio::test]
async fn test_health_endpoint() {
    let (_gateway, server) = build_gateway(vec![
        service("users", "/api/users", vec![UNREACHABLE.to_string()]),
        service("orders", "/api/orders", vec![UNREACHABLE.to_string()]),
    ]);

    let response = server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.json::<Value>(), json!({"status": "healthy", "services": 2}));
}

/// Test that invalid services are left out of the registry
#[tokio::test]
async fn test_invalid_service_not_registered() {
    let (_gateway, server) = build_gateway(vec![
        service("users", "/api/users", vec![UNREACHABLE.to_string()]),
        service("broken", "/api/broken", vec![]),
    ]);

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["services"], 1);

    let response = server.get("/api/broken/1").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

/// Test that unmatched paths return 404
#[tokio::test]
async fn test_unknown_path_not_found() {
    let (_gateway, server) = build_gateway(vec![service("users", "/api/users", vec![UNREACHABLE.to_string()])]);

    let response = server.get("/api/usersettings").await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], 404);
}
