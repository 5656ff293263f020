//! # Compose Gateway - Core Library Crate
//!
//! An HTTP API gateway that fronts a set of named backend services. Each request is
//! routed by base path to a service, load balanced across its targets, optionally
//! reshaped by transform rules, and, for JSON responses, enriched with data fetched
//! from dependent services.
//!
//! ## Module Map
//!
//! - [`core`]: configuration, the error type and the service registry
//! - [`expression`]: the JSON path expression language shared by transforms and enrichment
//! - [`load_balancing`]: round-robin and random target selection
//! - [`middleware`]: request and response transform rules
//! - [`enrichment`]: dependency fan-out and merging into the origin response
//! - [`proxy`]: per-service forwarding with retries
//! - [`aggregation`]: the multi-service `/aggregate` endpoint
//! - [`gateway`]: the Axum server tying it all together
//! - [`observability`]: structured logging and Prometheus metrics
//!
//! ## Rust Concepts Used
//!
//! - `pub use` re-exports build a flat public API at the crate root, so callers can
//!   write `compose_gateway::GatewayServer` instead of the full module path

/// Configuration, errors and the service registry
pub mod core;

/// JSON path expressions: parsing, reading and writing
pub mod expression;

/// Target selection for a service's backends
pub mod load_balancing;

/// Declarative request and response transforms
pub mod middleware;

/// Response enrichment from dependent services
pub mod enrichment;

/// Per-service reverse proxy
pub mod proxy;

/// Multi-service aggregation endpoint
pub mod aggregation;

/// HTTP server assembly
pub mod gateway;

/// Logging and metrics
pub mod observability;

pub use core::config::{
    DependencySpec, GatewayConfig, LoadBalancingStrategy, MappingRule, ServiceSpec, Surface,
};
pub use core::error::{GatewayError, GatewayResult};
pub use core::registry::{RegisteredService, ServiceRegistry};
pub use expression::PathExpr;
pub use gateway::server::{GatewayServer, GatewayState};
pub use load_balancing::LoadBalancer;
