//! # Error Handling Module
//!
//! This module defines the gateway-wide error type using the `thiserror` crate and maps
//! each error category onto the HTTP status code a client should see.
//!
//! ## Rust Error Handling Concepts
//!
//! - `Result<T, E>` replaces exceptions: every fallible operation says so in its signature
//! - The `?` operator propagates an error to the caller
//! - `thiserror` derives `Display` and `std::error::Error` from the `#[error("...")]` attributes
//!
//! Failures that must never fail a whole request (a single dependency call, a single
//! transform rule) do not use this type; they are logged where they happen. Only
//! configuration problems, primary-backend exhaustion and internal failures surface
//! as a `GatewayError`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the gateway
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Error categories produced by the gateway itself
///
/// Backend application errors (any status code a backend returns) are relayed verbatim
/// and never become a `GatewayError`.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    /// Configuration-related errors (invalid config, missing files, rejected services)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Every attempt against a service's backends failed
    #[error("Service unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    /// No registered service is mounted at the requested path
    #[error("No service mounted at {path}")]
    RouteNotFound { path: String },

    /// Request validation errors (unreadable body, bad query parameters)
    #[error("Request validation failed: {field} - {reason}")]
    RequestValidation { field: String, reason: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl GatewayError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a service unavailable error
    pub fn service_unavailable<S: Into<String>, R: Into<String>>(service: S, reason: R) -> Self {
        Self::ServiceUnavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error for a named request field
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, reason: S) -> Self {
        Self::RequestValidation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Get the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestValidation { .. } => StatusCode::BAD_REQUEST,
            Self::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            Self::ServiceUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::RouteNotFound { .. } => "route_not_found",
            Self::RequestValidation { .. } => "request_validation_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Convert gateway errors into HTTP responses
///
/// Service unavailability uses the uniform `{"error": "Service unavailable"}` body so
/// clients see the same shape no matter which backend failed. Everything else gets a
/// structured error object.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = match self {
            Self::ServiceUnavailable { .. } => json!({ "error": "Service unavailable" }),
            ref other => json!({
                "error": {
                    "code": status.as_u16(),
                    "message": other.to_string(),
                    "type": other.error_type(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}
