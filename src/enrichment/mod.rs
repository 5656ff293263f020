//! # Response Enrichment
//!
//! Composes a service's JSON response with data fetched from its dependency services.
//!
//! For every dependency, each parameter mapping extracts one or more values from the
//! origin response. Every extracted value becomes one [`EnrichmentJob`]: a GET against
//! the dependency with the value substituted into its path template. Jobs run
//! concurrently (bounded per request) and merge their results back into the shared
//! origin tree through the dependency's result mappings.
//!
//! Enrichment is best-effort. A failing job is logged and dropped; the client still gets
//! every field of the original response. Only an origin body that is not a JSON object
//! is reported to the caller, together with the untouched original bytes.

pub mod engine;

use bytes::Bytes;
use thiserror::Error;

pub use engine::{plan_jobs, sweep_residual_keys, Drive, EnrichmentEngine, EnrichmentJob};

/// Failure of a single dependency call; never fails the client request
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("unknown dependency service '{0}'")]
    UnknownService(String),

    #[error("unresolved placeholder in dependency path '{0}'")]
    UnresolvedPlaceholder(String),

    #[error("invalid dependency URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("dependency request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("dependency returned status {status}: {preview}")]
    Status { status: u16, preview: String },

    #[error("dependency returned an HTML page instead of JSON")]
    HtmlBody,

    #[error("dependency returned malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Whole-response enrichment failure; carries the original bytes for pass-through
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("origin response is not a JSON object: {reason}")]
    OriginParse { reason: String, original: Bytes },

    #[error("failed to serialize enriched response: {reason}")]
    Serialize { reason: String, original: Bytes },
}

impl EnrichmentError {
    /// The unmodified origin body
    pub fn into_original(self) -> Bytes {
        match self {
            Self::OriginParse { original, .. } | Self::Serialize { original, .. } => original,
        }
    }
}
