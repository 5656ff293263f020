//! # Proxy Module
//!
//! Load-balanced forwarding to a service's backends with retries, path rewriting,
//! transform rules and response enrichment.

pub mod handler;

pub use handler::{forwardable_headers, is_json_content, rewrite_path, sniff_content_type, ProxyHandler};
