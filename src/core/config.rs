//! # Configuration Module
//!
//! This module holds the gateway configuration model and its loading pipeline.
//!
//! ## Key Features
//! - YAML/JSON configuration parsing with serde
//! - Human-readable durations (`"30s"`, `"250ms"`) through `humantime-serde`
//! - Environment variable override support (`GATEWAY_<SECTION>_<FIELD>`)
//! - Gateway-level validation that reports every problem at once
//!
//! Per-service validation (empty target list, duplicate names…) is not done here: the
//! [`ServiceRegistry`](crate::core::registry::ServiceRegistry) rejects individual services
//! at load time so one bad entry does not take the whole gateway down.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::core::error::{GatewayError, GatewayResult};

/// Main gateway configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Log level and output format
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Dependency-call settings shared by every enrichment
    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    /// Backend services mounted on the gateway
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
}

impl GatewayConfig {
    /// Load configuration from a YAML or JSON file (chosen by extension)
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from YAML text without applying overrides
    pub fn from_yaml_str(content: &str) -> GatewayResult<Self> {
        serde_yaml::from_str(content).map_err(|e| GatewayError::config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from JSON text without applying overrides
    pub fn from_json_str(content: &str) -> GatewayResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| GatewayError::config(format!("Failed to parse JSON config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: GATEWAY_<SECTION>_<FIELD>
    /// For example: GATEWAY_SERVER_PORT=8080
    pub fn apply_env_overrides(&mut self) -> GatewayResult<()> {
        use std::env;

        if let Ok(addr) = env::var("GATEWAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }

        if let Ok(port) = env::var("GATEWAY_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_SERVER_PORT: {}", e)))?;
        }

        if let Ok(level) = env::var("GATEWAY_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GATEWAY_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(timeout) = env::var("GATEWAY_ENRICHMENT_TIMEOUT") {
            self.enrichment.dependency_timeout = humantime::parse_duration(&timeout)
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_ENRICHMENT_TIMEOUT: {}", e)))?;
        }

        if let Ok(limit) = env::var("GATEWAY_ENRICHMENT_MAX_CONCURRENCY") {
            self.enrichment.max_concurrency = limit
                .parse()
                .map_err(|e| GatewayError::config(format!("Invalid GATEWAY_ENRICHMENT_MAX_CONCURRENCY: {}", e)))?;
        }

        Ok(())
    }

    /// Validate gateway-level settings, collecting every problem into one error
    pub fn validate(&self) -> GatewayResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if self.enrichment.dependency_timeout.is_zero() {
            errors.push("enrichment dependency_timeout must be greater than 0".to_string());
        }

        if self.enrichment.max_concurrency == 0 {
            errors.push("enrichment max_concurrency must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// Gateway HTTP port
    pub port: u16,

    /// Maximum buffered request body size in bytes
    pub max_body_size: usize,

    /// Prometheus exporter port, disabled when absent
    pub metrics_port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            max_body_size: 10 * 1024 * 1024, // 10MB
            metrics_port: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when RUST_LOG is not set
    pub level: String,

    /// "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

/// Settings for dependency calls made while enriching responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Deadline for a single dependency call, independent of the origin request timeout
    #[serde(with = "humantime_serde")]
    pub dependency_timeout: Duration,

    /// Maximum number of dependency calls in flight for one request
    pub max_concurrency: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            dependency_timeout: Duration::from_secs(10),
            max_concurrency: 16,
        }
    }
}

/// Static description of one backend service mounted on the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Unique identifier
    pub name: String,

    /// Mount prefix on the gateway
    pub base_path: String,

    /// Remove `base_path` before forwarding
    #[serde(default)]
    pub strip_base_path: bool,

    /// Backend base URLs, tried in load-balancer order
    #[serde(default)]
    pub targets: Vec<String>,

    /// Deadline shared by all attempts of one request
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Additional attempts after the first
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Pause before each retry
    #[serde(with = "humantime_serde", default = "default_retry_delay")]
    pub retry_delay: Duration,

    /// Target selection strategy
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,

    /// Headers injected into every outbound call, overriding client values
    #[serde(default, alias = "headers")]
    pub static_headers: HashMap<String, String>,

    /// Rules applied to the outbound request
    #[serde(default)]
    pub request_transform: Vec<MappingRule>,

    /// Rules applied to the backend response
    #[serde(default)]
    pub response_transform: Vec<MappingRule>,

    /// Services whose data is merged into this service's responses
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl ServiceSpec {
    /// Create a spec with defaults for everything but the name, mount point and targets
    pub fn new<N: Into<String>, B: Into<String>>(name: N, base_path: B, targets: Vec<String>) -> Self {
        Self {
            name: name.into(),
            base_path: base_path.into(),
            strip_base_path: false,
            targets,
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            retry_delay: default_retry_delay(),
            load_balancing: LoadBalancingStrategy::default(),
            static_headers: HashMap::new(),
            request_transform: Vec::new(),
            response_transform: Vec::new(),
            dependencies: Vec::new(),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

/// Load balancing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    #[default]
    #[serde(alias = "round_robin")]
    RoundRobin,
    Random,
}

/// One composition step: call `target_service` once per extracted parameter value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Registered service name (or ignored when `path_template` is an absolute URL)
    #[serde(alias = "service")]
    pub target_service: String,

    /// Path with `{name}` placeholders
    #[serde(alias = "path")]
    pub path_template: String,

    /// `from` reads the origin response, `to` names a `{placeholder}`
    #[serde(default, alias = "parameter_mapping")]
    pub parameter_mappings: Vec<MappingRule>,

    /// `from` reads the dependency response, `to` addresses the origin response
    #[serde(default, alias = "result_mapping")]
    pub result_mappings: Vec<MappingRule>,
}

/// Which part of a message a mapping rule reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    #[default]
    Body,
    Header,
    Query,
}

/// Declarative "read from X, write to Y, with a fallback" rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    /// Source path expression; an empty source never resolves
    #[serde(default)]
    pub from: String,

    /// Destination path expression
    pub to: String,

    /// Literal used when `from` resolves to nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,

    /// Surface the rule operates on (transform rules only)
    #[serde(default)]
    pub surface: Surface,

    /// Optional rendering of the resolved value, e.g. `"Bearer {value}"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl MappingRule {
    /// Body rule without default or template
    pub fn new<F: Into<String>, T: Into<String>>(from: F, to: T) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            default: None,
            surface: Surface::Body,
            template: None,
        }
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn on(mut self, surface: Surface) -> Self {
        self.surface = surface;
        self
    }

    pub fn with_template<S: Into<String>>(mut self, template: S) -> Self {
        self.template = Some(template.into());
        self
    }
}
