//! # Service Registry
//!
//! Holds every accepted [`ServiceSpec`] together with its load balancer. The registry is
//! built once at startup and shared read-only (`Arc`) by all request tasks.
//!
//! Services are validated one at a time. A rejected service is logged and left out;
//! the remaining services still load.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

use crate::core::config::ServiceSpec;
use crate::core::error::{GatewayError, GatewayResult};
use crate::load_balancing::LoadBalancer;

/// A validated service and the balancer over its targets
#[derive(Debug)]
pub struct RegisteredService {
    /// Static service description
    pub spec: ServiceSpec,

    /// Target selector built from `spec.targets`
    pub balancer: LoadBalancer,
}

impl RegisteredService {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Pick the next target and join `path` and `query` onto it
    pub fn next_url(&self, path: &str, query: Option<&str>) -> Url {
        join_url(self.balancer.next_target(), path, query)
    }
}

/// Join `path` onto the target's own path without doubling or dropping a slash
pub fn join_url(target: &Url, path: &str, query: Option<&str>) -> Url {
    let base = target.path();
    let joined = if base.ends_with('/') {
        format!("{}{}", base, path.trim_start_matches('/'))
    } else if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    };

    let mut url = target.clone();
    url.set_path(&joined);
    url.set_query(query.filter(|q| !q.is_empty()));
    url
}

/// Name- and path-indexed set of services
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<RegisteredService>>,
    by_name: HashMap<String, usize>,
}

impl ServiceRegistry {
    /// Validate and register every spec, skipping the invalid ones
    pub fn load(specs: Vec<ServiceSpec>) -> Self {
        let mut registry = Self::default();

        for spec in specs {
            let name = spec.name.clone();
            match registry.register(spec) {
                Ok(()) => info!(service = %name, "Registered service"),
                Err(e) => error!(service = %name, error = %e, "Rejected service configuration"),
            }
        }

        registry
    }

    /// Validate one spec and add it
    pub fn register(&mut self, spec: ServiceSpec) -> GatewayResult<()> {
        if spec.name.trim().is_empty() {
            return Err(GatewayError::config("service name cannot be empty"));
        }

        if self.by_name.contains_key(&spec.name) {
            return Err(GatewayError::config(format!("duplicate service name: {}", spec.name)));
        }

        if spec.base_path.is_empty() {
            return Err(GatewayError::config("base_path cannot be empty"));
        }

        if !spec.base_path.starts_with('/') {
            return Err(GatewayError::config(format!(
                "base_path must start with '/': {}",
                spec.base_path
            )));
        }

        if spec.targets.is_empty() {
            return Err(GatewayError::config("service must declare at least one target"));
        }

        let targets = spec
            .targets
            .iter()
            .map(|raw| parse_target(raw))
            .collect::<GatewayResult<Vec<_>>>()?;

        let balancer = LoadBalancer::new(spec.load_balancing, targets)?;

        self.by_name.insert(spec.name.clone(), self.services.len());
        self.services.push(Arc::new(RegisteredService { spec, balancer }));
        Ok(())
    }

    /// Look a service up by name
    pub fn get(&self, name: &str) -> Option<Arc<RegisteredService>> {
        self.by_name.get(name).map(|&index| Arc::clone(&self.services[index]))
    }

    /// Find the service whose base path is the longest segment-aligned prefix of `path`
    pub fn find_by_path(&self, path: &str) -> Option<Arc<RegisteredService>> {
        self.services
            .iter()
            .filter(|service| path_matches(&service.spec.base_path, path))
            .max_by_key(|service| service.spec.base_path.trim_end_matches('/').len())
            .cloned()
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<RegisteredService>> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn parse_target(raw: &str) -> GatewayResult<Url> {
    let url = Url::parse(raw).map_err(|e| GatewayError::config(format!("invalid target URL {}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url),
        _ => Err(GatewayError::config(format!(
            "target must be an absolute http(s) URL: {}",
            raw
        ))),
    }
}

/// `/api` matches `/api` and `/api/x` but not `/apix`; `/` matches everything
fn path_matches(base_path: &str, path: &str) -> bool {
    let base = base_path.trim_end_matches('/');
    if base.is_empty() {
        return true;
    }

    match path.strip_prefix(base) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
