//! Enrichment engine: job planning, bounded concurrent execution and result merging.
//!
//! ## Rust Concepts Used
//! - Jobs are plain futures joined with `futures::future::join_all` inside the request
//!   task. Nothing is spawned, so dropping the request future cancels every in-flight
//!   dependency call.
//! - A per-request `tokio::sync::Semaphore` caps how many jobs call out at once
//! - The origin tree sits behind one `parking_lot::Mutex`; the lock is only taken after a
//!   response arrived and is never held across an `.await`

use axum::http::HeaderMap;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

use super::{DependencyError, EnrichmentError};
use crate::core::config::{DependencySpec, EnrichmentConfig, ServiceSpec};
use crate::core::registry::{join_url, ServiceRegistry};
use crate::expression::{placeholder_name, stringify_scalar, substitute_placeholder, PathExpr, WriteOutcome};
use crate::observability::GatewayMetrics;

/// Inbound headers copied onto dependency calls for request correlation
const CORRELATION_HEADERS: &[&str] = &["x-request-id", "x-correlation-id"];

/// Longest body excerpt kept in error messages
const PREVIEW_LEN: usize = 100;

/// The parameter value a job was created for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub name: String,
    pub value: String,
}

/// One dependency call for one extracted parameter value
#[derive(Debug, Clone)]
pub struct EnrichmentJob<'a> {
    pub dependency: &'a DependencySpec,
    /// `None` for a dependency without parameter mappings
    pub drive: Option<Drive>,
    /// Path template with every known placeholder substituted
    pub path: String,
}

/// Calls dependency services and merges their data into origin responses
pub struct EnrichmentEngine {
    client: reqwest::Client,
    registry: Arc<ServiceRegistry>,
    config: EnrichmentConfig,
    metrics: GatewayMetrics,
}

impl EnrichmentEngine {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<ServiceRegistry>,
        config: EnrichmentConfig,
        metrics: GatewayMetrics,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            metrics,
        }
    }

    /// Enrich `body` with the data of `spec`'s dependencies
    ///
    /// Returns the body unchanged when there are no dependencies. A body that is not a
    /// JSON object yields an error carrying the original bytes.
    #[instrument(skip_all, fields(service = %spec.name))]
    pub async fn enrich(
        &self,
        spec: &ServiceSpec,
        body: Bytes,
        headers: &HeaderMap,
        auth_token: Option<&str>,
    ) -> Result<Bytes, EnrichmentError> {
        if spec.dependencies.is_empty() {
            return Ok(body);
        }

        let origin = match serde_json::from_slice::<Value>(&body) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => {
                self.metrics.origin_parse_failures.increment(1);
                return Err(EnrichmentError::OriginParse {
                    reason: "top-level value is not an object".to_string(),
                    original: body,
                });
            }
            Err(e) => {
                self.metrics.origin_parse_failures.increment(1);
                return Err(EnrichmentError::OriginParse {
                    reason: e.to_string(),
                    original: body,
                });
            }
        };

        let started = Instant::now();
        let jobs = plan_jobs(spec, &origin);
        debug!(jobs = jobs.len(), "Planned enrichment jobs");

        let tree = Mutex::new(origin);
        let semaphore = Semaphore::new(self.config.max_concurrency.max(1));
        let forwarded = correlation_headers(headers);

        let outcomes = join_all(
            jobs.iter()
                .map(|job| self.run_job(job, &tree, &semaphore, auth_token, &forwarded)),
        )
        .await;

        let failed = outcomes.iter().filter(|ok| !**ok).count();
        self.metrics.enrichment_duration.record(started.elapsed().as_secs_f64());

        let mut merged = tree.into_inner();
        sweep_residual_keys(&mut merged);

        debug!(
            jobs = outcomes.len(),
            failed = failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Enrichment completed"
        );

        serde_json::to_vec(&merged)
            .map(Bytes::from)
            .map_err(|e| EnrichmentError::Serialize {
                reason: e.to_string(),
                original: body,
            })
    }

    async fn run_job(
        &self,
        job: &EnrichmentJob<'_>,
        tree: &Mutex<Value>,
        semaphore: &Semaphore,
        auth_token: Option<&str>,
        forwarded: &HeaderMap,
    ) -> bool {
        let Ok(_permit) = semaphore.acquire().await else {
            return false;
        };

        let result = match self.resolve_url(job) {
            Ok(url) => self.fetch(url, auth_token, forwarded).await,
            Err(e) => Err(e),
        };

        let succeeded = match result {
            Ok(data) => {
                let mut tree = tree.lock();
                merge_result(&mut tree, job, data);
                true
            }
            Err(e) => {
                warn!(
                    dependency = %job.dependency.target_service,
                    param = job.drive.as_ref().map(|d| d.name.as_str()).unwrap_or(""),
                    value = job.drive.as_ref().map(|d| d.value.as_str()).unwrap_or(""),
                    error = %e,
                    "Dependency call failed, skipping"
                );
                false
            }
        };

        self.metrics.record_enrichment_job(succeeded);
        succeeded
    }

    fn resolve_url(&self, job: &EnrichmentJob<'_>) -> Result<Url, DependencyError> {
        if has_placeholder(&job.path) {
            return Err(DependencyError::UnresolvedPlaceholder(job.path.clone()));
        }

        if job.path.starts_with("http://") || job.path.starts_with("https://") {
            return Url::parse(&job.path).map_err(|e| DependencyError::InvalidUrl {
                url: job.path.clone(),
                reason: e.to_string(),
            });
        }

        let service = self
            .registry
            .get(&job.dependency.target_service)
            .ok_or_else(|| DependencyError::UnknownService(job.dependency.target_service.clone()))?;

        let (path, query) = match job.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (job.path.as_str(), None),
        };

        Ok(join_url(service.balancer.next_target(), path, query))
    }

    async fn fetch(&self, url: Url, auth_token: Option<&str>, forwarded: &HeaderMap) -> Result<Value, DependencyError> {
        debug!(url = %url, "Calling dependency");

        let mut request = self
            .client
            .get(url)
            .timeout(self.config.dependency_timeout)
            .headers(forwarded.clone());

        if let Some(token) = auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            return Err(DependencyError::Status {
                status: status.as_u16(),
                preview: preview(&body),
            });
        }

        if body.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'<') {
            return Err(DependencyError::HtmlBody);
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

/// Expand a service's dependencies into jobs against the parsed origin response
///
/// Parameters that extract exactly one value are substituted into the dependency's
/// path up front. Each multi-valued parameter then drives one job per value; when
/// every parameter is single-valued, the dependency is called once, driven by the
/// first of them. Identical calls are planned once, and a path that still holds a
/// placeholder is dropped rather than called.
pub fn plan_jobs<'a>(spec: &'a ServiceSpec, origin: &Value) -> Vec<EnrichmentJob<'a>> {
    let mut jobs = Vec::new();

    for dependency in &spec.dependencies {
        if dependency.parameter_mappings.is_empty() {
            jobs.push(EnrichmentJob {
                dependency,
                drive: None,
                path: dependency.path_template.clone(),
            });
            continue;
        }

        let extracted: Vec<(String, Vec<String>)> = dependency
            .parameter_mappings
            .iter()
            .filter_map(|mapping| {
                let name = placeholder_name(&mapping.to).to_string();
                let expr = match PathExpr::parse(&mapping.from) {
                    Ok(expr) => expr,
                    Err(e) => {
                        warn!(
                            dependency = %dependency.target_service,
                            from = %mapping.from,
                            error = %e,
                            "Skipping invalid parameter mapping"
                        );
                        return None;
                    }
                };

                let mut values = expr.extract_strings(origin);
                if values.is_empty() {
                    if let Some(default) = mapping.default.as_ref().and_then(stringify_scalar) {
                        values.push(default);
                    }
                }
                if values.is_empty() {
                    debug!(
                        dependency = %dependency.target_service,
                        param = %name,
                        "Parameter not found in origin response"
                    );
                }
                Some((name, values))
            })
            .collect();

        let shared_path = extracted
            .iter()
            .filter(|(_, values)| values.len() == 1)
            .fold(dependency.path_template.clone(), |path, (name, values)| {
                substitute_placeholder(&path, name, &values[0])
            });

        let multi_valued: Vec<&(String, Vec<String>)> =
            extracted.iter().filter(|(_, values)| values.len() > 1).collect();
        let drivers: Vec<&(String, Vec<String>)> = if multi_valued.is_empty() {
            extracted.iter().find(|(_, values)| values.len() == 1).into_iter().collect()
        } else {
            multi_valued
        };

        let mut planned = HashSet::new();
        for (name, values) in drivers {
            for value in values {
                let path = substitute_placeholder(&shared_path, name, value);
                if has_placeholder(&path) {
                    debug!(
                        dependency = %dependency.target_service,
                        path = %path,
                        "Dependency path has an unresolved placeholder, not calling"
                    );
                    continue;
                }
                if !planned.insert((path.clone(), value.clone())) {
                    continue;
                }
                jobs.push(EnrichmentJob {
                    dependency,
                    drive: Some(Drive {
                        name: name.clone(),
                        value: value.clone(),
                    }),
                    path,
                });
            }
        }
    }

    jobs
}

/// Apply a job's result mappings to the origin tree
fn merge_result(tree: &mut Value, job: &EnrichmentJob<'_>, data: Value) {
    let dependency = job.dependency;

    if dependency.result_mappings.is_empty() {
        if let Value::Object(map) = tree {
            map.insert(dependency.target_service.clone(), data);
        }
        return;
    }

    let drive_value = job.drive.as_ref().map(|d| d.value.as_str());

    for mapping in &dependency.result_mappings {
        let from = if mapping.from.trim().is_empty() {
            PathExpr::Root
        } else {
            match PathExpr::parse(&mapping.from) {
                Ok(expr) => expr,
                Err(e) => {
                    warn!(from = %mapping.from, error = %e, "Skipping invalid result mapping");
                    continue;
                }
            }
        };

        let Some(value) = from.read(&data).or_else(|| mapping.default.clone()) else {
            debug!(from = %mapping.from, "Result mapping source not found");
            continue;
        };

        let to_raw = match &job.drive {
            Some(drive) => substitute_placeholder(&mapping.to, &drive.name, &drive.value),
            None => mapping.to.clone(),
        };

        let to = match PathExpr::parse(&to_raw) {
            Ok(expr) => expr,
            Err(e) => {
                warn!(to = %to_raw, error = %e, "Skipping invalid result mapping");
                continue;
            }
        };

        match to.write(tree, value, drive_value) {
            WriteOutcome::Applied(count) => debug!(to = %to_raw, locations = count, "Merged dependency result"),
            WriteOutcome::NoMatch => debug!(to = %to_raw, drive = ?drive_value, "No element matched result mapping"),
            WriteOutcome::MissingArray => warn!(to = %to_raw, "Array not found for result mapping"),
            WriteOutcome::IndexOutOfRange { index, len } => {
                warn!(to = %to_raw, index = index, array_length = len, "Index out of bounds in result mapping")
            }
        }
    }
}

/// Remove top-level keys that are leftover expression fragments
pub fn sweep_residual_keys(tree: &mut Value) {
    if let Value::Object(map) = tree {
        map.retain(|key, _| !(key.contains("?(") || key.starts_with('[')));
    }
}

fn has_placeholder(path: &str) -> bool {
    path.find('{')
        .map_or(false, |open| path[open..].contains('}'))
}

fn correlation_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in CORRELATION_HEADERS {
        if let Some(value) = headers.get(*name) {
            if let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                forwarded.insert(header_name, value.clone());
            }
        }
    }
    forwarded
}

fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    text.chars().take(PREVIEW_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MappingRule;
    use serde_json::json;

    fn dependency(service: &str, path: &str, params: Vec<MappingRule>, results: Vec<MappingRule>) -> DependencySpec {
        DependencySpec {
            target_service: service.to_string(),
            path_template: path.to_string(),
            parameter_mappings: params,
            result_mappings: results,
        }
    }

    fn service_with(dependencies: Vec<DependencySpec>) -> ServiceSpec {
        let mut spec = ServiceSpec::new("orders", "/orders", vec!["http://orders:8080".to_string()]);
        spec.dependencies = dependencies;
        spec
    }

    #[test]
    fn test_plan_one_job_per_extracted_value() {
        let spec = service_with(vec![dependency(
            "users",
            "/users/{uid}",
            vec![MappingRule::new("$.items[*].userId", "{uid}")],
            vec![],
        )]);
        let origin = json!({"items": [{"userId": 1}, {"userId": 2}, {"other": 3}]});

        let jobs = plan_jobs(&spec, &origin);
        let paths: Vec<&str> = jobs.iter().map(|j| j.path.as_str()).collect();
        assert_eq!(paths, vec!["/users/1", "/users/2"]);
        assert_eq!(
            jobs[1].drive,
            Some(Drive {
                name: "uid".to_string(),
                value: "2".to_string()
            })
        );
    }

    #[test]
    fn test_plan_shares_single_valued_params() {
        let spec = service_with(vec![dependency(
            "stock",
            "/tenants/{tenant}/sku/{sku}",
            vec![
                MappingRule::new("$.tenant", "{tenant}"),
                MappingRule::new("$.lines[*].sku", "{sku}"),
            ],
            vec![],
        )]);
        let origin = json!({"tenant": "acme", "lines": [{"sku": "A"}, {"sku": "B"}]});

        let jobs = plan_jobs(&spec, &origin);
        let paths: Vec<&str> = jobs.iter().map(|j| j.path.as_str()).collect();
        assert_eq!(paths, vec!["/tenants/acme/sku/A", "/tenants/acme/sku/B"]);
        assert!(jobs.iter().all(|j| j.drive.as_ref().map(|d| d.name.as_str()) == Some("sku")));
    }

    #[test]
    fn test_plan_single_valued_params_call_once() {
        let spec = service_with(vec![dependency(
            "stock",
            "/tenants/{tenant}/sku/{sku}",
            vec![
                MappingRule::new("$.tenant", "{tenant}"),
                MappingRule::new("$.sku", "{sku}"),
            ],
            vec![],
        )]);
        let origin = json!({"tenant": "acme", "sku": "A"});

        let jobs = plan_jobs(&spec, &origin);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path, "/tenants/acme/sku/A");
        assert_eq!(
            jobs[0].drive,
            Some(Drive {
                name: "tenant".to_string(),
                value: "acme".to_string()
            })
        );
    }

    #[test]
    fn test_plan_skips_unresolved_and_repeated_values() {
        let spec = service_with(vec![dependency(
            "stock",
            "/tenants/{tenant}/sku/{sku}",
            vec![
                MappingRule::new("$.tenant", "{tenant}"),
                MappingRule::new("$.lines[*].sku", "{sku}"),
            ],
            vec![],
        )]);

        let missing_tenant = json!({"lines": [{"sku": "A"}, {"sku": "B"}]});
        assert!(plan_jobs(&spec, &missing_tenant).is_empty());

        let repeated = json!({"tenant": "acme", "lines": [{"sku": "A"}, {"sku": "A"}, {"sku": "B"}]});
        let paths: Vec<String> = plan_jobs(&spec, &repeated).into_iter().map(|j| j.path).collect();
        assert_eq!(paths, vec!["/tenants/acme/sku/A", "/tenants/acme/sku/B"]);
    }

    #[test]
    fn test_plan_uses_parameter_default() {
        let spec = service_with(vec![dependency(
            "users",
            "/users/{uid}",
            vec![MappingRule::new("$.owner", "{uid}").with_default(json!(0))],
            vec![],
        )]);

        let jobs = plan_jobs(&spec, &json!({}));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].path, "/users/0");
    }

    #[test]
    fn test_plan_without_parameters_calls_once() {
        let spec = service_with(vec![dependency("config", "/settings", vec![], vec![])]);
        let jobs = plan_jobs(&spec, &json!({"a": 1}));
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].drive.is_none());
    }

    #[test]
    fn test_merge_without_result_mappings_uses_service_key() {
        let dep = dependency("users", "/users/{uid}", vec![], vec![]);
        let job = EnrichmentJob {
            dependency: &dep,
            drive: None,
            path: "/users/1".to_string(),
        };
        let mut tree = json!({"id": 1});

        merge_result(&mut tree, &job, json!({"name": "ada"}));
        assert_eq!(tree, json!({"id": 1, "users": {"name": "ada"}}));
    }

    #[test]
    fn test_merge_substitutes_placeholder_in_destination() {
        let dep = dependency(
            "catalog",
            "/sku/{sku}",
            vec![],
            vec![MappingRule::new("$", "items[?(@.sku={sku})].detail")],
        );
        let job = EnrichmentJob {
            dependency: &dep,
            drive: Some(Drive {
                name: "sku".to_string(),
                value: "ABC".to_string(),
            }),
            path: "/sku/ABC".to_string(),
        };
        let mut tree = json!({"items": [{"sku": "ABC"}, {"sku": "XYZ"}]});

        merge_result(&mut tree, &job, json!({"price": 3}));
        assert_eq!(tree["items"][0]["detail"], json!({"price": 3}));
        assert!(tree["items"][1].get("detail").is_none());
    }

    #[test]
    fn test_sweep_removes_expression_fragments() {
        let mut tree = json!({"keep": 1, "items[?(@.id=1)]": 2, "[0]": 3, "a?(b": 4});
        sweep_residual_keys(&mut tree);
        assert_eq!(tree, json!({"keep": 1}));
    }

    #[test]
    fn test_preview_is_truncated() {
        let body = "x".repeat(500);
        assert_eq!(preview(body.as_bytes()).len(), PREVIEW_LEN);
    }
}
