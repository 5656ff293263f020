//! # Load Balancer Module
//!
//! This module chooses one backend target URL out of a service's ordered target list
//! for every outbound call, including each retry attempt.
//!
//! ## Rust Concepts Explained
//!
//! - `AtomicUsize` provides lock-free, thread-safe counters shared by every request task
//! - A closed `enum` over the strategies replaces dynamic dispatch: `match` is exhaustive,
//!   so adding a strategy forces every call site to handle it
//! - `Send + Sync` come for free because every field is atomic or immutable
//!
//! ## Load Balancing Algorithms
//!
//! 1. **Round Robin**: a shared cursor advanced exactly once per call, modulo the target
//!    count. A retry therefore lands on the next target rather than the failed one.
//! 2. **Random**: samples a target uniformly per call, independent of earlier calls.
//!
//! Selection never blocks and never fails. Target health is not tracked here.

use metrics::counter;
use rand::Rng;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::debug;
use url::Url;

use crate::core::config::LoadBalancingStrategy;
use crate::core::error::{GatewayError, GatewayResult};

/// Load balancer bound to one service's target list
#[derive(Debug)]
pub enum LoadBalancer {
    RoundRobin(RoundRobinBalancer),
    Random(RandomBalancer),
}

impl LoadBalancer {
    /// Build the balancer for `strategy`; an empty target list is rejected
    pub fn new(strategy: LoadBalancingStrategy, targets: Vec<Url>) -> GatewayResult<Self> {
        let targets = TargetSet::new(targets)?;
        Ok(match strategy {
            LoadBalancingStrategy::RoundRobin => Self::RoundRobin(RoundRobinBalancer::new(targets)),
            LoadBalancingStrategy::Random => Self::Random(RandomBalancer::new(targets)),
        })
    }

    /// Pick the target for the next call
    pub fn next_target(&self) -> &Url {
        match self {
            Self::RoundRobin(balancer) => balancer.next_target(),
            Self::Random(balancer) => balancer.next_target(),
        }
    }

    /// Get the algorithm name for metrics and logging
    pub fn algorithm_name(&self) -> &'static str {
        match self {
            Self::RoundRobin(_) => "round_robin",
            Self::Random(_) => "random",
        }
    }

    /// Total number of selections made so far
    pub fn selections(&self) -> u64 {
        self.targets().selections.load(Ordering::Relaxed)
    }

    /// The configured targets, in declaration order
    pub fn target_urls(&self) -> &[Url] {
        &self.targets().urls
    }

    fn targets(&self) -> &TargetSet {
        match self {
            Self::RoundRobin(balancer) => &balancer.targets,
            Self::Random(balancer) => &balancer.targets,
        }
    }
}

/// Non-empty target list plus the selection counter shared by all strategies
#[derive(Debug)]
struct TargetSet {
    urls: Vec<Url>,
    selections: AtomicU64,
}

impl TargetSet {
    fn new(urls: Vec<Url>) -> GatewayResult<Self> {
        if urls.is_empty() {
            return Err(GatewayError::config("load balancer requires at least one target"));
        }
        Ok(Self {
            urls,
            selections: AtomicU64::new(0),
        })
    }

    fn record(&self, index: usize, algorithm: &'static str) -> &Url {
        self.selections.fetch_add(1, Ordering::Relaxed);
        counter!("load_balancer_selections", "algorithm" => algorithm).increment(1);

        let selected = &self.urls[index];
        debug!(
            target_url = %selected,
            index = index,
            algorithm = algorithm,
            "Selected backend target"
        );
        selected
    }
}

/// Round-robin load balancer with atomic counter
///
/// `fetch_add` wraps on overflow, and the modulo keeps the index in range, so the
/// cursor never needs resetting.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    targets: TargetSet,
    counter: AtomicUsize,
}

impl RoundRobinBalancer {
    fn new(targets: TargetSet) -> Self {
        Self {
            targets,
            counter: AtomicUsize::new(0),
        }
    }

    fn next_target(&self) -> &Url {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.targets.urls.len();
        self.targets.record(index, "round_robin")
    }
}

/// Uniform random load balancer
#[derive(Debug)]
pub struct RandomBalancer {
    targets: TargetSet,
}

impl RandomBalancer {
    fn new(targets: TargetSet) -> Self {
        Self { targets }
    }

    fn next_target(&self) -> &Url {
        let index = rand::thread_rng().gen_range(0..self.targets.urls.len());
        self.targets.record(index, "random")
    }
}
