//! # Load Balancing Module
//!
//! Target selection for a service's backends. See [`balancer`] for the strategies.

pub mod balancer;

pub use balancer::{LoadBalancer, RandomBalancer, RoundRobinBalancer};
