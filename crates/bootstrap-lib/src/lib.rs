//! Bootstrap library for moving a Swarm cluster onto Consul discovery
//!
//! This crate provides the core functionality for:
//! - Node membership discovery from a temporary Swarm manager
//! - Per-node Consul configuration derivation
//! - Container provisioning against the Docker Remote API
//! - The ordered bootstrap procedure and its run report
//! - Metrics and structured logging

pub mod consul;
pub mod docker;
pub mod error;
pub mod membership;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod provisioner;

#[cfg(test)]
pub(crate) mod testing;

pub use consul::{DiscoveryConfigBuilder, DiscoveryServiceConfig, ServerSet};
pub use error::{ApiError, BootstrapError, Step};
pub use models::*;
pub use observability::{BootstrapMetrics, StructuredLogger};
pub use orchestrator::{BootstrapOrchestrator, BootstrapReport, BootstrapSettings, NodeOutcome};
pub use provisioner::ContainerProvisioner;
