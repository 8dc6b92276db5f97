//! Container API collaborator
//!
//! The bootstrap procedure talks to the cluster through [`ContainerApi`].
//! [`DockerApiClient`] implements it against the Docker Remote API exposed by
//! a Swarm manager.

mod client;

pub use client::DockerApiClient;

use crate::error::ApiError;
use crate::models::{ContainerSpec, DiscoveryReport, HostConfig, PlacedContainer};
use async_trait::async_trait;

/// Operations the bootstrap procedure needs from the container manager
#[async_trait]
pub trait ContainerApi: Send + Sync {
    /// Fetch the manager's diagnostic report
    async fn get_info(&self) -> Result<DiscoveryReport, ApiError>;

    /// Create a container and return its id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ApiError>;

    /// Start a created container, optionally overriding host settings
    async fn start_container(
        &self,
        id: &str,
        overrides: Option<&HostConfig>,
    ) -> Result<(), ApiError>;

    /// Resolve a container by id or name, including the node it runs on
    async fn inspect_container(&self, id: &str) -> Result<PlacedContainer, ApiError>;
}
