//! Uniform create/start/inspect wrapper used by every provisioning step

use crate::docker::ContainerApi;
use crate::error::ApiError;
use crate::models::{ContainerSpec, HostConfig, PlacedContainer};
use std::sync::Arc;
use tracing::{debug, info};

/// Provisions containers through the container API
///
/// No retries happen here; collaborator errors are returned unchanged.
#[derive(Clone)]
pub struct ContainerProvisioner {
    api: Arc<dyn ContainerApi>,
}

impl ContainerProvisioner {
    pub fn new(api: Arc<dyn ContainerApi>) -> Self {
        Self { api }
    }

    /// Create a container from `spec`
    ///
    /// A named container that already exists from an earlier run is reused
    /// instead of failing the step.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String, ApiError> {
        match self.api.create_container(spec).await {
            Ok(id) => Ok(id),
            Err(ApiError::Conflict(_)) if spec.name.is_some() => {
                let name = spec.display_name();
                let existing = self.api.inspect_container(name).await?;
                info!(
                    container = %name,
                    container_id = %existing.id,
                    node = %existing.node.name,
                    "Container already exists, reusing it"
                );
                Ok(existing.id)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn start(&self, id: &str, overrides: Option<&HostConfig>) -> Result<(), ApiError> {
        self.api.start_container(id, overrides).await
    }

    pub async fn inspect(&self, id: &str) -> Result<PlacedContainer, ApiError> {
        self.api.inspect_container(id).await
    }

    /// Create and start a container, returning its id
    ///
    /// Host settings travel with the create request, so start carries no
    /// overrides.
    pub async fn provision(&self, spec: &ContainerSpec) -> Result<String, ApiError> {
        let id = self.create(spec).await?;
        debug!(container = %spec.display_name(), container_id = %id, "Created container, starting it");
        self.start(&id, None).await?;
        Ok(id)
    }
}
