//! Cluster membership discovery
//!
//! The orchestrator asks a [`MembershipSource`] for the node list. The
//! shipped source reads the temporary Swarm manager's `/info` report and
//! decodes its `DriverStatus` rows; a structured membership API can replace
//! it without touching the orchestrator.

mod parser;

pub use parser::{parse_report, NODES_SENTINEL, ROWS_PER_NODE};

use crate::docker::ContainerApi;
use crate::error::{BootstrapError, Result, Step};
use crate::models::ClusterNode;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Source of the cluster's current node list
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// List the nodes currently known to the cluster
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>>;
}

/// Membership read from a Swarm manager's `/info` driver status
pub struct DriverStatusMembership {
    api: Arc<dyn ContainerApi>,
    /// Name of the manager container, used as error context
    manager: String,
}

impl DriverStatusMembership {
    pub fn new(api: Arc<dyn ContainerApi>, manager: impl Into<String>) -> Self {
        Self {
            api,
            manager: manager.into(),
        }
    }
}

#[async_trait]
impl MembershipSource for DriverStatusMembership {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        let report = self
            .api
            .get_info()
            .await
            .map_err(|source| BootstrapError::Collaborator {
                step: Step::Discover,
                node: self.manager.clone(),
                source,
            })?;
        debug!(rows = report.len(), "Received driver status report");

        let nodes = parse_report(&report)?;
        info!(manager = %self.manager, count = nodes.len(), "Temporary Swarm manager reported nodes");
        Ok(nodes)
    }
}

/// Fixed node list, for callers that already know the membership
pub struct StaticMembership {
    nodes: Vec<ClusterNode>,
}

impl StaticMembership {
    pub fn new(nodes: Vec<ClusterNode>) -> Self {
        Self { nodes }
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn list_nodes(&self) -> Result<Vec<ClusterNode>> {
        Ok(self.nodes.clone())
    }
}
