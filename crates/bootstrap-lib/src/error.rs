//! Error types for the bootstrap procedure

use std::fmt;
use thiserror::Error;

/// Provisioning step a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Discover,
    DistributeConfig,
    StartDiscoveryService,
    RepointAgent,
    PromoteManager,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Discover => "discover",
            Step::DistributeConfig => "distribute_config",
            Step::StartDiscoveryService => "start_discovery_service",
            Step::RepointAgent => "repoint_agent",
            Step::PromoteManager => "promote_manager",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the container API collaborator
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("container API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("container name already in use: {0}")]
    Conflict(String),

    #[error("no such container: {0}")]
    NotFound(String),

    #[error("invalid response from container API: {0}")]
    Decode(String),

    #[error("invalid container API endpoint: {0}")]
    Endpoint(String),
}

/// Errors surfaced by the bootstrap procedure
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("malformed discovery report: {0}")]
    MalformedReport(String),

    #[error("{step} failed for node {node}: {source}")]
    Collaborator {
        step: Step,
        node: String,
        #[source]
        source: ApiError,
    },

    #[error("temporary manager reported no nodes")]
    EmptyDiscovery,

    #[error("client node {node} has no discovery servers to join")]
    UnjoinableClient { node: String },

    #[error("no discovery service instance started, permanent manager not promoted")]
    NoDiscoveryInstance,

    #[error("failed to serialize discovery config: {0}")]
    ConfigSerialization(#[from] serde_json::Error),

    #[error("worker for node {node} aborted: {reason}")]
    WorkerAborted { node: String, reason: String },
}

impl BootstrapError {
    /// Step the failure happened in, for collaborator failures
    pub fn step(&self) -> Option<Step> {
        match self {
            BootstrapError::Collaborator { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T, E = BootstrapError> = std::result::Result<T, E>;
