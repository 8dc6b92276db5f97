//! In-memory Swarm manager used by unit tests
//!
//! A `constraint:node==X` env entry pins a container to node X. Everything
//! else, including the manager's affinity to the temporary manager, lands on
//! the first node.

use crate::docker::ContainerApi;
use crate::error::ApiError;
use crate::membership::parse_report;
use crate::models::{ClusterNode, ContainerSpec, DiscoveryReport, HostConfig, PlacedContainer};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Build a `DriverStatus` report for the given `(name, address)` nodes
pub(crate) fn swarm_report(nodes: &[(&str, &str)]) -> DiscoveryReport {
    let mut rows = vec![("Nodes".to_string(), nodes.len().to_string())];
    for (name, addr) in nodes {
        rows.push((name.to_string(), addr.to_string()));
        rows.push((" └ Containers".to_string(), "1".to_string()));
        rows.push((" └ Reserved CPUs".to_string(), "0 / 2".to_string()));
        rows.push((" └ Reserved Memory".to_string(), "0 B / 2.05 GiB".to_string()));
    }
    DiscoveryReport::new(rows)
}

struct FakeContainer {
    spec: ContainerSpec,
    node: ClusterNode,
    starts: u32,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    names: HashMap<String, String>,
    /// Successful creates, in call order
    created: Vec<ContainerSpec>,
    fail_create: Vec<String>,
    fail_info: bool,
}

pub(crate) struct FakeSwarm {
    report: DiscoveryReport,
    nodes: Vec<ClusterNode>,
    state: Mutex<FakeState>,
}

impl FakeSwarm {
    pub(crate) fn new(report: DiscoveryReport) -> Self {
        let nodes = parse_report(&report).unwrap_or_default();
        Self {
            report,
            nodes,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// Fail every create whose name or env contains `needle`
    pub(crate) fn fail_create_for(&self, needle: &str) {
        self.state.lock().unwrap().fail_create.push(needle.to_string());
    }

    pub(crate) fn fail_info(&self) {
        self.state.lock().unwrap().fail_info = true;
    }

    pub(crate) fn created(&self) -> Vec<ContainerSpec> {
        self.state.lock().unwrap().created.clone()
    }

    /// Successful creates whose name starts with `prefix`
    pub(crate) fn created_named(&self, prefix: &str) -> Vec<ContainerSpec> {
        self.created()
            .into_iter()
            .filter(|s| s.name.as_deref().is_some_and(|n| n.starts_with(prefix)))
            .collect()
    }

    /// Successful creates of unnamed containers running `image`
    pub(crate) fn created_unnamed(&self, image: &str) -> Vec<ContainerSpec> {
        self.created()
            .into_iter()
            .filter(|s| s.name.is_none() && s.image == image)
            .collect()
    }

    pub(crate) fn start_count(&self, id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(id)
            .map(|c| c.starts)
            .unwrap_or(0)
    }

    fn place(&self, spec: &ContainerSpec) -> Result<ClusterNode, ApiError> {
        let first = self.nodes.first().cloned().ok_or_else(|| ApiError::Status {
            status: 500,
            message: "no nodes available".to_string(),
        })?;
        for entry in &spec.env {
            if let Some(name) = entry.strip_prefix("constraint:node==") {
                return self
                    .nodes
                    .iter()
                    .find(|n| n.name == name)
                    .cloned()
                    .ok_or_else(|| ApiError::Status {
                        status: 500,
                        message: format!("unable to find a node that satisfies node=={}", name),
                    });
            }
        }
        Ok(first)
    }
}

#[async_trait]
impl ContainerApi for FakeSwarm {
    async fn get_info(&self) -> Result<DiscoveryReport, ApiError> {
        if self.state.lock().unwrap().fail_info {
            return Err(ApiError::Status {
                status: 500,
                message: "manager unavailable".to_string(),
            });
        }
        Ok(self.report.clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ApiError> {
        let node = self.place(spec)?;
        let mut state = self.state.lock().unwrap();

        let fails = state.fail_create.iter().any(|needle| {
            spec.name.as_deref().is_some_and(|n| n.contains(needle.as_str()))
                || spec.env.iter().any(|e| e.contains(needle.as_str()))
        });
        if fails {
            return Err(ApiError::Status {
                status: 500,
                message: "injected create failure".to_string(),
            });
        }
        if let Some(name) = &spec.name {
            if state.names.contains_key(name) {
                return Err(ApiError::Conflict(name.clone()));
            }
        }

        state.next_id += 1;
        let id = format!("{:064x}", state.next_id);
        if let Some(name) = &spec.name {
            state.names.insert(name.clone(), id.clone());
        }
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                node,
                starts: 0,
            },
        );
        state.created.push(spec.clone());
        Ok(id)
    }

    async fn start_container(
        &self,
        id: &str,
        _overrides: Option<&HostConfig>,
    ) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))?;
        container.starts += 1;
        Ok(())
    }

    async fn inspect_container(&self, id: &str) -> Result<PlacedContainer, ApiError> {
        let state = self.state.lock().unwrap();
        let id = state.names.get(id).cloned().unwrap_or_else(|| id.to_string());
        let container = state
            .containers
            .get(&id)
            .ok_or_else(|| ApiError::NotFound(id.clone()))?;
        Ok(PlacedContainer {
            id: id.clone(),
            name: container.spec.name.clone().unwrap_or_default(),
            node: container.node.clone(),
        })
    }
}
