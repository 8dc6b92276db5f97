//! Bootstrap orchestration
//!
//! Runs the one-shot procedure that moves a cluster off its temporary Swarm
//! manager:
//! 1. discover the nodes the temporary manager sees
//! 2. write each node's Consul config onto that node
//! 3. start a Consul instance on each node
//! 4. re-register each node's Swarm agent against Consul
//! 5. start the permanent Swarm manager next to the temporary one
//!
//! Steps 2-3 and step 4 run as one task per node. A node whose step fails
//! skips its remaining steps; other nodes carry on. Nothing is rolled back.

mod steps;


pub use steps::{
    container_affinity, node_constraint, DistributeConfig, JoinTarget, PromoteManager,
    RepointAgent, StartDiscoveryService, AGENT_CONTAINER_PREFIX, CONSUL_CONTAINER_PREFIX,
    MANAGER_PORT,
};

use crate::consul::{DiscoveryConfigBuilder, DiscoveryServiceConfig, ServerSet};
use crate::error::{ApiError, BootstrapError, Result, Step};
use crate::membership::MembershipSource;
use crate::models::{ClusterNode, PlacedContainer};
use crate::observability::{BootstrapMetrics, StructuredLogger};
use crate::provisioner::ContainerProvisioner;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Images, names and policy switches for a bootstrap run
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Minimal shell image used to write config files onto nodes
    pub helper_image: String,
    /// Consul image
    pub consul_image: String,
    /// Swarm image used for agents and the permanent manager
    pub swarm_image: String,
    /// Container name of the temporary Swarm manager
    pub temporary_manager: String,
    /// Container name of the permanent Swarm manager
    pub manager_name: String,
    /// Publish the permanent manager's port on its host
    pub bind_manager_port: bool,
    /// Treat an empty node list as a failure
    pub require_nodes: bool,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            helper_image: "gliderlabs/alpine:3.1".to_string(),
            consul_image: "sequenceiq/consul:v0.5.0-v6".to_string(),
            swarm_image: "swarm:0.4.0".to_string(),
            temporary_manager: "swarm-manager-tmp".to_string(),
            manager_name: "swarm-manager".to_string(),
            bind_manager_port: false,
            require_nodes: true,
        }
    }
}

/// Consul role a node was configured with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Server,
    Client,
}

/// What happened to one node during a run
#[derive(Debug)]
pub struct NodeOutcome {
    pub node: ClusterNode,
    pub role: NodeRole,
    /// Config writer container
    pub config_container: Option<String>,
    /// Consul container and where it was placed
    pub discovery: Option<PlacedContainer>,
    /// Swarm agent container
    pub agent_container: Option<String>,
    /// First failure; later steps for the node were skipped
    pub error: Option<BootstrapError>,
}

impl NodeOutcome {
    fn new(plan: &NodePlan) -> Self {
        Self {
            node: plan.node.clone(),
            role: if plan.config.is_server() {
                NodeRole::Server
            } else {
                NodeRole::Client
            },
            config_container: None,
            discovery: None,
            agent_container: None,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.error.is_none() && self.agent_container.is_some()
    }
}

/// Result of a bootstrap run
#[derive(Debug)]
pub struct BootstrapReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Per-node outcomes, in discovery order
    pub nodes: Vec<NodeOutcome>,
    /// Consul instance agents and the manager were pointed at
    pub join_target: Option<JoinTarget>,
    /// Permanent manager container id
    pub manager: Result<String>,
}

impl BootstrapReport {
    /// Every node finished all steps and the manager was promoted
    pub fn is_complete(&self) -> bool {
        self.manager.is_ok() && self.nodes.iter().all(NodeOutcome::is_complete)
    }

    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.nodes.iter().filter(|n| n.error.is_some())
    }
}

/// A node with the config it will receive
#[derive(Debug, Clone)]
struct NodePlan {
    node: ClusterNode,
    config: DiscoveryServiceConfig,
}

/// Shared, read-only context handed to every per-node task
#[derive(Clone)]
struct NodeWorker {
    provisioner: ContainerProvisioner,
    settings: Arc<BootstrapSettings>,
    metrics: BootstrapMetrics,
    logger: StructuredLogger,
}

impl NodeWorker {
    /// Run one collaborator call for `node`, recording latency and failures
    async fn step<T, F>(&self, step: Step, node: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, ApiError>>,
    {
        let start = Instant::now();
        let result = call.await;
        self.metrics
            .observe_step_latency(step, start.elapsed().as_secs_f64());

        result.map_err(|source| {
            self.metrics.inc_step_failures(step);
            BootstrapError::Collaborator {
                step,
                node: node.to_string(),
                source,
            }
        })
    }

    /// Steps 2 and 3 for one node
    async fn start_discovery(&self, plan: NodePlan) -> NodeOutcome {
        let mut outcome = NodeOutcome::new(&plan);
        if let Err(e) = self.distribute_and_start(&plan, &mut outcome).await {
            self.logger.log_node_failed(&plan.node.name, &e);
            outcome.error = Some(e);
        }
        outcome
    }

    async fn distribute_and_start(
        &self,
        plan: &NodePlan,
        outcome: &mut NodeOutcome,
    ) -> Result<()> {
        let node = &plan.node;

        let spec = DistributeConfig {
            node,
            config: &plan.config,
            image: &self.settings.helper_image,
        }
        .container_spec()?;
        debug!(node = %node.name, "Copying Consul configuration to node");
        let id = self
            .step(
                Step::DistributeConfig,
                &node.name,
                self.provisioner.provision(&spec),
            )
            .await?;
        self.metrics.inc_containers_provisioned(Step::DistributeConfig);
        self.logger
            .log_step_completed(&node.name, Step::DistributeConfig, &id);
        outcome.config_container = Some(id);

        let spec = StartDiscoveryService {
            node,
            image: &self.settings.consul_image,
        }
        .container_spec();
        let id = self
            .step(
                Step::StartDiscoveryService,
                &node.name,
                self.provisioner.provision(&spec),
            )
            .await?;
        self.metrics
            .inc_containers_provisioned(Step::StartDiscoveryService);
        let placed = self
            .step(
                Step::StartDiscoveryService,
                &node.name,
                self.provisioner.inspect(&id),
            )
            .await?;
        if placed.node.name != node.name {
            warn!(
                node = %node.name,
                placed_on = %placed.node.name,
                "Consul container landed on a different node than requested"
            );
        }
        self.logger
            .log_step_completed(&placed.node.name, Step::StartDiscoveryService, &placed.id);
        outcome.discovery = Some(placed);
        Ok(())
    }

    /// Step 4 for one node
    async fn repoint_agent(
        &self,
        placed: PlacedContainer,
        target: Arc<JoinTarget>,
    ) -> Result<String> {
        let spec = RepointAgent {
            placed: &placed,
            target: &target,
            image: &self.settings.swarm_image,
        }
        .container_spec();
        debug!(
            node = %placed.node.name,
            discovery = %target.discovery_url(),
            "Creating Swarm agent"
        );

        let id = self
            .step(
                Step::RepointAgent,
                &placed.node.name,
                self.provisioner.provision(&spec),
            )
            .await?;
        self.metrics.inc_containers_provisioned(Step::RepointAgent);
        self.logger
            .log_step_completed(&placed.node.name, Step::RepointAgent, &id);
        Ok(id)
    }
}

/// Sequences the bootstrap steps over every discovered node
pub struct BootstrapOrchestrator {
    membership: Arc<dyn MembershipSource>,
    servers: ServerSet,
    worker: NodeWorker,
}

impl BootstrapOrchestrator {
    pub fn new(
        membership: Arc<dyn MembershipSource>,
        provisioner: ContainerProvisioner,
        servers: ServerSet,
        settings: BootstrapSettings,
    ) -> Self {
        let logger = StructuredLogger::new(settings.temporary_manager.clone());
        Self {
            membership,
            servers,
            worker: NodeWorker {
                provisioner,
                settings: Arc::new(settings),
                metrics: BootstrapMetrics::new(),
                logger,
            },
        }
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.worker.settings
    }

    /// Run the whole procedure
    ///
    /// Returns an error only when nothing was provisioned (discovery or
    /// validation failed). Per-node and manager failures are in the report.
    pub async fn run(&self) -> Result<BootstrapReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.worker
            .logger
            .log_started(ORCHESTRATOR_VERSION, self.servers.len());

        let nodes = self.discover().await?;
        let plans = self.plan(&nodes)?;

        let mut outcomes = self.start_discovery_services(plans).await;

        let join_target = select_join_target(&outcomes, &self.servers);
        let manager = match &join_target {
            Some(target) => {
                info!(discovery = %target.address(), "Using Consul instance as join target");
                self.repoint_agents(&mut outcomes, target).await;
                self.promote_manager(target).await
            }
            None => {
                warn!("No Consul instance started, skipping agents and manager");
                Err(BootstrapError::NoDiscoveryInstance)
            }
        };

        let complete = outcomes.iter().filter(|o| o.is_complete()).count();
        self.worker.logger.log_finished(
            complete,
            outcomes.len() - complete,
            clock.elapsed().as_secs_f64(),
        );

        Ok(BootstrapReport {
            started_at,
            finished_at: Utc::now(),
            nodes: outcomes,
            join_target,
            manager,
        })
    }

    /// Step 1
    async fn discover(&self) -> Result<Vec<ClusterNode>> {
        let start = Instant::now();
        let listed = self.membership.list_nodes().await;
        self.worker
            .metrics
            .observe_step_latency(Step::Discover, start.elapsed().as_secs_f64());

        let nodes = match listed {
            Ok(nodes) => nodes,
            Err(e) => {
                self.worker.metrics.inc_step_failures(Step::Discover);
                return Err(e);
            }
        };
        self.worker.metrics.set_nodes_discovered(nodes.len());

        if nodes.is_empty() && self.worker.settings.require_nodes {
            return Err(BootstrapError::EmptyDiscovery);
        }
        Ok(nodes)
    }

    /// Build every node's config up front and reject unjoinable clients
    fn plan(&self, nodes: &[ClusterNode]) -> Result<Vec<NodePlan>> {
        for server in self.servers.iter() {
            if !nodes.iter().any(|n| n.address.contains(server)) {
                warn!(server = %server, "Consul server address matches no discovered node");
            }
        }

        let builder = DiscoveryConfigBuilder::new(nodes, &self.servers);
        nodes
            .iter()
            .map(|node| {
                let config = builder.build(node);
                if !config.is_server() && config.retry_join.is_empty() {
                    return Err(BootstrapError::UnjoinableClient {
                        node: node.name.clone(),
                    });
                }
                Ok(NodePlan {
                    node: node.clone(),
                    config,
                })
            })
            .collect()
    }

    /// Steps 2-3, one task per node
    async fn start_discovery_services(&self, plans: Vec<NodePlan>) -> Vec<NodeOutcome> {
        let handles: Vec<(NodePlan, JoinHandle<NodeOutcome>)> = plans
            .into_iter()
            .map(|plan| {
                let worker = self.worker.clone();
                let task_plan = plan.clone();
                let handle = tokio::spawn(async move { worker.start_discovery(task_plan).await });
                (plan, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (plan, handle) in handles {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let mut outcome = NodeOutcome::new(&plan);
                    outcome.error = Some(BootstrapError::WorkerAborted {
                        node: plan.node.name.clone(),
                        reason: e.to_string(),
                    });
                    outcome
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Step 4, one task per node whose Consul instance started
    async fn repoint_agents(&self, outcomes: &mut [NodeOutcome], target: &JoinTarget) {
        let target = Arc::new(target.clone());

        let handles: Vec<(usize, JoinHandle<Result<String>>)> = outcomes
            .iter()
            .enumerate()
            .filter(|(_, o)| o.error.is_none())
            .filter_map(|(i, o)| o.discovery.clone().map(|placed| (i, placed)))
            .map(|(i, placed)| {
                let worker = self.worker.clone();
                let target = target.clone();
                let handle =
                    tokio::spawn(async move { worker.repoint_agent(placed, target).await });
                (i, handle)
            })
            .collect();

        for (i, handle) in handles {
            let outcome = &mut outcomes[i];
            let result = handle.await.unwrap_or_else(|e| {
                Err(BootstrapError::WorkerAborted {
                    node: outcome.node.name.clone(),
                    reason: e.to_string(),
                })
            });
            match result {
                Ok(id) => outcome.agent_container = Some(id),
                Err(e) => {
                    self.worker.logger.log_node_failed(&outcome.node.name, &e);
                    outcome.error = Some(e);
                }
            }
        }
    }

    /// Step 5
    async fn promote_manager(&self, target: &JoinTarget) -> Result<String> {
        let settings = &self.worker.settings;
        let spec = PromoteManager {
            target,
            image: &settings.swarm_image,
            name: &settings.manager_name,
            temporary_manager: &settings.temporary_manager,
            bind_port: settings.bind_manager_port,
        }
        .container_spec();
        debug!(discovery = %target.discovery_url(), "Creating Swarm manager container");

        let id = self
            .worker
            .step(
                Step::PromoteManager,
                &settings.temporary_manager,
                self.worker.provisioner.provision(&spec),
            )
            .await?;
        self.worker
            .metrics
            .inc_containers_provisioned(Step::PromoteManager);
        self.worker
            .logger
            .log_manager_promoted(&id, &target.discovery_url());
        Ok(id)
    }
}

/// Pick the Consul instance agents and the manager join
///
/// Prefers an instance running on a server node, falling back to the first
/// instance that started.
fn select_join_target(outcomes: &[NodeOutcome], servers: &ServerSet) -> Option<JoinTarget> {
    let started: Vec<&PlacedContainer> = outcomes
        .iter()
        .filter(|o| o.error.is_none())
        .filter_map(|o| o.discovery.as_ref())
        .collect();

    started
        .iter()
        .find(|placed| servers.matches(&placed.node.address))
        .or_else(|| started.first())
        .map(|placed| JoinTarget::new(placed.node.host()))
}
