//! Container specs for each provisioning step
//!
//! Each step takes everything it needs as explicit inputs and renders the
//! container spec to submit; none of them talks to the container API.

use crate::consul::{
    DiscoveryServiceConfig, CONFIG_CONTAINER_DIR, CONFIG_CONTAINER_PATH, CONFIG_HOST_DIR,
    CONFIG_HOST_PATH, HTTP_PORT, RPC_PORT,
};
use crate::models::{ClusterNode, ContainerSpec, PlacedContainer};

/// Port the permanent manager serves the Docker API on
pub const MANAGER_PORT: u16 = 3376;

/// Name prefix of the per-node Consul containers
pub const CONSUL_CONTAINER_PREFIX: &str = "consul-";
/// Name prefix of the per-node Swarm agent containers
pub const AGENT_CONTAINER_PREFIX: &str = "swarm-agent-";

/// Env entry pinning a container to a node
pub fn node_constraint(node: &str) -> String {
    format!("constraint:node=={}", node)
}

/// Env entry co-locating a container with another container
pub fn container_affinity(container: &str) -> String {
    format!("affinity:container=={}", container)
}

/// Quote `value` as a single POSIX shell word
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// The Consul instance every agent and the manager register with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTarget {
    /// Host (no port) of the chosen Consul instance
    pub host: String,
}

impl JoinTarget {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Consul HTTP address, `host:8500`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, HTTP_PORT)
    }

    /// Swarm discovery URL backed by this Consul instance
    pub fn discovery_url(&self) -> String {
        format!("consul://{}/swarm", self.address())
    }
}

/// Writes a node's Consul config to `/etc/consul/consul.json` on that node
pub struct DistributeConfig<'a> {
    pub node: &'a ClusterNode,
    pub config: &'a DiscoveryServiceConfig,
    pub image: &'a str,
}

impl DistributeConfig<'_> {
    pub fn container_spec(&self) -> serde_json::Result<ContainerSpec> {
        let json = self.config.to_json()?;
        let script = format!(
            "echo {} > {} && cat {}",
            shell_quote(&json),
            CONFIG_CONTAINER_PATH,
            CONFIG_CONTAINER_PATH
        );

        Ok(ContainerSpec::new(self.image)
            .command(["sh", "-c", script.as_str()])
            .env(node_constraint(&self.node.name))
            .bind(format!("{}:{}", CONFIG_HOST_DIR, CONFIG_CONTAINER_DIR)))
    }
}

/// Long-running Consul agent reading the distributed config
pub struct StartDiscoveryService<'a> {
    pub node: &'a ClusterNode,
    pub image: &'a str,
}

impl StartDiscoveryService<'_> {
    pub fn container_name(&self) -> String {
        format!("{}{}", CONSUL_CONTAINER_PREFIX, self.node.name)
    }

    pub fn container_spec(&self) -> ContainerSpec {
        let http_port = HTTP_PORT as u16;

        ContainerSpec::new(self.image)
            .named(self.container_name())
            .env(node_constraint(&self.node.name))
            .bind(format!("{}:{}:ro", CONFIG_HOST_PATH, CONFIG_CONTAINER_PATH))
            .publish(format!("{}/tcp", http_port), "0.0.0.0", http_port)
            .publish(format!("{}/tcp", RPC_PORT), "0.0.0.0", RPC_PORT)
            .restart_always()
            .network_mode("host")
    }
}

/// Swarm agent re-registering a node against Consul
pub struct RepointAgent<'a> {
    /// Node the node's Consul instance was placed on
    pub placed: &'a PlacedContainer,
    pub target: &'a JoinTarget,
    pub image: &'a str,
}

impl RepointAgent<'_> {
    pub fn container_name(&self) -> String {
        format!("{}{}", AGENT_CONTAINER_PREFIX, self.placed.node.name)
    }

    pub fn container_spec(&self) -> ContainerSpec {
        let node = &self.placed.node;

        ContainerSpec::new(self.image)
            .named(self.container_name())
            .command([
                "join".to_string(),
                format!("--addr={}", node.address),
                self.target.discovery_url(),
            ])
            .env(node_constraint(&node.name))
    }
}

/// Permanent Swarm manager, placed next to the temporary one
pub struct PromoteManager<'a> {
    pub target: &'a JoinTarget,
    pub image: &'a str,
    pub name: &'a str,
    pub temporary_manager: &'a str,
    /// Publish the management port on the host
    pub bind_port: bool,
}

impl PromoteManager<'_> {
    pub fn container_spec(&self) -> ContainerSpec {
        let port = format!("{}/tcp", MANAGER_PORT);

        let spec = ContainerSpec::new(self.image)
            .named(self.name)
            .command([
                "--debug".to_string(),
                "manage".to_string(),
                "-H".to_string(),
                format!("tcp://0.0.0.0:{}", MANAGER_PORT),
                self.target.discovery_url(),
            ])
            .env(container_affinity(self.temporary_manager));

        if self.bind_port {
            spec.publish(port, "0.0.0.0", MANAGER_PORT)
        } else {
            spec.expose(port)
        }
    }
}
