//! Consul configuration derivation
//!
//! Every node gets its own Consul agent config. Nodes whose address matches
//! an entry of the caller's [`ServerSet`] run as servers and expect the full
//! server count before bootstrapping; all other nodes run as clients. Every
//! node retries joining the servers other than itself.

use crate::models::ClusterNode;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DATA_DIR: &str = "/data";
pub const UI_DIR: &str = "/ui";
pub const CLIENT_ADDR: &str = "0.0.0.0";
pub const DNS_RECURSOR: &str = "8.8.8.8";
pub const DNS_PORT: i32 = 53;
pub const HTTP_PORT: i32 = 8500;
/// HTTPS listener disabled
pub const HTTPS_PORT: i32 = -1;
pub const RPC_PORT: u16 = 8400;

/// Host directory holding the generated config
pub const CONFIG_HOST_DIR: &str = "/etc/consul";
pub const CONFIG_HOST_PATH: &str = "/etc/consul/consul.json";
/// Where the config directory/file appears inside containers
pub const CONFIG_CONTAINER_DIR: &str = "/config";
pub const CONFIG_CONTAINER_PATH: &str = "/config/consul.json";

/// Listener ports of a Consul agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub dns: i32,
    pub http: i32,
    pub https: i32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            dns: DNS_PORT,
            http: HTTP_PORT,
            https: HTTPS_PORT,
        }
    }
}

/// Consul agent configuration for one node
///
/// Field order is the serialization order, so the same input always renders
/// to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryServiceConfig {
    pub advertise_addr: String,
    pub data_dir: String,
    pub ui_dir: String,
    pub client_addr: String,
    pub recursor: String,
    pub disable_update_check: bool,
    pub retry_join: Vec<String>,
    pub ports: PortConfig,
    #[serde(default, skip_serializing_if = "is_false")]
    pub server: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_expect: Option<usize>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DiscoveryServiceConfig {
    /// Client-role config with the fixed settings and the given join list
    fn client(advertise_addr: &str, retry_join: Vec<String>) -> Self {
        Self {
            advertise_addr: advertise_addr.to_string(),
            data_dir: DATA_DIR.to_string(),
            ui_dir: UI_DIR.to_string(),
            client_addr: CLIENT_ADDR.to_string(),
            recursor: DNS_RECURSOR.to_string(),
            disable_update_check: true,
            retry_join,
            ports: PortConfig::default(),
            server: false,
            bootstrap_expect: None,
        }
    }

    pub fn is_server(&self) -> bool {
        self.server
    }

    /// Render as two-space indented JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Addresses of the nodes that run Consul in server mode
///
/// Chosen by the operator, not derived from the node list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerSet {
    addresses: Vec<String>,
}

impl ServerSet {
    /// Build a server set, trimming entries and dropping blanks and duplicates
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Vec::new();
        for address in addresses {
            let address = address.as_ref().trim();
            if !address.is_empty() && !set.iter().any(|a: &String| a == address) {
                set.push(address.to_string());
            }
        }
        Self { addresses: set }
    }

    /// Parse a comma separated list such as `10.0.0.1,10.0.0.2`
    pub fn parse(list: &str) -> Self {
        Self::new(list.split(','))
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(String::as_str)
    }

    /// Whether `address` belongs to a server
    ///
    /// Node addresses carry the engine port (`10.0.0.1:2375`) while server
    /// entries usually do not, so this is a containment test.
    pub fn matches(&self, address: &str) -> bool {
        self.iter().any(|server| address.contains(server))
    }
}

/// Derives per-node Consul configs from one shared node list and server set
///
/// Every server config built by the same builder carries the same
/// `bootstrap_expect`, so the servers form one group.
pub struct DiscoveryConfigBuilder<'a> {
    all_nodes: &'a [ClusterNode],
    servers: &'a ServerSet,
}

impl<'a> DiscoveryConfigBuilder<'a> {
    pub fn new(all_nodes: &'a [ClusterNode], servers: &'a ServerSet) -> Self {
        Self { all_nodes, servers }
    }

    /// Build the config for `target`
    pub fn build(&self, target: &ClusterNode) -> DiscoveryServiceConfig {
        if self.all_nodes.is_empty() {
            debug!(node = %target.name, "No cluster nodes known, building isolated client config");
            return DiscoveryServiceConfig::client(target.host(), Vec::new());
        }

        let mut server = false;
        let mut retry_join = Vec::new();
        for candidate in self.servers.iter() {
            if target.address.contains(candidate) {
                server = true;
            } else {
                retry_join.push(candidate.to_string());
            }
        }
        debug!(node = %target.name, retry_join = ?retry_join, "Derived retry-join addresses");

        let mut config = DiscoveryServiceConfig::client(target.host(), retry_join);
        if server {
            debug!(
                node = %target.name,
                bootstrap_expect = self.servers.len(),
                "Node is a Consul server"
            );
            config.server = true;
            config.bootstrap_expect = Some(self.servers.len());
        }
        config
    }
}
