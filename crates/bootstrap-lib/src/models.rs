//! Core data models for the bootstrap procedure

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

/// A host participating in the cluster, as reported by the temporary manager
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Node name, unique within the cluster
    pub name: String,
    /// Reachable `host:port` address of the node's Docker engine
    pub address: String,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
        }
    }

    /// The address with any `:port` suffix removed
    pub fn host(&self) -> &str {
        match self.address.split_once(':') {
            Some((host, _)) => host,
            None => &self.address,
        }
    }
}

/// Raw `DriverStatus` rows returned by the temporary manager's `/info` call
///
/// The rows are position-encoded: a `("Nodes", count)` sentinel followed by
/// one four-row block per node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscoveryReport {
    rows: Vec<(String, String)>,
}

impl DiscoveryReport {
    pub fn new(rows: Vec<(String, String)>) -> Self {
        Self { rows }
    }

    /// Build a report from borrowed string pairs
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            rows: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn rows(&self) -> &[(String, String)] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&(String, String)> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Host-side port binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: String,
}

/// Container restart policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartPolicy {
    pub name: String,
}

impl RestartPolicy {
    pub fn always() -> Self {
        Self {
            name: "always".to_string(),
        }
    }
}

/// Host-level settings of a container (binds, published ports, restart, network)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub binds: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub port_bindings: BTreeMap<String, Vec<PortBinding>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
}

impl HostConfig {
    pub fn is_empty(&self) -> bool {
        self.binds.is_empty()
            && self.port_bindings.is_empty()
            && self.restart_policy.is_none()
            && self.network_mode.is_none()
    }
}

/// Declarative container description submitted to the container API
///
/// Serializes to the body of `POST /containers/create`. The name travels in
/// the query string, so it is not part of the body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSpec {
    #[serde(skip)]
    pub name: Option<String>,
    pub image: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(
        skip_serializing_if = "BTreeSet::is_empty",
        serialize_with = "serialize_port_set"
    )]
    pub exposed_ports: BTreeSet<String>,
    #[serde(skip_serializing_if = "HostConfig::is_empty")]
    pub host_config: HostConfig,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmd = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, entry: impl Into<String>) -> Self {
        self.env.push(entry.into());
        self
    }

    pub fn bind(mut self, bind: impl Into<String>) -> Self {
        self.host_config.binds.push(bind.into());
        self
    }

    /// Expose a container port (e.g. `8500/tcp`) without publishing it
    pub fn expose(mut self, port: impl Into<String>) -> Self {
        self.exposed_ports.insert(port.into());
        self
    }

    /// Expose a container port and bind it on the host
    pub fn publish(mut self, port: impl Into<String>, host_ip: &str, host_port: u16) -> Self {
        let port = port.into();
        self.exposed_ports.insert(port.clone());
        self.host_config
            .port_bindings
            .entry(port)
            .or_default()
            .push(PortBinding {
                host_ip: host_ip.to_string(),
                host_port: host_port.to_string(),
            });
        self
    }

    pub fn restart_always(mut self) -> Self {
        self.host_config.restart_policy = Some(RestartPolicy::always());
        self
    }

    pub fn network_mode(mut self, mode: impl Into<String>) -> Self {
        self.host_config.network_mode = Some(mode.into());
        self
    }

    /// Name for logging: the container name, or the image for unnamed containers
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.image)
    }
}

// Docker encodes port sets as `{"8500/tcp": {}}`
fn serialize_port_set<S: Serializer>(
    ports: &BTreeSet<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(ports.len()))?;
    for port in ports {
        map.serialize_entry(port, &serde_json::Map::new())?;
    }
    map.end()
}

/// A container as resolved by the container API, including its placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedContainer {
    pub id: String,
    pub name: String,
    /// Node the scheduler placed the container on
    pub node: ClusterNode,
}
