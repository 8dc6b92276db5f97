//! HTTP client for the Docker Remote API served by a Swarm manager

use super::ContainerApi;
use crate::error::ApiError;
use crate::models::{ClusterNode, ContainerSpec, DiscoveryReport, HostConfig, PlacedContainer};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Docker Remote API client
pub struct DockerApiClient {
    client: Client,
    base_url: Url,
}

impl DockerApiClient {
    /// Create a client for `base_url`
    ///
    /// Accepts `tcp://host:port` as used in `DOCKER_HOST` and treats it as
    /// plain HTTP.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;

        let normalized = match base_url.strip_prefix("tcp://") {
            Some(rest) => format!("http://{}", rest),
            None => base_url.to_string(),
        };
        let mut base_url =
            Url::parse(&normalized).map_err(|e| ApiError::Endpoint(format!("{}: {}", base_url, e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::Endpoint(format!("{}: {}", path, e)))
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(rename = "DriverStatus", default)]
    driver_status: Option<DiscoveryReport>,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Node")]
    node: Option<NodeResponse>,
}

#[derive(Debug, Deserialize)]
struct NodeResponse {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Addr")]
    addr: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| ApiError::Decode(e.to_string()))
}

/// Turn a non-success response into an error, preferring the API's `message`
async fn status_error(response: Response) -> ApiError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string());
    ApiError::Status { status, message }
}

#[async_trait]
impl ContainerApi for DockerApiClient {
    async fn get_info(&self) -> Result<DiscoveryReport, ApiError> {
        let response = self.client.get(self.url("info")?).send().await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let info: InfoResponse = read_json(response).await?;
        Ok(info.driver_status.unwrap_or_default())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ApiError> {
        let mut url = self.url("containers/create")?;
        if let Some(name) = &spec.name {
            url.query_pairs_mut().append_pair("name", name);
        }
        debug!(container = %spec.display_name(), image = %spec.image, "Creating container");

        let response = self.client.post(url).json(spec).send().await?;
        match response.status() {
            status if status.is_success() => {
                let created: CreateResponse = read_json(response).await?;
                Ok(created.id)
            }
            StatusCode::CONFLICT => Err(ApiError::Conflict(spec.display_name().to_string())),
            _ => Err(status_error(response).await),
        }
    }

    async fn start_container(
        &self,
        id: &str,
        overrides: Option<&HostConfig>,
    ) -> Result<(), ApiError> {
        let url = self.url(&format!("containers/{}/start", id))?;
        let mut request = self.client.post(url);
        if let Some(host_config) = overrides.filter(|h| !h.is_empty()) {
            request = request.json(host_config);
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_MODIFIED => {
                debug!(container_id = %id, "Container already running");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound(id.to_string())),
            status if status.is_success() => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn inspect_container(&self, id: &str) -> Result<PlacedContainer, ApiError> {
        let url = self.url(&format!("containers/{}/json", id))?;
        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let inspected: InspectResponse = read_json(response).await?;
        let node = inspected
            .node
            .ok_or_else(|| ApiError::Decode(format!("container {} has no node placement", id)))?;

        Ok(PlacedContainer {
            id: inspected.id,
            name: inspected.name.trim_start_matches('/').to_string(),
            node: ClusterNode::new(node.name, node.addr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn client(server: &mockito::Server) -> DockerApiClient {
        DockerApiClient::new(&server.url(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_tcp_scheme_is_plain_http() {
        let client = DockerApiClient::new("tcp://10.0.0.1:3376", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url().as_str(), "http://10.0.0.1:3376/");
    }

    #[test]
    fn test_invalid_endpoint() {
        let result = DockerApiClient::new("not a url", Duration::from_secs(5));
        assert!(matches!(result, Err(ApiError::Endpoint(_))));
    }

    #[tokio::test]
    async fn test_get_info_decodes_driver_status() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/info")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "Containers": 1,
                    "DriverStatus": [
                        ["Nodes", "1"],
                        ["nodeA", "10.0.0.1:2375"],
                        [" └ Containers", "1"],
                        [" └ Reserved CPUs", "0 / 2"],
                        [" └ Reserved Memory", "0 B / 2.05 GiB"]
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let report = client(&server).get_info().await.unwrap();

        mock.assert_async().await;
        assert_eq!(report.len(), 5);
        assert_eq!(report.row(0).unwrap().0, "Nodes");
    }

    #[tokio::test]
    async fn test_get_info_without_driver_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/info")
            .with_status(200)
            .with_body(r#"{"DriverStatus": null}"#)
            .create_async()
            .await;

        let report = client(&server).get_info().await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_create_sends_name_and_spec() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/containers/create")
            .match_query(Matcher::UrlEncoded("name".into(), "consul-nodeA".into()))
            .match_body(Matcher::PartialJson(json!({
                "Image": "sequenceiq/consul",
                "Env": ["constraint:node==nodeA"],
                "ExposedPorts": {"8500/tcp": {}},
                "HostConfig": {"NetworkMode": "host"}
            })))
            .with_status(201)
            .with_body(r#"{"Id": "abc123", "Warnings": null}"#)
            .create_async()
            .await;

        let spec = ContainerSpec::new("sequenceiq/consul")
            .named("consul-nodeA")
            .env("constraint:node==nodeA")
            .expose("8500/tcp")
            .network_mode("host");
        let id = client(&server).create_container(&spec).await.unwrap();

        mock.assert_async().await;
        assert_eq!(id, "abc123");
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/create")
            .match_query(Matcher::Any)
            .with_status(409)
            .with_body(r#"{"message": "Conflict. The name is already in use"}"#)
            .create_async()
            .await;

        let spec = ContainerSpec::new("swarm").named("swarm-manager");
        let err = client(&server).create_container(&spec).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(name) if name == "swarm-manager"));
    }

    #[tokio::test]
    async fn test_create_failure_keeps_api_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/create")
            .with_status(500)
            .with_body(r#"{"message": "unable to find a node that satisfies node==nodeZ"}"#)
            .create_async()
            .await;

        let err = client(&server)
            .create_container(&ContainerSpec::new("alpine"))
            .await
            .unwrap_err();
        match err {
            ApiError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "unable to find a node that satisfies node==nodeZ");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_accepts_already_running() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/abc123/start")
            .with_status(304)
            .create_async()
            .await;

        client(&server).start_container("abc123", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_start_sends_overrides() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/containers/abc123/start")
            .match_body(Matcher::Json(json!({"Binds": ["/etc/consul:/config"]})))
            .with_status(204)
            .create_async()
            .await;

        let overrides = HostConfig {
            binds: vec!["/etc/consul:/config".to_string()],
            ..Default::default()
        };
        client(&server)
            .start_container("abc123", Some(&overrides))
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_start_missing_container() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/containers/gone/start")
            .with_status(404)
            .with_body(r#"{"message": "No such container: gone"}"#)
            .create_async()
            .await;

        let err = client(&server).start_container("gone", None).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_inspect_resolves_node() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/abc123/json")
            .with_status(200)
            .with_body(
                json!({
                    "Id": "abc123",
                    "Name": "/consul-nodeA",
                    "Node": {"ID": "X1", "Name": "nodeA", "Addr": "10.0.0.1:2375", "IP": "10.0.0.1"}
                })
                .to_string(),
            )
            .create_async()
            .await;

        let placed = client(&server).inspect_container("abc123").await.unwrap();
        assert_eq!(placed.name, "consul-nodeA");
        assert_eq!(placed.node, ClusterNode::new("nodeA", "10.0.0.1:2375"));
    }

    #[tokio::test]
    async fn test_inspect_without_placement_fails() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/containers/abc123/json")
            .with_status(200)
            .with_body(r#"{"Id": "abc123", "Name": "/consul"}"#)
            .create_async()
            .await;

        let err = client(&server).inspect_container("abc123").await.unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }
}
