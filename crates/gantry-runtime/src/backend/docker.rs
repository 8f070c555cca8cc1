//! Docker Engine backend built on `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    NetworkingConfig, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use bollard::network::CreateNetworkOptions;
use futures::{StreamExt, TryStreamExt};
use gantry_common::constants::{DEFAULT_HOST, NETWORK_DRIVER, RUN_LABEL};
use gantry_common::error::{GantryError, Result};
use gantry_common::types::{ContainerId, ExposedPort};

use super::{ContainerRequest, ContainerRuntime, NetworkHandle};
use crate::logs::{LogStream, frame_lines};

/// Backend that drives a Docker-compatible engine over its HTTP API.
pub struct DockerRuntime {
    docker: Docker,
    host: String,
}

impl DockerRuntime {
    /// Connects using `DOCKER_HOST` or the platform's default socket.
    ///
    /// # Errors
    ///
    /// Returns an error if no engine connection can be configured.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| GantryError::runtime("connect", "docker", e))?;
        Ok(Self {
            docker,
            host: published_host(std::env::var("DOCKER_HOST").ok().as_deref()),
        })
    }

    /// Overrides the host name used in resolved endpoints.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Checks that the engine answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine does not respond to a ping.
    pub async fn ping(&self) -> Result<()> {
        let _ = self
            .docker
            .ping()
            .await
            .map_err(|e| GantryError::runtime("ping", "docker", e))?;
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        let (repository, tag) = split_image_ref(image);
        tracing::info!(image, "pulling image");

        let options = CreateImageOptions {
            from_image: repository.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(update) = progress
            .try_next()
            .await
            .map_err(|e| GantryError::runtime("pull_image", image, e))?
        {
            if let Some(status) = update.status {
                tracing::trace!(image, %status, "pull progress");
            }
        }

        tracing::debug!(image, "image pulled");
        Ok(())
    }

    async fn create_and_start(&self, request: &ContainerRequest) -> Result<ContainerId> {
        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };
        let created = self
            .docker
            .create_container(Some(options), container_config(request))
            .await
            .map_err(|e| GantryError::runtime("create_container", &request.name, e))?;
        let id = ContainerId::new(created.id);

        if let Err(e) = self
            .docker
            .start_container(id.as_str(), None::<StartContainerOptions<String>>)
            .await
        {
            // The container exists but never ran; nobody else knows about it.
            if let Err(cleanup) = self.terminate_container(&id).await {
                tracing::warn!(id = %id, error = %cleanup, "failed to remove unstarted container");
            }
            return Err(GantryError::runtime("start_container", &request.name, e));
        }

        Ok(id)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: NETWORK_DRIVER.to_string(),
            attachable: true,
            labels: HashMap::from([(RUN_LABEL.to_string(), name.to_string())]),
            ..Default::default()
        };
        let _created = self
            .docker
            .create_network(options)
            .await
            .map_err(|e| GantryError::runtime("create_network", name, e))?;
        tracing::debug!(network = name, "network created");
        Ok(NetworkHandle {
            name: name.to_string(),
        })
    }

    async fn remove_network(&self, network: &NetworkHandle) -> Result<()> {
        self.docker
            .remove_network(&network.name)
            .await
            .map_err(|e| GantryError::runtime("remove_network", &network.name, e))
    }

    async fn start_container(&self, request: &ContainerRequest) -> Result<ContainerId> {
        if request.auto_pull {
            self.pull_image(&request.image).await?;
        }
        let id = self.create_and_start(request).await?;
        tracing::debug!(id = %id, name = %request.name, image = %request.image, "container running");
        Ok(id)
    }

    async fn terminate_container(&self, id: &ContainerId) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id.as_str(), Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                tracing::debug!(id = %id, "container already removed");
                Ok(())
            }
            Err(e) => Err(GantryError::runtime("terminate_container", id.as_str(), e)),
        }
    }

    async fn resolve_endpoint(
        &self,
        id: &ContainerId,
        port: ExposedPort,
        scheme: &str,
    ) -> Result<String> {
        let info = self
            .docker
            .inspect_container(id.as_str(), None::<InspectContainerOptions>)
            .await
            .map_err(|e| GantryError::runtime("inspect_container", id.as_str(), e))?;

        let ports = info
            .network_settings
            .and_then(|settings| settings.ports)
            .unwrap_or_default();
        let host_port = pick_host_port(&ports, port).ok_or_else(|| GantryError::NotFound {
            kind: "published port",
            id: format!("{port} on container {id}"),
        })?;

        Ok(format!("{scheme}://{}:{host_port}", self.host))
    }

    async fn stream_logs(&self, id: &ContainerId) -> Result<LogStream> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        };
        let chunks = self
            .docker
            .logs(id.as_str(), Some(options))
            .map(|chunk| chunk.map(LogOutput::into_bytes));
        Ok(frame_lines(chunks, id.as_str()))
    }
}

fn container_config(request: &ContainerRequest) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .exposed_ports
        .iter()
        .map(|p| (p.to_string(), HashMap::new()))
        .collect();

    let env: Vec<String> = request
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();

    let aliases = request.hostname.clone().map(|h| vec![h]);
    let endpoints_config = HashMap::from([(
        request.network.clone(),
        EndpointSettings {
            aliases,
            ..Default::default()
        },
    )]);

    let host_config = HostConfig {
        network_mode: Some(request.network.clone()),
        publish_all_ports: Some(true),
        auto_remove: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(request.image.clone()),
        hostname: request.hostname.clone(),
        env: if env.is_empty() { None } else { Some(env) },
        exposed_ports: Some(exposed_ports),
        labels: Some(HashMap::from([(
            RUN_LABEL.to_string(),
            request.network.clone(),
        )])),
        host_config: Some(host_config),
        networking_config: Some(NetworkingConfig { endpoints_config }),
        ..Default::default()
    }
}

/// Splits `repo[:tag]` into repository and tag, defaulting the tag to
/// `latest`. Registry ports (`registry:5000/app`) and digests are respected.
fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

/// Finds the first host port bound to `port`.
fn pick_host_port(
    ports: &HashMap<String, Option<Vec<PortBinding>>>,
    port: ExposedPort,
) -> Option<String> {
    ports
        .get(&port.to_string())?
        .as_ref()?
        .iter()
        .find_map(|binding| binding.host_port.clone().filter(|p| !p.is_empty()))
}

/// Host name endpoints are published on for a given `DOCKER_HOST`.
fn published_host(docker_host: Option<&str>) -> String {
    docker_host
        .and_then(|h| h.strip_prefix("tcp://"))
        .and_then(|rest| rest.split(':').next())
        .filter(|h| !h.is_empty())
        .unwrap_or(DEFAULT_HOST)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(port: &str) -> PortBinding {
        PortBinding {
            host_ip: Some("0.0.0.0".into()),
            host_port: Some(port.into()),
        }
    }

    #[test]
    fn split_image_ref_defaults_to_latest() {
        assert_eq!(split_image_ref("demo-policy"), ("demo-policy", "latest"));
        assert_eq!(
            split_image_ref("ikolomiyets/demo-policy:1.4.2"),
            ("ikolomiyets/demo-policy", "1.4.2")
        );
    }

    #[test]
    fn split_image_ref_ignores_registry_port() {
        assert_eq!(
            split_image_ref("registry.local:5000/team/app"),
            ("registry.local:5000/team/app", "latest")
        );
        assert_eq!(
            split_image_ref("registry.local:5000/team/app:2"),
            ("registry.local:5000/team/app", "2")
        );
    }

    #[test]
    fn pick_host_port_finds_binding() {
        let ports = HashMap::from([(
            "8080/tcp".to_string(),
            Some(vec![binding(""), binding("49154")]),
        )]);
        assert_eq!(
            pick_host_port(&ports, ExposedPort::tcp(8080)).as_deref(),
            Some("49154")
        );
    }

    #[test]
    fn pick_host_port_missing_or_unbound() {
        let ports = HashMap::from([("3000/tcp".to_string(), None)]);
        assert_eq!(pick_host_port(&ports, ExposedPort::tcp(3000)), None);
        assert_eq!(pick_host_port(&ports, ExposedPort::tcp(80)), None);
    }

    #[test]
    fn published_host_follows_tcp_docker_host() {
        assert_eq!(published_host(None), "localhost");
        assert_eq!(published_host(Some("unix:///var/run/docker.sock")), "localhost");
        assert_eq!(published_host(Some("tcp://10.0.0.5:2376")), "10.0.0.5");
    }

    #[test]
    fn container_config_carries_network_alias_and_env() {
        let request = ContainerRequest {
            name: "demo-policy-ab12cd34".into(),
            image: "ikolomiyets/demo-policy:1.0".into(),
            hostname: Some("policies".into()),
            exposed_ports: vec![ExposedPort::tcp(8080)],
            env: [("DEBUG".to_string(), "true".to_string())].into(),
            network: "test-network-ab12cd34".into(),
            auto_pull: true,
        };
        let config = container_config(&request);
        assert_eq!(config.env, Some(vec!["DEBUG=true".to_string()]));
        assert_eq!(config.hostname.as_deref(), Some("policies"));
        let endpoints = config.networking_config.expect("networking").endpoints_config;
        let settings = endpoints.get("test-network-ab12cd34").expect("network endpoint");
        assert_eq!(settings.aliases, Some(vec!["policies".to_string()]));
        assert!(
            config
                .exposed_ports
                .expect("ports")
                .contains_key("8080/tcp")
        );
    }
}
