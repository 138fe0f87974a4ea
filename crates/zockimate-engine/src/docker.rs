//! Engine adapter: everything the update/rollback engines need from the
//! container engine, on top of a shared bollard client.

use std::collections::HashMap;
use std::time::Duration;

use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions,
    NetworkingConfig, RemoveContainerOptions, RenameContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::models::{
    ContainerConfig, ContainerInspectResponse, ContainerState, ContainerSummary,
    EndpointSettings, HealthStatusEnum, HostConfig,
};
use bollard::Docker;
use serde::{Deserialize, Serialize};
use tracing::debug;

use zockimate_common::options::DEFAULT_STOP_TIMEOUT;
use zockimate_common::{Result, ZockimateError};

const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Envelope around the per-network endpoint settings, shaped exactly like
/// the `NetworkingConfig` that container creation consumes so stored blobs
/// can be replayed verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkEnvelope {
    #[serde(rename = "EndpointsConfig", default)]
    pub endpoints_config: HashMap<String, EndpointSettings>,
}

#[derive(Clone)]
pub struct DockerClient {
    docker: Docker,
}

impl DockerClient {
    /// Connects via the environment defaults and verifies the daemon is
    /// reachable.
    pub async fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ZockimateError::Engine(format!("failed to create client: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| ZockimateError::Engine(format!("failed to reach daemon: {e}")))?;
        debug!("connected to container engine");
        Ok(Self { docker })
    }

    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    pub async fn inspect(&self, name: &str) -> Result<ContainerInspectResponse> {
        self.docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ZockimateError::ContainerNotFound(name.to_string())
                } else {
                    ZockimateError::Engine(format!("failed to inspect container {name}: {e}"))
                }
            })
    }

    pub async fn list(&self, all: bool) -> Result<Vec<ContainerSummary>> {
        self.docker
            .list_containers(Some(ListContainersOptions::<String> {
                all,
                ..Default::default()
            }))
            .await
            .map_err(|e| ZockimateError::Engine(format!("failed to list containers: {e}")))
    }

    /// Serializes the three config blobs needed to recreate the container:
    /// its config, host config, and the endpoints map wrapped in the
    /// envelope `recreate` consumes.
    pub fn configs(ctn: &ContainerInspectResponse) -> Result<(Vec<u8>, Vec<u8>, Vec<u8>)> {
        let config = serde_json::to_vec(&ctn.config)
            .map_err(|e| ZockimateError::Engine(format!("failed to serialize config: {e}")))?;
        let host_config = serde_json::to_vec(&ctn.host_config).map_err(|e| {
            ZockimateError::Engine(format!("failed to serialize host config: {e}"))
        })?;
        let envelope = NetworkEnvelope {
            endpoints_config: ctn
                .network_settings
                .as_ref()
                .and_then(|s| s.networks.clone())
                .unwrap_or_default(),
        };
        let network_config = serde_json::to_vec(&envelope).map_err(|e| {
            ZockimateError::Engine(format!("failed to serialize network config: {e}"))
        })?;
        Ok((config, host_config, network_config))
    }

    pub fn decode_configs(
        config: &[u8],
        host_config: &[u8],
        network_config: &[u8],
    ) -> Result<(ContainerConfig, HostConfig, NetworkEnvelope)> {
        let config: ContainerConfig = serde_json::from_slice(config)
            .map_err(|e| ZockimateError::Engine(format!("failed to decode config: {e}")))?;
        let host_config: HostConfig = serde_json::from_slice(host_config)
            .map_err(|e| ZockimateError::Engine(format!("failed to decode host config: {e}")))?;
        let network: NetworkEnvelope = serde_json::from_slice(network_config).map_err(|e| {
            ZockimateError::Engine(format!("failed to decode network config: {e}"))
        })?;
        Ok((config, host_config, network))
    }

    /// Stops and removes any container holding `name`, then creates and
    /// starts a new one from the supplied configs.
    pub async fn recreate(
        &self,
        name: &str,
        config: ContainerConfig,
        host_config: HostConfig,
        network: NetworkEnvelope,
    ) -> Result<()> {
        match self.inspect(name).await {
            Ok(_) => {
                if let Err(e) = self
                    .docker
                    .stop_container(
                        name,
                        Some(StopContainerOptions {
                            t: DEFAULT_STOP_TIMEOUT.as_secs() as i64,
                        }),
                    )
                    .await
                {
                    // 304: already stopped.
                    if !is_not_modified(&e) && !is_not_found(&e) {
                        return Err(ZockimateError::Engine(format!(
                            "failed to stop container {name}: {e}"
                        )));
                    }
                }
                self.docker
                    .remove_container(
                        name,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await
                    .map_err(|e| {
                        ZockimateError::Engine(format!("failed to remove container {name}: {e}"))
                    })?;
            }
            Err(ZockimateError::ContainerNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut create: Config<String> = config.into();
        create.host_config = Some(host_config);
        create.networking_config = Some(NetworkingConfig {
            endpoints_config: network.endpoints_config,
        });

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                create,
            )
            .await
            .map_err(|e| {
                ZockimateError::Engine(format!("failed to create container {name}: {e}"))
            })?;

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| {
                ZockimateError::Engine(format!("failed to start container {name}: {e}"))
            })?;

        debug!(container = name, "recreated container");
        Ok(())
    }

    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        self.docker
            .rename_container(
                old,
                RenameContainerOptions {
                    name: new.to_string(),
                },
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ZockimateError::ContainerNotFound(old.to_string())
                } else {
                    ZockimateError::Engine(format!("failed to rename container {old}: {e}"))
                }
            })
    }

    /// Stops (graceful) and force-removes a container.
    pub async fn remove(&self, name: &str) -> Result<()> {
        if let Err(e) = self
            .docker
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: DEFAULT_STOP_TIMEOUT.as_secs() as i64,
                }),
            )
            .await
        {
            if !is_not_found(&e) && !is_not_modified(&e) {
                return Err(ZockimateError::Engine(format!(
                    "failed to stop container {name}: {e}"
                )));
            }
        }
        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    ZockimateError::ContainerNotFound(name.to_string())
                } else {
                    ZockimateError::Engine(format!("failed to remove container {name}: {e}"))
                }
            })
    }

    /// Polls once per second until the container is ready: healthy when it
    /// declares a health check, else simply running.
    pub async fn wait_ready(&self, name: &str, timeout: Duration) -> Result<()> {
        let poll = async {
            loop {
                let ctn = self.inspect(name).await?;
                if ctn.state.as_ref().is_some_and(is_ready) {
                    return Ok(());
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result,
            Err(_) => Err(ZockimateError::ReadyTimeout(name.to_string())),
        }
    }
}

/// Ready condition: health status wins when a health check is declared,
/// otherwise the running flag decides.
pub fn is_ready(state: &ContainerState) -> bool {
    match state.health.as_ref().and_then(|h| h.status) {
        Some(HealthStatusEnum::HEALTHY) => true,
        Some(HealthStatusEnum::NONE) | Some(HealthStatusEnum::EMPTY) | None => {
            state.running == Some(true)
        }
        _ => false,
    }
}

pub fn is_running(ctn: &ContainerInspectResponse) -> bool {
    ctn.state
        .as_ref()
        .and_then(|s| s.running)
        .unwrap_or(false)
}

/// Labels of an inspected container, owned.
pub fn container_labels(ctn: &ContainerInspectResponse) -> HashMap<String, String> {
    ctn.config
        .as_ref()
        .and_then(|c| c.labels.clone())
        .unwrap_or_default()
}

/// The image reference string the container was configured with.
pub fn configured_image(ctn: &ContainerInspectResponse) -> String {
    ctn.config
        .as_ref()
        .and_then(|c| c.image.clone())
        .unwrap_or_default()
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn is_not_modified(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{Health, NetworkSettings};

    #[test]
    fn configs_round_trip_through_the_network_envelope() {
        let mut networks = HashMap::new();
        networks.insert(
            "apps_net".to_string(),
            EndpointSettings {
                ip_address: Some("172.20.0.5".to_string()),
                ..Default::default()
            },
        );
        let ctn = ContainerInspectResponse {
            config: Some(ContainerConfig {
                image: Some("nginx:1.24".to_string()),
                labels: Some(HashMap::from([(
                    "zockimate.enable".to_string(),
                    "true".to_string(),
                )])),
                ..Default::default()
            }),
            host_config: Some(HostConfig {
                privileged: Some(true),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(networks),
                ..Default::default()
            }),
            ..Default::default()
        };

        let (config, host_config, network_config) = DockerClient::configs(&ctn).unwrap();
        let (config, host_config, network) =
            DockerClient::decode_configs(&config, &host_config, &network_config).unwrap();

        assert_eq!(config.image.as_deref(), Some("nginx:1.24"));
        assert_eq!(host_config.privileged, Some(true));
        assert_eq!(
            network.endpoints_config["apps_net"].ip_address.as_deref(),
            Some("172.20.0.5")
        );
    }

    #[test]
    fn readiness_prefers_health_status_over_running() {
        let healthy = ContainerState {
            running: Some(false),
            health: Some(Health {
                status: Some(HealthStatusEnum::HEALTHY),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(is_ready(&healthy));

        let starting = ContainerState {
            running: Some(true),
            health: Some(Health {
                status: Some(HealthStatusEnum::STARTING),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(!is_ready(&starting), "health check declared but not healthy yet");
    }

    #[test]
    fn readiness_falls_back_to_running_without_health_check() {
        let running = ContainerState {
            running: Some(true),
            ..Default::default()
        };
        assert!(is_ready(&running));

        let stopped = ContainerState {
            running: Some(false),
            ..Default::default()
        };
        assert!(!is_ready(&stopped));
    }
}
