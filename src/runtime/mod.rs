//! Container Runtime Adapter.
//!
//! A thin, execution-id-addressed wrapper over the Docker Engine API,
//! grounded on `src-tauri/src/services/docker_runtime.rs`'s bollard
//! client usage patterns (create/start/stop/remove/logs/inspect, 404
//! mapping) and on the original controller's `containers.py`, whose exact
//! naming convention and state derivation this module reproduces.

use std::collections::HashMap;

use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StopContainerOptions,
};
use bollard::models::{ContainerStateStatusEnum, HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use bytes::Bytes;
use chrono::DateTime;
use futures_util::stream::{Stream, StreamExt};
use tracing::warn;

use crate::error::{PlzError, Result};
use crate::types::ContainerState;

/// Every execution's container is named with this prefix so the fleet can
/// be rediscovered by listing containers alone, surviving a controller
/// restart without any other persisted state.
pub const CONTAINER_NAME_PREFIX: &str = "plz-execution-id.";

/// A mount of a previously-built volume (see `crate::volumes`) into the
/// execution container.
#[derive(Debug, Clone)]
pub struct VolumeMount {
    pub volume_name: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Clone)]
pub struct ContainerRuntime {
    client: Docker,
}

impl ContainerRuntime {
    pub fn new(docker_host: &str) -> Result<Self> {
        let client = if docker_host.starts_with("unix://") {
            Docker::connect_with_socket(
                docker_host.trim_start_matches("unix://"),
                120,
                bollard::API_DEFAULT_VERSION,
            )
            .map_err(PlzError::Docker)?
        } else if docker_host.starts_with("npipe://") {
            Docker::connect_with_local_defaults().map_err(PlzError::Docker)?
        } else {
            Docker::connect_with_http(docker_host, 120, bollard::API_DEFAULT_VERSION)
                .map_err(PlzError::Docker)?
        };
        Ok(Self { client })
    }

    pub fn container_name(execution_id: &str) -> String {
        format!("{}{}", CONTAINER_NAME_PREFIX, execution_id)
    }

    fn strip_prefix(name: &str) -> Option<String> {
        name.trim_start_matches('/')
            .strip_prefix(CONTAINER_NAME_PREFIX)
            .map(|s| s.to_string())
    }

    /// Start a new container bound to `execution_id`. Rejects an empty
    /// execution id, matching the original's explicit guard.
    pub async fn run(
        &self,
        execution_id: &str,
        image: &str,
        command: &[String],
        environment: &HashMap<String, String>,
        mounts: &[VolumeMount],
    ) -> Result<()> {
        if execution_id.is_empty() {
            return Err(PlzError::Validation("execution id must not be empty".into()));
        }

        let env: Vec<String> = environment.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let docker_mounts: Vec<Mount> = mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.target.clone()),
                source: Some(m.volume_name.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: if docker_mounts.is_empty() { None } else { Some(docker_mounts) },
            ..Default::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: if command.is_empty() { None } else { Some(command.to_vec()) },
            env: if env.is_empty() { None } else { Some(env) },
            host_config: Some(host_config),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: Self::container_name(execution_id),
            platform: None,
        });

        let created = self
            .client
            .create_container(options, config)
            .await
            .map_err(PlzError::Docker)?;

        self.client
            .start_container::<String>(&created.id, None)
            .await
            .map_err(PlzError::Docker)?;

        Ok(())
    }

    /// Stop (but do not remove) the container bound to `execution_id`.
    pub async fn stop(&self, execution_id: &str) -> Result<()> {
        let name = Self::container_name(execution_id);
        match self.client.stop_container(&name, Some(StopContainerOptions { t: 10 })).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Err(PlzError::AlreadyStopped(execution_id.to_string()))
            }
            Err(e) => Err(PlzError::Docker(e)),
        }
    }

    /// Stop then remove the container bound to `execution_id`. Idempotent:
    /// a missing container is not an error.
    pub async fn rm(&self, execution_id: &str) -> Result<()> {
        let name = Self::container_name(execution_id);
        let _ = self.client.stop_container(&name, Some(StopContainerOptions { t: 10 })).await;
        match self
            .client
            .remove_container(&name, Some(RemoveContainerOptions { force: true, v: true, ..Default::default() }))
            .await
        {
            Ok(()) | Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(PlzError::Docker(e)),
        }
    }

    /// A following byte stream of stdout/stderr interleaved as the runtime
    /// delivers them; the stream ends when the container exits. Yields an
    /// empty stream if the container does not exist, matching the
    /// original's "no such container → empty iterator" behavior.
    pub async fn logs(
        &self,
        execution_id: &str,
        stdout: bool,
        stderr: bool,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let name = Self::container_name(execution_id);
        let options = Some(LogsOptions::<String> {
            follow: true,
            stdout,
            stderr,
            ..Default::default()
        });

        self.client.logs(&name, options).map(|item| match item {
            Ok(LogOutput::StdOut { message } | LogOutput::Console { message }) => Ok(message),
            Ok(LogOutput::StdErr { message }) => Ok(message),
            Ok(LogOutput::StdIn { message }) => Ok(message),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(Bytes::new())
            }
            Err(e) => Err(PlzError::Docker(e)),
        })
    }

    /// Derive the terminal/running state of the container bound to
    /// `execution_id`. Returns `None` if no such container exists.
    pub async fn get_state(&self, execution_id: &str) -> Result<Option<ContainerState>> {
        let name = Self::container_name(execution_id);
        let inspect = match self.client.inspect_container(&name, None).await {
            Ok(inspect) => inspect,
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => return Ok(None),
            Err(e) => return Err(PlzError::Docker(e)),
        };

        let state = match inspect.state {
            Some(s) => s,
            None => return Ok(None),
        };

        let running = matches!(state.status, Some(ContainerStateStatusEnum::RUNNING));
        let status = state
            .status
            .map(|s| format!("{:?}", s).to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());
        let exit_code = state.exit_code.unwrap_or(0);
        let finished_at = state
            .finished_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.timestamp())
            .filter(|ts| *ts > 0)
            .unwrap_or(0);

        if running {
            Ok(Some(ContainerState::running(status)))
        } else {
            Ok(Some(ContainerState::terminal(status, exit_code, finished_at)))
        }
    }

    /// List every execution id currently known to this runtime, derived
    /// purely from container names — the sole source of truth that lets a
    /// restarted controller rediscover live work.
    pub async fn list_execution_ids(&self) -> Result<Vec<String>> {
        let options = Some(ListContainersOptions::<String> { all: true, ..Default::default() });
        let containers = self.client.list_containers(options).await.map_err(PlzError::Docker)?;

        let mut ids = Vec::new();
        for container in containers {
            let Some(names) = container.names else { continue };
            for name in names {
                if let Some(id) = Self::strip_prefix(&name) {
                    ids.push(id);
                    break;
                }
            }
        }
        Ok(ids)
    }

    /// Look up the container for `execution_id`, if any.
    pub async fn from_execution_id(&self, execution_id: &str) -> Result<bool> {
        let name = Self::container_name(execution_id);
        match self.client.inspect_container(&name, None).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => {
                warn!("inspect_container failed for {}: {}", execution_id, e);
                Err(PlzError::Docker(e))
            }
        }
    }

    pub fn client(&self) -> &Docker {
        &self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_uses_prefix() {
        assert_eq!(ContainerRuntime::container_name("abc-123"), "plz-execution-id.abc-123");
    }

    #[test]
    fn strip_prefix_round_trips() {
        let name = ContainerRuntime::container_name("abc-123");
        assert_eq!(ContainerRuntime::strip_prefix(&format!("/{}", name)), Some("abc-123".to_string()));
        assert_eq!(ContainerRuntime::strip_prefix("/unrelated"), None);
    }
}
