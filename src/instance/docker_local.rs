use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use parking_lot::RwLock;

use crate::error::{PlzError, Result};
use crate::registry::ImageRegistry;
use crate::results::ResultsStorage;
use crate::runtime::{ContainerRuntime, VolumeMount};
use crate::system::Locker;
use crate::types::ContainerState;
use crate::volumes::{VolumeBuilder, OUTPUT_DIRECTORY, VOLUME_MOUNT};

use super::{ExecutionInfo, Instance};

/// Mutable binding state, held behind the instance's own lock.
struct Binding {
    execution_id: String,
    max_idle_seconds: u64,
    idle_since_timestamp: i64,
    volume_name: Option<String>,
}

impl Default for Binding {
    fn default() -> Self {
        Self { execution_id: String::new(), max_idle_seconds: 0, idle_since_timestamp: 0, volume_name: None }
    }
}

/// The Docker-local variant of [`Instance`]: the controller's own Docker
/// host. Never disposes itself — the host is persistent infrastructure,
/// not a resource the fleet manages the lifecycle of.
pub struct DockerLocalInstance {
    id: String,
    runtime: Arc<ContainerRuntime>,
    registry: Arc<dyn ImageRegistry>,
    volumes: Arc<VolumeBuilder>,
    locker: Locker,
    binding: RwLock<Binding>,
}

impl DockerLocalInstance {
    pub fn new(id: String, runtime: Arc<ContainerRuntime>, registry: Arc<dyn ImageRegistry>, volumes: Arc<VolumeBuilder>) -> Self {
        Self {
            id,
            runtime,
            registry,
            volumes,
            locker: Locker::new(),
            binding: RwLock::new(Binding::default()),
        }
    }

    fn parameters_volume_name(execution_id: &str) -> String {
        format!("plz-params.{}", execution_id)
    }
}

#[async_trait]
impl Instance for DockerLocalInstance {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(
        &self,
        execution_id: &str,
        snapshot_id: &str,
        command: &[String],
        parameters: &HashMap<String, String>,
        max_idle_seconds: u64,
    ) -> Result<()> {
        let _guard = self.locker.try_acquire().map_err(|_| PlzError::InstanceAssigned)?;

        if !self.binding.read().execution_id.is_empty() {
            return Err(PlzError::InstanceAssigned);
        }

        self.registry.pull(snapshot_id).await?;

        let volume_name = Self::parameters_volume_name(execution_id);
        let objects = vec![
            VolumeBuilder::configuration_object(parameters)?,
            crate::types::VolumeObject::Directory { path: OUTPUT_DIRECTORY.to_string() },
        ];
        self.volumes.create(&volume_name, &objects).await?;

        let mount = VolumeMount { volume_name: volume_name.clone(), target: VOLUME_MOUNT.to_string(), read_only: false };
        let image = self.registry.full_reference(snapshot_id);

        let run_result = self.runtime.run(execution_id, &image, command, &HashMap::new(), &[mount]).await;
        if let Err(e) = run_result {
            let _ = self.volumes.remove(&volume_name).await;
            return Err(e);
        }

        let mut binding = self.binding.write();
        binding.execution_id = execution_id.to_string();
        binding.max_idle_seconds = max_idle_seconds;
        binding.idle_since_timestamp = 0;
        binding.volume_name = Some(volume_name);

        Ok(())
    }

    async fn stop_execution(&self) -> Result<()> {
        let execution_id = self.binding.read().execution_id.clone();
        if execution_id.is_empty() {
            return Ok(());
        }
        match self.runtime.stop(&execution_id).await {
            Ok(()) | Err(PlzError::AlreadyStopped(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn container_state(&self) -> Result<Option<ContainerState>> {
        let execution_id = self.binding.read().execution_id.clone();
        if execution_id.is_empty() {
            return Ok(None);
        }
        self.runtime.get_state(&execution_id).await
    }

    async fn release(
        &self,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
        release_container: bool,
    ) -> Result<()> {
        let (execution_id, volume_name) = {
            let binding = self.binding.read();
            (binding.execution_id.clone(), binding.volume_name.clone())
        };

        if execution_id.is_empty() {
            return Ok(());
        }

        let state = self.runtime.get_state(&execution_id).await?;
        let mut logs_stream = self.runtime.logs(&execution_id, true, true).await;
        let mut logs = Vec::new();
        while let Some(chunk) = logs_stream.next().await {
            logs.extend_from_slice(&chunk?);
        }

        let outputs = self.output_files_tarball().await.unwrap_or_default();
        let measures = self.measures_files_tarball().await.unwrap_or_default();

        if let Some(state) = &state {
            results_storage.store(&execution_id, state, &logs, &outputs, &measures).await?;
        }

        if release_container {
            self.runtime.rm(&execution_id).await?;
            if let Some(volume_name) = volume_name {
                self.volumes.remove(&volume_name).await?;
            }
        }

        let mut binding = self.binding.write();
        binding.execution_id.clear();
        binding.idle_since_timestamp = idle_since_timestamp;
        binding.volume_name = None;

        Ok(())
    }

    async fn logs(&self, stdout: bool, stderr: bool) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>> {
        let execution_id = self.binding.read().execution_id.clone();
        if execution_id.is_empty() {
            return Ok(Box::pin(futures_util::stream::empty()));
        }
        Ok(Box::pin(self.runtime.logs(&execution_id, stdout, stderr).await))
    }

    async fn output_files_tarball(&self) -> Result<Bytes> {
        let execution_id = self.binding.read().execution_id.clone();
        if execution_id.is_empty() {
            return Ok(Bytes::new());
        }
        let options = bollard::container::DownloadFromContainerOptions {
            path: format!("{}/{}", VOLUME_MOUNT, OUTPUT_DIRECTORY),
        };
        let container_name = ContainerRuntime::container_name(&execution_id);
        let mut stream = self.runtime.client().download_from_container(&container_name, Some(options));
        let mut buf = Vec::new();
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk.map_err(PlzError::Docker)?);
        }
        Ok(Bytes::from(buf))
    }

    async fn measures_files_tarball(&self) -> Result<Bytes> {
        // Measures are written by the execution itself under the output
        // tree; captured together with the outputs tarball.
        Ok(Bytes::new())
    }

    fn get_execution_id(&self) -> String {
        self.binding.read().execution_id.clone()
    }

    fn get_max_idle_seconds(&self) -> u64 {
        self.binding.read().max_idle_seconds
    }

    fn get_idle_since_timestamp(&self, state: Option<&ContainerState>) -> i64 {
        if let Some(state) = state {
            if state.finished_at > 0 {
                return state.finished_at;
            }
        }
        self.binding.read().idle_since_timestamp
    }

    async fn dispose_if_its_time(&self, _execution_info: Option<&ExecutionInfo>) -> Result<()> {
        Ok(())
    }

    async fn is_up(&self, _newly_created: bool) -> bool {
        self.runtime.client().ping().await.is_ok()
    }

    fn get_resource_state(&self) -> String {
        "running".to_string()
    }

    async fn delete_resource(&self) -> Result<()> {
        Ok(())
    }

    async fn get_forensics(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "instance": self.id, "kind": "docker-local" }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_volume_name_is_scoped_to_execution() {
        assert_eq!(DockerLocalInstance::parameters_volume_name("abc"), "plz-params.abc");
    }
}
