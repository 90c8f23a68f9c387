use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_ec2::Client as Ec2Client;
use bytes::Bytes;
use futures_util::stream::Stream;

use crate::error::{PlzError, Result};
use crate::results::ResultsStorage;
use crate::system::Locker;
use crate::types::ContainerState;

use super::{docker_local::DockerLocalInstance, ExecutionInfo, Instance};

pub const EXECUTION_ID_TAG: &str = "Plz:Execution-Id";
pub const GROUP_NAME_TAG: &str = "Plz:Group-Id";
pub const MAX_IDLE_SECONDS_TAG: &str = "Plz:Max-Idle-Seconds";
pub const IDLE_SINCE_TIMESTAMP_TAG: &str = "Plz:Idle-Since-Timestamp";

/// A cloud VM acting as an execution instance. State that would otherwise
/// live in the controller's memory (binding, idle budget, idle timestamp)
/// is externalized as resource tags so that a controller restart never
/// needs to reconcile in-memory state against the fleet — it just re-reads
/// tags. Execution semantics themselves are delegated to an embedded
/// [`DockerLocalInstance`] reaching this VM's own Docker daemon, exactly as
/// the original controller's `EC2Instance` delegates to a `DockerInstance`.
pub struct CloudVmInstance {
    instance_id: String,
    client: Ec2Client,
    delegate: DockerLocalInstance,
    locker: Locker,
}

impl CloudVmInstance {
    pub fn new(instance_id: String, client: Ec2Client, delegate: DockerLocalInstance) -> Self {
        Self { instance_id, client, delegate, locker: Locker::new() }
    }

    async fn get_tag(&self, tag: &str) -> Result<Option<String>> {
        let described = self
            .client
            .describe_instances()
            .instance_ids(&self.instance_id)
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("describe_instances failed: {}", e)))?;

        for reservation in described.reservations() {
            for instance in reservation.instances() {
                for t in instance.tags() {
                    if t.key() == Some(tag) {
                        return Ok(t.value().map(|v| v.to_string()));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn set_tags(&self, tags: &[(&str, &str)]) -> Result<()> {
        let ec2_tags: Vec<_> = tags
            .iter()
            .map(|(k, v)| aws_sdk_ec2::types::Tag::builder().key(*k).value(*v).build())
            .collect();

        self.client
            .create_tags()
            .resources(&self.instance_id)
            .set_tags(Some(ec2_tags))
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("create_tags failed: {}", e)))?;
        Ok(())
    }

    async fn current_state_name(&self) -> Result<String> {
        let described = self
            .client
            .describe_instances()
            .instance_ids(&self.instance_id)
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("describe_instances failed: {}", e)))?;

        for reservation in described.reservations() {
            for instance in reservation.instances() {
                if let Some(state) = instance.state() {
                    if let Some(name) = state.name() {
                        return Ok(name.as_str().to_string());
                    }
                }
            }
        }
        Ok("unknown".to_string())
    }
}

#[async_trait]
impl Instance for CloudVmInstance {
    fn id(&self) -> &str {
        &self.instance_id
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

        let current = self.get_tag(EXECUTION_ID_TAG).await?.unwrap_or_default();
        if !current.is_empty() {
            return Err(PlzError::InstanceAssigned);
        }

        self.delegate.run(execution_id, snapshot_id, command, parameters, max_idle_seconds).await?;

        self.set_tags(&[
            (EXECUTION_ID_TAG, execution_id),
            (MAX_IDLE_SECONDS_TAG, &max_idle_seconds.to_string()),
        ])
        .await?;

        Ok(())
    }

    async fn stop_execution(&self) -> Result<()> {
        self.delegate.stop_execution().await
    }

    async fn container_state(&self) -> Result<Option<ContainerState>> {
        self.delegate.container_state().await
    }

    async fn release(
        &self,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
        release_container: bool,
    ) -> Result<()> {
        let _guard = self.locker.acquire().await.map_err(|e| PlzError::Internal(e.to_string()))?;

        self.delegate.release(results_storage, idle_since_timestamp, release_container).await?;

        self.set_tags(&[
            (EXECUTION_ID_TAG, ""),
            (IDLE_SINCE_TIMESTAMP_TAG, &idle_since_timestamp.to_string()),
        ])
        .await?;

        Ok(())
    }

    async fn logs(&self, stdout: bool, stderr: bool) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>> {
        self.delegate.logs(stdout, stderr).await
    }

    async fn output_files_tarball(&self) -> Result<Bytes> {
        self.delegate.output_files_tarball().await
    }

    async fn measures_files_tarball(&self) -> Result<Bytes> {
        self.delegate.measures_files_tarball().await
    }

    fn get_execution_id(&self) -> String {
        self.delegate.get_execution_id()
    }

    fn get_max_idle_seconds(&self) -> u64 {
        self.delegate.get_max_idle_seconds()
    }

    fn get_idle_since_timestamp(&self, state: Option<&ContainerState>) -> i64 {
        self.delegate.get_idle_since_timestamp(state)
    }

    /// Disposes the VM when its idle budget is exhausted, clocks have
    /// drifted such that idle-since lies in the future, or the budget is
    /// non-positive. Mirrors the original's three-way disposal condition
    /// exactly.
    async fn dispose_if_its_time(&self, execution_info: Option<&ExecutionInfo>) -> Result<()> {
        let (idle_since, max_idle) = match execution_info {
            Some(info) => (info.idle_since_timestamp, info.max_idle_seconds as i64),
            None => {
                let idle_since: i64 = self
                    .get_tag(IDLE_SINCE_TIMESTAMP_TAG)
                    .await?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                let max_idle: i64 = self
                    .get_tag(MAX_IDLE_SECONDS_TAG)
                    .await?
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0);
                (idle_since, max_idle)
            }
        };

        let now = crate::util::now_unix();
        if now - idle_since > max_idle || idle_since > now || max_idle <= 0 {
            self.delete_resource().await?;
            self.client
                .terminate_instances()
                .instance_ids(&self.instance_id)
                .send()
                .await
                .map_err(|e| PlzError::Internal(format!("terminate_instances failed: {}", e)))?;
        }

        Ok(())
    }

    async fn is_up(&self, newly_created: bool) -> bool {
        let state = self.current_state_name().await.unwrap_or_default();
        if state != "running" {
            return false;
        }
        let tries = if newly_created { 5 } else { 1 };
        for attempt in 0..tries {
            if self.delegate.is_up(newly_created).await {
                return true;
            }
            if attempt + 1 < tries {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            }
        }
        false
    }

    fn get_resource_state(&self) -> String {
        self.delegate.get_resource_state()
    }

    /// AWS has no API to remove an instance from listings, so logical
    /// deletion clears the group-membership tag instead; subsequent group
    /// enumerations must filter on it.
    async fn delete_resource(&self) -> Result<()> {
        self.set_tags(&[(GROUP_NAME_TAG, "")]).await
    }

    async fn get_forensics(&self) -> Result<serde_json::Value> {
        let spot_requests = self
            .client
            .describe_spot_instance_requests()
            .filters(
                aws_sdk_ec2::types::Filter::builder()
                    .name("instance-id")
                    .values(&self.instance_id)
                    .build(),
            )
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("describe_spot_instance_requests failed: {}", e)))?;

        let state = self.current_state_name().await?;

        Ok(serde_json::json!({
            "instance_state": state,
            "spot_request_count": spot_requests.spot_instance_requests().len(),
        }))
    }
}

/// Construct the embedded Docker-local delegate reaching this VM's own
/// Docker daemon over its remote HTTP endpoint.
pub fn delegate_for_vm(
    vm_address: &str,
    runtime: Arc<crate::runtime::ContainerRuntime>,
    registry: Arc<dyn crate::registry::ImageRegistry>,
    volumes: Arc<crate::volumes::VolumeBuilder>,
) -> DockerLocalInstance {
    let _ = vm_address;
    DockerLocalInstance::new(vm_address.to_string(), runtime, registry, volumes)
}
