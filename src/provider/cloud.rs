use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_ec2::Client as Ec2Client;
use futures_util::stream::{self, Stream};
use tracing::warn;

use crate::config::InstancesConfiguration;
use crate::error::{PlzError, Result};
use crate::instance::cloud_vm::{delegate_for_vm, CloudVmInstance, EXECUTION_ID_TAG, GROUP_NAME_TAG};
use crate::instance::Instance;
use crate::registry::ImageRegistry;
use crate::results::ResultsStorage;
use crate::types::{CommandInfo, ExecutionSpec};
use crate::volumes::VolumeBuilder;

use super::InstanceProvider;

/// Fleet provider for the "aws-ec2" configuration. Holds no durable map of
/// its own: membership and binding both live as EC2 resource tags, so a
/// restarted controller rediscovers the fleet by re-describing instances
/// filtered by the group tag, exactly as the local provider rediscovers
/// its containers by name. Grounded on the original controller's
/// `EC2InstanceGroup` acquisition algorithm.
pub struct CloudProvider {
    client: Ec2Client,
    config: InstancesConfiguration,
    registry: Arc<dyn ImageRegistry>,
    volumes: Arc<VolumeBuilder>,
}

impl CloudProvider {
    pub fn new(client: Ec2Client, config: InstancesConfiguration, registry: Arc<dyn ImageRegistry>, volumes: Arc<VolumeBuilder>) -> Self {
        Self { client, config, registry, volumes }
    }

    async fn group_instances(&self) -> Result<Vec<(String, Option<String>)>> {
        let filter = aws_sdk_ec2::types::Filter::builder()
            .name(format!("tag:{}", GROUP_NAME_TAG))
            .values(&self.config.group_name)
            .build();
        let running = aws_sdk_ec2::types::Filter::builder()
            .name("instance-state-name")
            .values("running")
            .build();

        let described = self
            .client
            .describe_instances()
            .filters(filter)
            .filters(running)
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("describe_instances failed: {}", e)))?;

        let mut result = Vec::new();
        for reservation in described.reservations() {
            for instance in reservation.instances() {
                let Some(id) = instance.instance_id() else { continue };
                let execution_id = instance
                    .tags()
                    .iter()
                    .find(|t| t.key() == Some(EXECUTION_ID_TAG))
                    .and_then(|t| t.value())
                    .map(|s| s.to_string());
                let ip = instance.private_ip_address().map(|s| s.to_string());
                result.push((id.to_string(), ip));
                let _ = execution_id;
            }
        }
        Ok(result)
    }

    async fn find_free(&self) -> Result<Option<(String, String)>> {
        let filter = aws_sdk_ec2::types::Filter::builder()
            .name(format!("tag:{}", GROUP_NAME_TAG))
            .values(&self.config.group_name)
            .build();
        let running = aws_sdk_ec2::types::Filter::builder()
            .name("instance-state-name")
            .values("running")
            .build();
        let free = aws_sdk_ec2::types::Filter::builder()
            .name(format!("tag:{}", EXECUTION_ID_TAG))
            .values("")
            .build();

        let described = self
            .client
            .describe_instances()
            .filters(filter)
            .filters(running)
            .filters(free)
            .send()
            .await
            .map_err(|e| PlzError::Internal(format!("describe_instances failed: {}", e)))?;

        for reservation in described.reservations() {
            for instance in reservation.instances() {
                if let (Some(id), Some(ip)) = (instance.instance_id(), instance.private_ip_address()) {
                    return Ok(Some((id.to_string(), ip.to_string())));
                }
            }
        }
        Ok(None)
    }

    fn instance_for_ip(&self, instance_id: &str, ip: &str) -> Result<CloudVmInstance> {
        let docker_host = format!("http://{}:2375", ip);
        let runtime = Arc::new(crate::runtime::ContainerRuntime::new(&docker_host)?);
        let delegate = delegate_for_vm(ip, runtime, self.registry.clone(), self.volumes.clone());
        Ok(CloudVmInstance::new(instance_id.to_string(), self.client.clone(), delegate))
    }
}

#[async_trait]
impl InstanceProvider for CloudProvider {
    async fn acquire_instance(
        &self,
        execution_id: &str,
        _execution_spec: &ExecutionSpec,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<String>> + Send>> {
        match self.find_free().await {
            Ok(Some((id, _ip))) => {
                return Box::pin(stream::once(async move { Ok(format!("reusing instance {}", id)) }));
            }
            Ok(None) => {}
            Err(e) => return Box::pin(stream::once(async move { Err(e) })),
        }

        let execution_id = execution_id.to_string();
        let max_tries = self.config.max_acquisition_tries;
        let delay = Duration::from_secs(self.config.acquisition_delay_seconds);
        let client = self.client.clone();
        let group_name = self.config.group_name.clone();
        let worker_ami = self.config.worker_ami.clone();
        let key_name = self.config.key_name.clone();

        let status_stream = stream::unfold(0u32, move |attempt| {
            let client = client.clone();
            let group_name = group_name.clone();
            let worker_ami = worker_ami.clone();
            let key_name = key_name.clone();
            let execution_id = execution_id.clone();
            async move {
                if attempt == 0 {
                    return Some((
                        Ok("no free instance found, requesting a new worker".to_string()),
                        attempt + 1,
                    ));
                }
                if attempt > max_tries {
                    return Some((
                        Err(PlzError::Acquisition(format!(
                            "gave up acquiring an instance for {} after {} tries",
                            execution_id, max_tries
                        ))),
                        attempt,
                    ));
                }
                if attempt == 1 {
                    let Some(ami) = worker_ami.as_deref() else {
                        return Some((Err(PlzError::Validation("instances.worker_ami is required".to_string())), attempt));
                    };
                    let mut request = client.run_instances().image_id(ami).min_count(1).max_count(1);
                    if let Some(key_name) = &key_name {
                        request = request.key_name(key_name);
                    }
                    let tag_spec = aws_sdk_ec2::types::TagSpecification::builder()
                        .resource_type(aws_sdk_ec2::types::ResourceType::Instance)
                        .tags(aws_sdk_ec2::types::Tag::builder().key(GROUP_NAME_TAG).value(&group_name).build())
                        .tags(aws_sdk_ec2::types::Tag::builder().key(EXECUTION_ID_TAG).value("").build())
                        .build();
                    match request.tag_specifications(tag_spec).send().await {
                        Ok(_) => {
                            return Some((Ok("launched a new worker, waiting for it to boot".to_string()), attempt + 1));
                        }
                        Err(e) => return Some((Err(PlzError::Acquisition(e.to_string())), attempt)),
                    }
                }

                tokio::time::sleep(delay).await;
                Some((Ok(format!("waiting for worker to become available (attempt {}/{})", attempt, max_tries)), attempt + 1))
            }
        });

        Box::pin(status_stream)
    }

    async fn instance_for(&self, execution_id: &str) -> Option<Arc<dyn Instance>> {
        let instances = self.group_instances().await.ok()?;
        for (id, ip) in instances {
            let Some(ip) = ip else { continue };
            let Ok(candidate) = self.instance_for_ip(&id, &ip) else { continue };
            if candidate.get_execution_id() == execution_id {
                return Some(Arc::new(candidate));
            }
        }
        None
    }

    async fn release_instance(
        &self,
        execution_id: &str,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
    ) -> Result<()> {
        if let Some(instance) = self.instance_for(execution_id).await {
            instance.release(results_storage, idle_since_timestamp, true).await?;
        }
        Ok(())
    }

    async fn push(&self, tag: &str) {
        if let Err(e) = self.registry.push(tag).await {
            warn!("push {} to registry failed: {}", tag, e);
        }
    }

    async fn stop_command(&self, execution_id: &str) -> Result<()> {
        match self.instance_for(execution_id).await {
            Some(instance) => instance.stop_execution().await,
            None => Err(PlzError::NotFound(execution_id.to_string())),
        }
    }

    async fn tidy_up(&self) {
        let instances = match self.group_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("tidy_up: failed to list group instances: {}", e);
                return;
            }
        };

        for (id, ip) in instances {
            let Some(ip) = ip else { continue };
            let instance = match self.instance_for_ip(&id, &ip) {
                Ok(instance) => instance,
                Err(e) => {
                    warn!("tidy_up: could not reach instance {}: {}", id, e);
                    continue;
                }
            };
            if let Err(e) = instance.dispose_if_its_time(None).await {
                warn!("tidy_up: disposal check failed for {}: {}", id, e);
            }
        }
    }

    async fn get_commands(&self) -> Vec<CommandInfo> {
        let instances = self.group_instances().await.unwrap_or_default();
        let mut commands = Vec::new();
        for (id, ip) in instances {
            let Some(ip) = ip else { continue };
            let Ok(instance) = self.instance_for_ip(&id, &ip) else { continue };
            let execution_id = instance.get_execution_id();
            if !execution_id.is_empty() {
                commands.push(CommandInfo { execution_id, instance_id: id, running: true });
            }
        }
        commands
    }
}

