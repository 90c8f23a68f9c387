use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use tracing::warn;

use crate::error::{PlzError, Result};
use crate::instance::Instance;
use crate::results::ResultsStorage;
use crate::types::{CommandInfo, ExecutionSpec};

use super::InstanceProvider;

/// Trivial single-instance provider for the "localhost" configuration:
/// one Docker-local instance representing the controller's own host.
/// Acquisition is immediate success or immediate failure, matching the
/// original controller's `Localhost` instance provider.
pub struct LocalProvider {
    instance: Arc<dyn Instance>,
}

impl LocalProvider {
    pub fn new(instance: Arc<dyn Instance>) -> Self {
        Self { instance }
    }
}

#[async_trait]
impl InstanceProvider for LocalProvider {
    async fn acquire_instance(
        &self,
        execution_id: &str,
        _execution_spec: &ExecutionSpec,
    ) -> std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = Result<String>> + Send>> {
        if !self.instance.get_execution_id().is_empty() {
            return Box::pin(stream::once(async { Err(PlzError::Acquisition("local instance is busy".to_string())) }));
        }
        let msg = format!("acquired local instance for {}", execution_id);
        Box::pin(stream::once(async move { Ok(msg) }))
    }

    async fn instance_for(&self, execution_id: &str) -> Option<Arc<dyn Instance>> {
        if self.instance.get_execution_id() == execution_id {
            Some(self.instance.clone())
        } else {
            None
        }
    }

    async fn release_instance(
        &self,
        execution_id: &str,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
    ) -> Result<()> {
        if self.instance.get_execution_id() != execution_id {
            return Ok(());
        }
        self.instance.release(results_storage, idle_since_timestamp, true).await
    }

    async fn push(&self, tag: &str) {
        // Local instances share the controller's own image store; nothing
        // further needs pushing.
        let _ = tag;
    }

    async fn stop_command(&self, execution_id: &str) -> Result<()> {
        if self.instance.get_execution_id() != execution_id {
            return Err(PlzError::NotFound(execution_id.to_string()));
        }
        self.instance.stop_execution().await
    }

    async fn tidy_up(&self) {
        if let Err(e) = self.instance.dispose_if_its_time(None).await {
            warn!("tidy_up: local instance disposal check failed: {}", e);
        }
    }

    async fn get_commands(&self) -> Vec<CommandInfo> {
        let execution_id = self.instance.get_execution_id();
        if execution_id.is_empty() {
            return Vec::new();
        }
        vec![CommandInfo { execution_id, instance_id: self.instance.id().to_string(), running: true }]
    }
}
