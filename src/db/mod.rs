//! Durable key-value storage.
//!
//! The controller keeps almost everything derivable from the container
//! runtime or cloud tags in memory; the handful of facts that must survive
//! a restart (the per-user last-execution pointer, and per-execution
//! metadata captured at submission) go through this typed interface, a
//! trait over a pluggable backend, backed by Redis to match the original
//! controller's actual `RedisDBStorage`.

mod memory;
mod redis_store;

pub use memory::MemoryDbStorage;
pub use redis_store::RedisDbStorage;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ContainerState, ExecutionMetadata};

/// Typed key-value interface over the durable store.
#[async_trait]
pub trait DbStorage: Send + Sync {
    async fn get_last_execution_id(&self, user: &str) -> Result<Option<String>>;
    async fn set_last_execution_id(&self, user: &str, execution_id: &str) -> Result<()>;

    async fn save_execution_metadata(&self, execution_id: &str, metadata: &ExecutionMetadata) -> Result<()>;
    async fn get_execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>>;

    async fn save_execution_state(&self, execution_id: &str, state: &ContainerState) -> Result<()>;
    async fn get_execution_state(&self, execution_id: &str) -> Result<Option<ContainerState>>;

    async fn save_output_ref(&self, execution_id: &str, path: &str) -> Result<()>;
    async fn get_output_ref(&self, execution_id: &str) -> Result<Option<String>>;

    async fn save_log_ref(&self, execution_id: &str, path: &str) -> Result<()>;
    async fn get_log_ref(&self, execution_id: &str) -> Result<Option<String>>;
}

pub(crate) fn key_last_execution_id(user: &str) -> String {
    format!("user:{}:last_execution_id", user)
}

pub(crate) fn key_metadata(execution_id: &str) -> String {
    format!("execution:{}:metadata", execution_id)
}

pub(crate) fn key_state(execution_id: &str) -> String {
    format!("execution:{}:state", execution_id)
}

pub(crate) fn key_outputs(execution_id: &str) -> String {
    format!("execution:{}:outputs", execution_id)
}

pub(crate) fn key_logs(execution_id: &str) -> String {
    format!("execution:{}:logs", execution_id)
}
