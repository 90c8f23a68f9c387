use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{PlzError, Result};
use crate::types::{ContainerState, ExecutionMetadata};

use super::{key_last_execution_id, key_logs, key_metadata, key_outputs, key_state, DbStorage};

/// Redis-backed implementation, matching the original controller's
/// `RedisDBStorage`. Uses a `ConnectionManager` so transient reconnects are
/// handled transparently instead of failing every caller.
pub struct RedisDbStorage {
    conn: ConnectionManager,
}

impl RedisDbStorage {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(PlzError::Redis)?;
        let conn = client.get_connection_manager().await.map_err(PlzError::Redis)?;
        Ok(Self { conn })
    }

    fn serialize<T: serde::Serialize>(value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| PlzError::Internal(e.to_string()))
    }

    fn deserialize<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| PlzError::Internal(e.to_string()))
    }
}

#[async_trait]
impl DbStorage for RedisDbStorage {
    async fn get_last_execution_id(&self, user: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key_last_execution_id(user)).await.map_err(PlzError::Redis)?;
        Ok(value)
    }

    async fn set_last_execution_id(&self, user: &str, execution_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set(key_last_execution_id(user), execution_id).await.map_err(PlzError::Redis)?;
        Ok(())
    }

    async fn save_execution_metadata(&self, execution_id: &str, metadata: &ExecutionMetadata) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = Self::serialize(metadata)?;
        conn.set(key_metadata(execution_id), raw).await.map_err(PlzError::Redis)?;
        Ok(())
    }

    async fn get_execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key_metadata(execution_id)).await.map_err(PlzError::Redis)?;
        raw.map(|r| Self::deserialize(&r)).transpose()
    }

    async fn save_execution_state(&self, execution_id: &str, state: &ContainerState) -> Result<()> {
        let mut conn = self.conn.clone();
        let raw = Self::serialize(state)?;
        conn.set(key_state(execution_id), raw).await.map_err(PlzError::Redis)?;
        Ok(())
    }

    async fn get_execution_state(&self, execution_id: &str) -> Result<Option<ContainerState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key_state(execution_id)).await.map_err(PlzError::Redis)?;
        raw.map(|r| Self::deserialize(&r)).transpose()
    }

    async fn save_output_ref(&self, execution_id: &str, path: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set(key_outputs(execution_id), path).await.map_err(PlzError::Redis)?;
        Ok(())
    }

    async fn get_output_ref(&self, execution_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key_outputs(execution_id)).await.map_err(PlzError::Redis)?;
        Ok(value)
    }

    async fn save_log_ref(&self, execution_id: &str, path: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set(key_logs(execution_id), path).await.map_err(PlzError::Redis)?;
        Ok(())
    }

    async fn get_log_ref(&self, execution_id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key_logs(execution_id)).await.map_err(PlzError::Redis)?;
        Ok(value)
    }
}
