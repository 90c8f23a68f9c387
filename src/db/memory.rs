use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;
use crate::types::{ContainerState, ExecutionMetadata};

use super::DbStorage;

/// In-memory test double for [`DbStorage`]. Not used in production; exists
/// so unit tests exercising the provider/instance layers don't need a live
/// Redis server.
#[derive(Default)]
pub struct MemoryDbStorage {
    last_execution_id: DashMap<String, String>,
    metadata: DashMap<String, ExecutionMetadata>,
    state: DashMap<String, ContainerState>,
    outputs: DashMap<String, String>,
    logs: DashMap<String, String>,
}

impl MemoryDbStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DbStorage for MemoryDbStorage {
    async fn get_last_execution_id(&self, user: &str) -> Result<Option<String>> {
        Ok(self.last_execution_id.get(user).map(|v| v.clone()))
    }

    async fn set_last_execution_id(&self, user: &str, execution_id: &str) -> Result<()> {
        self.last_execution_id.insert(user.to_string(), execution_id.to_string());
        Ok(())
    }

    async fn save_execution_metadata(&self, execution_id: &str, metadata: &ExecutionMetadata) -> Result<()> {
        self.metadata.insert(execution_id.to_string(), metadata.clone());
        Ok(())
    }

    async fn get_execution_metadata(&self, execution_id: &str) -> Result<Option<ExecutionMetadata>> {
        Ok(self.metadata.get(execution_id).map(|v| v.clone()))
    }

    async fn save_execution_state(&self, execution_id: &str, state: &ContainerState) -> Result<()> {
        self.state.insert(execution_id.to_string(), state.clone());
        Ok(())
    }

    async fn get_execution_state(&self, execution_id: &str) -> Result<Option<ContainerState>> {
        Ok(self.state.get(execution_id).map(|v| v.clone()))
    }

    async fn save_output_ref(&self, execution_id: &str, path: &str) -> Result<()> {
        self.outputs.insert(execution_id.to_string(), path.to_string());
        Ok(())
    }

    async fn get_output_ref(&self, execution_id: &str) -> Result<Option<String>> {
        Ok(self.outputs.get(execution_id).map(|v| v.clone()))
    }

    async fn save_log_ref(&self, execution_id: &str, path: &str) -> Result<()> {
        self.logs.insert(execution_id.to_string(), path.to_string());
        Ok(())
    }

    async fn get_log_ref(&self, execution_id: &str) -> Result<Option<String>> {
        Ok(self.logs.get(execution_id).map(|v| v.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_last_execution_id() {
        let db = MemoryDbStorage::new();
        assert_eq!(db.get_last_execution_id("alice").await.unwrap(), None);
        db.set_last_execution_id("alice", "exec-1").await.unwrap();
        assert_eq!(db.get_last_execution_id("alice").await.unwrap(), Some("exec-1".to_string()));
    }

    #[tokio::test]
    async fn round_trips_metadata_and_state() {
        let db = MemoryDbStorage::new();
        let metadata = ExecutionMetadata {
            user: "alice".into(),
            snapshot_id: "tag123".into(),
            command: vec!["echo".into(), "hi".into()],
            instance_type: "t2.micro".into(),
            created_at: 1000,
        };
        db.save_execution_metadata("exec-1", &metadata).await.unwrap();
        let fetched = db.get_execution_metadata("exec-1").await.unwrap().unwrap();
        assert_eq!(fetched.user, "alice");
        assert_eq!(fetched.command, vec!["echo", "hi"]);

        let state = ContainerState::terminal("exited", 0, 1234);
        db.save_execution_state("exec-1", &state).await.unwrap();
        let fetched = db.get_execution_state("exec-1").await.unwrap().unwrap();
        assert!(fetched.success);
        assert_eq!(fetched.exit_code, 0);
    }
}
