//! Results Storage.
//!
//! Captures the terminal state, concatenated logs, and output/measures
//! tarballs handed over by an instance at release time, and serves them
//! back out after the instance has been freed or disposed. A result
//! record is immutable once written. Directory layout is config-driven
//! the way `src/config.rs`'s `NetworkConfig`/`ResourceLimits` resolve
//! their own paths and quotas; writes go through `tokio::fs` (the async
//! analogue of `src-tauri/src/services/ipfs.rs`'s write-then-reference
//! idiom), and only path references, not blob bytes, are persisted in
//! `db::DbStorage`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;

use crate::db::DbStorage;
use crate::error::{PlzError, Result};
use crate::types::ContainerState;

#[async_trait]
pub trait ResultsStorage: Send + Sync {
    /// Persist a completed execution's artifacts. Called exactly once per
    /// execution, at release.
    async fn store(
        &self,
        execution_id: &str,
        state: &ContainerState,
        logs: &[u8],
        outputs: &[u8],
        measures: &[u8],
    ) -> Result<()>;

    async fn logs(&self, execution_id: &str) -> Result<Option<Bytes>>;
    async fn outputs(&self, execution_id: &str) -> Result<Option<Bytes>>;
    async fn state(&self, execution_id: &str) -> Result<Option<ContainerState>>;
}

/// Local-disk implementation: `directory/<execution-id>/{logs,output.tar,measures.tar}`.
pub struct LocalResultsStorage {
    directory: PathBuf,
    db: std::sync::Arc<dyn DbStorage>,
}

impl LocalResultsStorage {
    pub fn new(directory: PathBuf, db: std::sync::Arc<dyn DbStorage>) -> Self {
        Self { directory, db }
    }

    fn execution_dir(&self, execution_id: &str) -> PathBuf {
        self.directory.join(execution_id)
    }

    async fn read_if_exists(path: &Path) -> Result<Option<Bytes>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PlzError::Io(e)),
        }
    }
}

#[async_trait]
impl ResultsStorage for LocalResultsStorage {
    async fn store(
        &self,
        execution_id: &str,
        state: &ContainerState,
        logs: &[u8],
        outputs: &[u8],
        measures: &[u8],
    ) -> Result<()> {
        let dir = self.execution_dir(execution_id);
        tokio::fs::create_dir_all(&dir).await.map_err(PlzError::Io)?;

        tokio::fs::write(dir.join("logs"), logs).await.map_err(PlzError::Io)?;
        tokio::fs::write(dir.join("output.tar"), outputs).await.map_err(PlzError::Io)?;
        tokio::fs::write(dir.join("measures.tar"), measures).await.map_err(PlzError::Io)?;

        self.db.save_execution_state(execution_id, state).await?;
        self.db.save_log_ref(execution_id, &dir.join("logs").to_string_lossy()).await?;
        self.db.save_output_ref(execution_id, &dir.join("output.tar").to_string_lossy()).await?;

        Ok(())
    }

    async fn logs(&self, execution_id: &str) -> Result<Option<Bytes>> {
        Self::read_if_exists(&self.execution_dir(execution_id).join("logs")).await
    }

    async fn outputs(&self, execution_id: &str) -> Result<Option<Bytes>> {
        Self::read_if_exists(&self.execution_dir(execution_id).join("output.tar")).await
    }

    async fn state(&self, execution_id: &str) -> Result<Option<ContainerState>> {
        self.db.get_execution_state(execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDbStorage;

    #[tokio::test]
    async fn stores_and_reads_back_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let db = std::sync::Arc::new(MemoryDbStorage::new());
        let storage = LocalResultsStorage::new(dir.path().to_path_buf(), db);

        let state = ContainerState::terminal("exited", 0, 100);
        storage.store("exec-1", &state, b"hello\n", b"tarbytes", b"").await.unwrap();

        assert_eq!(storage.logs("exec-1").await.unwrap().unwrap().as_ref(), b"hello\n");
        assert_eq!(storage.outputs("exec-1").await.unwrap().unwrap().as_ref(), b"tarbytes");
        assert_eq!(storage.state("exec-1").await.unwrap().unwrap().exit_code, 0);
        assert!(storage.logs("unknown").await.unwrap().is_none());
    }
}
