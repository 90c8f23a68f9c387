//! Wire and domain types shared across components.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Derived state of a container backing an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerState {
    pub running: bool,
    pub status: String,
    /// Only meaningful when `running` is false.
    pub success: bool,
    pub exit_code: i64,
    /// UNIX seconds, UTC. 0 if the container has not finished.
    pub finished_at: i64,
}

impl ContainerState {
    /// Build a terminal state from a bollard-reported exit code, honoring
    /// the invariant that `success` is only meaningful once `!running`.
    pub fn terminal(status: impl Into<String>, exit_code: i64, finished_at: i64) -> Self {
        Self {
            running: false,
            status: status.into(),
            success: exit_code == 0,
            exit_code,
            finished_at,
        }
    }

    pub fn running(status: impl Into<String>) -> Self {
        Self {
            running: true,
            status: status.into(),
            success: false,
            exit_code: 0,
            finished_at: 0,
        }
    }
}

/// Requested instance shape for an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSpec {
    pub instance_type: String,
    pub user: String,
}

/// Body of `POST /commands`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: Vec<String>,
    pub snapshot_id: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub execution_spec: ExecutionSpec,
}

/// First line of the `POST /snapshots` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub user: String,
    pub project: String,
}

/// Metadata captured for an execution at submission time, persisted in
/// the DB store under `execution:<id>:metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub user: String,
    pub snapshot_id: String,
    pub command: Vec<String>,
    pub instance_type: String,
    pub created_at: i64,
}

/// NDJSON frames streamed by `POST /snapshots`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum BuildEvent {
    Stream { stream: String },
    Error { error: String },
    Id { id: String },
}

/// NDJSON frames streamed by `POST /commands`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum CommandEvent {
    Id { id: String },
    Status { status: String },
    Error { error: String },
}

/// One row of `GET /commands/list`.
#[derive(Debug, Clone, Serialize)]
pub struct CommandInfo {
    pub execution_id: String,
    pub instance_id: String,
    pub running: bool,
}

/// Response body of `GET /commands/<id>/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
}

impl From<&ContainerState> for StatusResponse {
    fn from(state: &ContainerState) -> Self {
        if state.running {
            Self { running: true, success: None, code: None }
        } else {
            Self { running: false, success: Some(state.success), code: Some(state.exit_code) }
        }
    }
}

/// An object to be materialized into a volume's build tar by the volume
/// builder: either a plain file or an empty directory entry.
#[derive(Debug, Clone)]
pub enum VolumeObject {
    File { path: String, contents: Vec<u8> },
    Directory { path: String },
}
