//! Instance abstraction.
//!
//! An Instance is a compute host capable of running one execution at a
//! time. Two variants implement the same contract: a Docker-local instance
//! backed directly by the Container Runtime Adapter, and a Cloud-VM
//! instance that externalizes its binding/idle state as resource tags and
//! delegates execution semantics to an embedded Docker-local instance
//! reaching the VM's own Docker daemon. This mirrors the composition used
//! by the original controller's `EC2Instance`, which holds a
//! `DockerInstance` delegate rather than re-implementing execution logic.
//!
//! The per-instance mutex gating the free/busy transition is
//! `system::locker::Locker`, a semaphore-backed guard: it makes the
//! free→busy transition atomic and turns a lost race into a clean, typed
//! error instead of a corrupted binding.

pub mod cloud_vm;
pub mod docker_local;

pub use cloud_vm::CloudVmInstance;
pub use docker_local::DockerLocalInstance;

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::Stream;

use crate::error::Result;
use crate::results::ResultsStorage;
use crate::types::ContainerState;

/// Snapshot of an instance's binding, used by tidy-up sweeps.
#[derive(Debug, Clone)]
pub struct ExecutionInfo {
    pub execution_id: String,
    pub idle_since_timestamp: i64,
    pub max_idle_seconds: u64,
}

#[async_trait]
pub trait Instance: Send + Sync {
    /// Stable identifier for this instance (container host id or EC2
    /// instance id).
    fn id(&self) -> &str;

    /// Start running `command` from `snapshot_id` with `parameters`
    /// injected via the volume builder, binding this instance to
    /// `execution_id`. Fails with `InstanceAssigned` if the instance is
    /// already bound.
    async fn run(
        &self,
        execution_id: &str,
        snapshot_id: &str,
        command: &[String],
        parameters: &HashMap<String, String>,
        max_idle_seconds: u64,
    ) -> Result<()>;

    /// Signal the bound execution to stop; idempotent.
    async fn stop_execution(&self) -> Result<()>;

    /// Current derived container state of the bound execution, if any.
    async fn container_state(&self) -> Result<Option<ContainerState>>;

    /// Release this instance: capture terminal artifacts into
    /// `results_storage` (unless the caller only wants the binding
    /// cleared for debugging), remove the container, clear the binding,
    /// and stamp the idle timestamp.
    async fn release(
        &self,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
        release_container: bool,
    ) -> Result<()>;

    /// Byte stream of stdout/stderr from the bound execution.
    async fn logs(&self, stdout: bool, stderr: bool) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>>;

    /// Tarball of the execution's declared output directory.
    async fn output_files_tarball(&self) -> Result<Bytes>;

    /// Tarball of the execution's declared measures directory.
    async fn measures_files_tarball(&self) -> Result<Bytes>;

    /// Current binding; empty string means free.
    fn get_execution_id(&self) -> String;

    fn get_max_idle_seconds(&self) -> u64;

    /// Prefers the container's own finish timestamp when `state` is given.
    fn get_idle_since_timestamp(&self, state: Option<&ContainerState>) -> i64;

    /// Dispose of the underlying resource if its idle budget has been
    /// exceeded. A no-op for instances that never dispose (Docker-local).
    async fn dispose_if_its_time(&self, execution_info: Option<&ExecutionInfo>) -> Result<()>;

    /// Whether the instance is reachable and (for freshly-created
    /// instances) able to pull images.
    async fn is_up(&self, newly_created: bool) -> bool;

    /// Underlying cloud/resource state string ("running", "pending", ...).
    fn get_resource_state(&self) -> String;

    /// Logically remove this instance from fleet listings. For Docker-local
    /// this is a no-op; for cloud instances the backing VM cannot be
    /// un-listed, so this clears the group membership tag instead.
    async fn delete_resource(&self) -> Result<()>;

    /// Diagnostic bundle for support/debugging (e.g. spot request state).
    async fn get_forensics(&self) -> Result<serde_json::Value>;
}
