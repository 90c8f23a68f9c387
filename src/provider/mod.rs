//! Instance Provider: fleet manager.
//!
//! Owns the set of [`Instance`]s, exposing acquire/release/push/tidy as a
//! single contract shared by a trivial local-host provider and a full
//! acquiring/polling cloud-fleet provider. The concurrent id-keyed
//! registry is grounded on `src/executor.rs`'s `running_jobs` map; the
//! acquisition algorithm itself (find-free-or-spot-request, bounded
//! poll, is_up probing) is grounded on the original controller's
//! `instances/aws/ec2_instance_group.py`.

mod cloud;
mod local;

pub use cloud::CloudProvider;
pub use local::LocalProvider;

use async_trait::async_trait;
use futures_util::stream::Stream;
use std::sync::Arc;

use crate::error::Result;
use crate::instance::Instance;
use crate::results::ResultsStorage;
use crate::types::{CommandInfo, ExecutionSpec};

#[async_trait]
pub trait InstanceProvider: Send + Sync {
    /// Acquire an instance for `execution_id`, yielding human-readable
    /// status messages as acquisition proceeds. The caller reads the
    /// stream to completion; an `Err` item is terminal.
    async fn acquire_instance(
        &self,
        execution_id: &str,
        execution_spec: &ExecutionSpec,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

    /// Look up the instance currently bound to `execution_id`.
    async fn instance_for(&self, execution_id: &str) -> Option<Arc<dyn Instance>>;

    /// Release the instance bound to `execution_id`, if any.
    async fn release_instance(
        &self,
        execution_id: &str,
        results_storage: &dyn ResultsStorage,
        idle_since_timestamp: i64,
    ) -> Result<()>;

    /// Make `tag` pullable on every instance in the fleet ahead of future
    /// acquisitions (best-effort; failures are logged, not propagated).
    async fn push(&self, tag: &str);

    /// Signal the bound execution to stop without releasing the instance.
    async fn stop_command(&self, execution_id: &str) -> Result<()>;

    /// Reconciliation sweep: dispose any instance whose idle budget has
    /// been exceeded.
    async fn tidy_up(&self);

    /// List every execution currently bound across the fleet.
    async fn get_commands(&self) -> Vec<CommandInfo>;
}
