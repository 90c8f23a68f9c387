//! Image Registry.
//!
//! Builds a snapshot image from a streamed build context, derives a
//! deterministic tag, and pushes/pulls it against either the local Docker
//! daemon or a remote ECR registry. The reauth-before-expiry + one forced
//! retry policy is grounded on `src/orchestrator.rs`'s reconnect-on-
//! failure handling, bounded here instead of looping forever; tag
//! derivation is grounded on the original controller's
//! `Images.construct_tag`, which hashes submission metadata only — this
//! is deliberate (see DESIGN.md), not an oversight.

mod ecr;
mod local;

pub use ecr::EcrRegistry;
pub use local::LocalRegistry;

use async_trait::async_trait;
use futures_util::stream::Stream;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::types::BuildEvent;

/// Deterministically derive an image tag from submission metadata. Two
/// submissions with identical `(user, project)` metadata alias the same
/// tag regardless of the build context's contents — this is the exact
/// behavior asserted by the testable property on tag derivation.
pub fn construct_tag(metadata_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(metadata_json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Contract shared by the local and ECR-backed registries.
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    /// Build an image from a gzipped tar build context, yielding build
    /// events as the daemon reports them. The build tag is supplied by the
    /// caller (derived up front via [`construct_tag`], before any context
    /// bytes are even read, matching the original's ordering).
    async fn build(
        &self,
        context: Box<dyn tokio::io::AsyncRead + Send + Unpin>,
        tag: &str,
    ) -> Result<std::pin::Pin<Box<dyn Stream<Item = Result<BuildEvent>> + Send>>>;

    /// Push a locally-built tag to the backing registry. A no-op for the
    /// local provider.
    async fn push(&self, tag: &str) -> Result<()>;

    /// Pull a tag so a newly-created instance can run it.
    async fn pull(&self, tag: &str) -> Result<()>;

    /// Liveness probe: try up to `retries` times to confirm the registry
    /// (and, transitively, the target daemon) is reachable.
    async fn can_pull(&self, retries: u32) -> bool;

    /// Fully-qualified reference (`repository:tag` or `registry/repo:tag`).
    fn full_reference(&self, tag: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_stable_for_identical_metadata() {
        let metadata = r#"{"user":"alice","project":"demo"}"#;
        assert_eq!(construct_tag(metadata), construct_tag(metadata));
    }

    #[test]
    fn tag_differs_across_metadata() {
        let a = construct_tag(r#"{"user":"alice","project":"demo"}"#);
        let b = construct_tag(r#"{"user":"bob","project":"demo"}"#);
        assert_ne!(a, b);
    }
}
