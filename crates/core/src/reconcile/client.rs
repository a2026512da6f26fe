//! The cloud-provider seam.
//!
//! Everything that talks to the provider goes through [`CloudClient`], so
//! the engine and reconciler can be exercised against a scripted
//! implementation in tests while production uses the `az` CLI adapter.

use crate::reconcile::resource::{ResourceDescriptor, ResourceHandle};
use async_trait::async_trait;
use thiserror::Error;

/// Errors from provider interactions.
#[derive(Error, Debug)]
pub enum CloudError {
    /// The provider CLI could not be spawned.
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// The provider CLI exited non-zero.
    #[error("Command '{command}' failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The provider's response was not the expected JSON.
    #[error("Failed to parse output of '{command}': {source}")]
    Parse {
        command: String,
        source: serde_json::Error,
    },

    /// The response parsed but lacked a field we need.
    #[error("Response of '{command}' is missing field '{field}'")]
    MissingField {
        command: String,
        field: &'static str,
    },
}

/// Provider operations needed by the reconciler.
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Look up the resource by its expected name.
    ///
    /// `Ok(None)` means the resource does not exist yet; that is not an
    /// error.
    async fn show(&self, resource: &ResourceDescriptor)
        -> Result<Option<ResourceHandle>, CloudError>;

    /// Create the resource with the descriptor's parameters.
    async fn create(&self, resource: &ResourceDescriptor) -> Result<ResourceHandle, CloudError>;

    /// Submit the descriptor's settable sub-entry sets (allow-lists,
    /// scopes, app settings) in full. Replace-on-write: the resource ends
    /// up in exactly the desired state and out-of-band additions are
    /// discarded.
    async fn apply(
        &self,
        resource: &ResourceDescriptor,
        handle: &ResourceHandle,
    ) -> Result<(), CloudError>;
}
