//! Idempotent reconciliation of external resources.
//!
//! For every resource the pipeline needs, the reconciler queries for a
//! resource with the expected (target-derived) name before creating one,
//! so re-running the pipeline after a failure or cancellation is safe:
//! whatever a previous run already created is found and reused.

pub mod az;
pub mod client;
pub mod mock;
pub mod resource;

pub use az::AzCli;
pub use client::{CloudClient, CloudError};
pub use mock::MockCloud;
pub use resource::{ResourceDescriptor, ResourceHandle};

use std::sync::Arc;
use tracing::info;

/// Result of one reconciliation pass over a resource.
#[derive(Debug, Clone)]
pub struct EnsureOutcome {
    /// True when the resource was found and reused, false when created.
    pub existing: bool,

    /// Reference to the live resource.
    pub handle: ResourceHandle,
}

/// Ensures resources exist, creating only what is absent.
pub struct Reconciler {
    client: Arc<dyn CloudClient>,
}

impl Reconciler {
    pub fn new(client: Arc<dyn CloudClient>) -> Self {
        Self { client }
    }

    /// Ensure `resource` exists and carries its desired sub-entry sets.
    ///
    /// Query-before-create makes re-runs idempotent. Sub-entry sets
    /// (allow-lists, scopes, app settings) are replace-on-write: the full
    /// desired set is submitted on every pass, including for reused
    /// resources, so a successful pass always leaves the resource in the
    /// exact desired state. A manual out-of-band addition is discarded by
    /// the next pass; that is intended behavior, not a bug.
    pub async fn ensure_exists(
        &self,
        resource: &ResourceDescriptor,
    ) -> Result<EnsureOutcome, CloudError> {
        let outcome = match self.client.show(resource).await? {
            Some(handle) => {
                info!(kind = resource.kind(), name = resource.name(), "reusing existing resource");
                EnsureOutcome {
                    existing: true,
                    handle,
                }
            }
            None => {
                info!(kind = resource.kind(), name = resource.name(), "creating resource");
                let handle = self.client.create(resource).await?;
                EnsureOutcome {
                    existing: false,
                    handle,
                }
            }
        };

        self.client.apply(resource, &outcome.handle).await?;
        Ok(outcome)
    }
}
