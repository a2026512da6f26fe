//! Scripted cloud client for tests.

use crate::reconcile::client::{CloudClient, CloudError};
use crate::reconcile::resource::{ResourceDescriptor, ResourceHandle};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory [`CloudClient`] that records every call.
///
/// Pre-seed resources with [`with_existing`](Self::with_existing) to
/// simulate a second, idempotent run; inspect `created_names()` /
/// `applied_names()` afterwards.
#[derive(Default)]
pub struct MockCloud {
    existing: Mutex<HashMap<String, ResourceHandle>>,
    created: Mutex<Vec<String>>,
    applied: Mutex<Vec<String>>,
    fail_create: Mutex<Option<String>>,
}

impl MockCloud {
    /// A provider with no resources yet (first run).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Pre-seed an existing resource by name.
    pub fn with_existing(self, name: impl Into<String>, handle: ResourceHandle) -> Self {
        self.existing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), handle);
        self
    }

    /// Make `create` fail for the resource with this name.
    pub fn failing_create(self, name: impl Into<String>) -> Self {
        *self.fail_create.lock().unwrap_or_else(|e| e.into_inner()) = Some(name.into());
        self
    }

    /// A plausible handle for a freshly created resource.
    pub fn default_handle(resource: &ResourceDescriptor) -> ResourceHandle {
        let handle = ResourceHandle::new(format!("id-{}", resource.name()));
        match resource {
            ResourceDescriptor::AppRegistration { .. } => handle
                .with_property("client_id", "11111111-2222-3333-4444-555555555555")
                .with_property("tenant_id", "99999999-8888-7777-6666-555555555555"),
            ResourceDescriptor::FunctionApp { name, .. } => {
                handle.with_property("default_host_name", format!("{name}.azurewebsites.net"))
            }
            _ => handle,
        }
    }

    pub fn created_names(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn applied_names(&self) -> Vec<String> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CloudClient for MockCloud {
    async fn show(
        &self,
        resource: &ResourceDescriptor,
    ) -> Result<Option<ResourceHandle>, CloudError> {
        Ok(self
            .existing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(resource.name())
            .cloned())
    }

    async fn create(&self, resource: &ResourceDescriptor) -> Result<ResourceHandle, CloudError> {
        let failing = self
            .fail_create
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if failing.as_deref() == Some(resource.name()) {
            return Err(CloudError::CommandFailed {
                command: format!("create {}", resource.name()),
                stderr: "mock create failure".to_string(),
            });
        }

        let handle = Self::default_handle(resource);
        self.created
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(resource.name().to_string());
        self.existing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(resource.name().to_string(), handle.clone());
        Ok(handle)
    }

    async fn apply(
        &self,
        resource: &ResourceDescriptor,
        _handle: &ResourceHandle,
    ) -> Result<(), CloudError> {
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(resource.name().to_string());
        Ok(())
    }
}
