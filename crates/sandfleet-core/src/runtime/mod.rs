//! Container runtime capability consumed by the provisioning engine.
//!
//! The engine never talks to a container runtime directly; it is handed a
//! [`RuntimeClient`] at construction time. Two implementations ship with
//! this crate:
//!
//! - [`DockerRuntime`] drives a Docker-compatible CLI.
//! - [`InMemoryRuntime`] keeps sandboxes in process memory (tests, dry runs).

mod docker;
mod memory;

pub use docker::{classify_create_failure, DockerRuntime};
pub use memory::InMemoryRuntime;

use crate::config::WorkloadSpec;
use crate::error::RuntimeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque runtime-assigned identifier of a created sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeHandle(String);

impl RuntimeHandle {
    /// Wrap a runtime-assigned id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A sandbox as reported by the runtime's listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxSummary {
    /// Runtime-assigned id.
    pub id: String,
    /// Sandbox name.
    pub name: String,
    /// Image the sandbox runs.
    pub image: String,
    /// Human-readable runtime status.
    pub status: String,
}

/// Create/remove/list operations on a container runtime.
///
/// Implementations must be safe to call concurrently from many workers.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Create and start a sandbox named `name` running `spec`.
    ///
    /// # Errors
    /// - [`RuntimeError::NameConflict`] if the name is taken.
    /// - [`RuntimeError::Transient`] if the call may succeed when retried,
    ///   including when it does not finish within `timeout`.
    /// - [`RuntimeError::Permanent`] otherwise.
    async fn create(
        &self,
        name: &str,
        spec: &WorkloadSpec,
        timeout: Duration,
    ) -> Result<RuntimeHandle, RuntimeError>;

    /// Force-remove the sandbox named `name`.
    ///
    /// # Errors
    /// Returns [`RuntimeError::NotFound`] if no such sandbox exists.
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;

    /// List sandboxes whose names start with `{prefix}_`.
    async fn list(&self, prefix: &str) -> Result<Vec<SandboxSummary>, RuntimeError>;
}
