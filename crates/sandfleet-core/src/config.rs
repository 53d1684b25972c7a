//! Batch request and engine configuration types.

use crate::error::ValidationError;
use crate::naming;
use crate::retry::RetryPolicy;
use serde::Serialize;
use std::time::Duration;

/// Default image for idle sandboxes.
pub const DEFAULT_IMAGE: &str = "alpine:latest";

/// Default idle duration for the workload (1 hour).
pub const DEFAULT_IDLE: Duration = Duration::from_secs(3600);

/// Default per-call create timeout.
pub const DEFAULT_CREATE_TIMEOUT: Duration = Duration::from_secs(30);

/// What every sandbox in a batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    /// Image reference (pulled on demand by the runtime).
    pub image: String,
    /// Command and arguments for the long-lived workload.
    pub command: Vec<String>,
}

impl WorkloadSpec {
    /// Create a workload running an explicit command.
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
        }
    }

    /// Create a workload that sleeps for `duration`.
    pub fn idle(image: impl Into<String>, duration: Duration) -> Self {
        Self::new(
            image,
            vec!["sleep".to_string(), duration.as_secs().to_string()],
        )
    }

    /// Validate the workload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage);
        }
        if self.command.is_empty() {
            return Err(ValidationError::EmptyCommand);
        }
        Ok(())
    }
}

impl Default for WorkloadSpec {
    fn default() -> Self {
        Self::idle(DEFAULT_IMAGE, DEFAULT_IDLE)
    }
}

/// A request to create `count` sandboxes named `{name_prefix}_{i}`.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Number of sandboxes (must be >= 1).
    pub count: u32,
    /// Prefix shared by every sandbox name.
    pub name_prefix: String,
    /// Workload every sandbox runs.
    pub workload: WorkloadSpec,
    /// Maximum simultaneous create calls (must be >= 1).
    pub concurrency_limit: usize,
    /// Cancel the batch once this much time has passed.
    pub deadline: Option<Duration>,
}

impl BatchRequest {
    /// Create a new request builder.
    pub fn builder(name_prefix: impl Into<String>) -> BatchRequestBuilder {
        BatchRequestBuilder::new(name_prefix)
    }

    /// Validate the request.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.count == 0 {
            return Err(ValidationError::ZeroCount);
        }
        naming::validate_prefix(&self.name_prefix)?;
        if self.concurrency_limit == 0 {
            return Err(ValidationError::ZeroConcurrency);
        }
        self.workload.validate()
    }

    /// Number of workers actually used: `min(concurrency_limit, count)`.
    pub fn pool_size(&self) -> usize {
        self.concurrency_limit.min(self.count as usize)
    }
}

/// Builder for BatchRequest.
#[derive(Debug)]
pub struct BatchRequestBuilder {
    request: BatchRequest,
}

impl BatchRequestBuilder {
    fn new(name_prefix: impl Into<String>) -> Self {
        Self {
            request: BatchRequest {
                count: 1,
                name_prefix: name_prefix.into(),
                workload: WorkloadSpec::default(),
                concurrency_limit: 1,
                deadline: None,
            },
        }
    }

    /// Set the number of sandboxes.
    pub fn count(mut self, count: u32) -> Self {
        self.request.count = count;
        self
    }

    /// Set the workload.
    pub fn workload(mut self, workload: WorkloadSpec) -> Self {
        self.request.workload = workload;
        self
    }

    /// Set the concurrency limit.
    pub fn concurrency_limit(mut self, limit: usize) -> Self {
        self.request.concurrency_limit = limit;
        self
    }

    /// Set the batch deadline.
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.request.deadline = Some(deadline);
        self
    }

    /// Build the request, validating all fields.
    pub fn build(self) -> Result<BatchRequest, ValidationError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Configuration for the provisioning engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout handed to every runtime create call.
    pub create_timeout: Duration,
    /// Retry policy for transient runtime errors.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_timeout: DEFAULT_CREATE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}
