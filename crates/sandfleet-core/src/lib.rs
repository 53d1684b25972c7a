//! # sandfleet-core
//!
//! Batch provisioning engine for fleets of container sandboxes.
//!
//! One request asks for `count` sandboxes named `{prefix}_1 ..= {prefix}_N`.
//! The engine fans the create calls out over a bounded worker pool, retries
//! transient runtime errors, and reports exactly one terminal outcome per
//! sandbox, even under partial failure or cancellation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  sandfleet-core (host)                   │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  BatchRequest ──▶ naming::allocate() ──▶ [web_1..web_N]  │
//! │                                              │           │
//! │                                              ▼           │
//! │  ┌─────────────────┐     ┌──────────────────────────┐   │
//! │  │  Provisioner    │────▶│  Semaphore(min(K, N))    │   │
//! │  │  - provision()  │     │  N workers, retry/backoff│   │
//! │  │  - rollback()   │     └──────────────────────────┘   │
//! │  │  - teardown()   │                │                   │
//! │  └─────────────────┘                ▼                   │
//! │           ▲              ┌──────────────────────────┐   │
//! │           │              │  dyn RuntimeClient       │   │
//! │  outcome::aggregate() ◀──│  create/remove/list      │   │
//! │                          └──────────────────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//!          docker / podman CLI, or InMemoryRuntime
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use sandfleet_core::{BatchRequest, EngineConfig, InMemoryRuntime, Provisioner};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Arc::new(InMemoryRuntime::new());
//! let provisioner = Provisioner::new(runtime, EngineConfig::default());
//!
//! let request = BatchRequest::builder("ci")
//!     .count(5)
//!     .concurrency_limit(2)
//!     .build()?;
//!
//! let result = provisioner.provision(&request).await?;
//! assert_eq!(result.created.len(), 5);
//!
//! // A second run finds everything in place.
//! let again = provisioner.provision(&request).await?;
//! assert_eq!(again.already_existing.len(), 5);
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod events;
pub mod naming;
mod outcome;
mod retry;
pub mod runtime;

pub use config::{
    BatchRequest, BatchRequestBuilder, EngineConfig, WorkloadSpec, DEFAULT_CREATE_TIMEOUT,
    DEFAULT_IDLE, DEFAULT_IMAGE,
};
pub use engine::{Provisioner, RemovalFailure, RollbackReport};
pub use error::{ErrorKind, RuntimeError, SandboxError, ValidationError};
pub use events::ProvisionEvent;
pub use naming::SandboxName;
pub use outcome::{aggregate, BatchResult, BatchStatus, OutcomeStatus, SandboxOutcome};
pub use retry::RetryPolicy;
pub use runtime::{DockerRuntime, InMemoryRuntime, RuntimeClient, RuntimeHandle, SandboxSummary};

pub use tokio_util::sync::CancellationToken;
