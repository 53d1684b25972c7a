//! Per-sandbox outcomes and their aggregation into a batch result.

use crate::error::SandboxError;
use crate::naming::SandboxName;
use crate::runtime::RuntimeHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Terminal status of one sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// A new sandbox was created by this batch.
    Created,
    /// A sandbox with this name was already present.
    AlreadyExists,
    /// The sandbox could not be created.
    Failed,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::AlreadyExists => write!(f, "already-exists"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The terminal outcome for one sandbox name.
///
/// `handle` is present iff the status is `Created`, `error` iff it is
/// `Failed`. The constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SandboxOutcome {
    name: SandboxName,
    status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<RuntimeHandle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<SandboxError>,
    attempts: u32,
    finished_at: DateTime<Utc>,
}

impl SandboxOutcome {
    /// The runtime created the sandbox and assigned `handle`.
    pub fn created(name: SandboxName, handle: RuntimeHandle, attempts: u32) -> Self {
        Self::new(name, OutcomeStatus::Created, Some(handle), None, attempts)
    }

    /// The runtime reported that the name is already in use.
    pub fn already_exists(name: SandboxName, attempts: u32) -> Self {
        Self::new(name, OutcomeStatus::AlreadyExists, None, None, attempts)
    }

    /// The sandbox failed with `error`.
    pub fn failed(name: SandboxName, error: SandboxError, attempts: u32) -> Self {
        Self::new(name, OutcomeStatus::Failed, None, Some(error), attempts)
    }

    fn new(
        name: SandboxName,
        status: OutcomeStatus,
        handle: Option<RuntimeHandle>,
        error: Option<SandboxError>,
        attempts: u32,
    ) -> Self {
        Self {
            name,
            status,
            handle,
            error,
            attempts,
            finished_at: Utc::now(),
        }
    }

    /// Get the sandbox name.
    pub fn name(&self) -> &SandboxName {
        &self.name
    }

    /// Get the terminal status.
    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    /// Get the runtime handle (only for `Created`).
    pub fn handle(&self) -> Option<&RuntimeHandle> {
        self.handle.as_ref()
    }

    /// Get the failure (only for `Failed`).
    pub fn error(&self) -> Option<&SandboxError> {
        self.error.as_ref()
    }

    /// Number of create calls issued for this sandbox.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// When this outcome became terminal.
    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }
}

/// Overall status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Nothing failed.
    Success,
    /// Some sandboxes failed, some exist.
    PartialSuccess,
    /// Every sandbox failed.
    TotalFailure,
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialSuccess => write!(f, "partial success"),
            Self::TotalFailure => write!(f, "total failure"),
        }
    }
}

/// Aggregated result of one batch, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Number of sandboxes the batch asked for.
    pub total: usize,
    /// Sandboxes created by this batch, by index.
    pub created: Vec<SandboxOutcome>,
    /// Sandboxes that already existed, by index.
    pub already_existing: Vec<SandboxOutcome>,
    /// Sandboxes that failed, by index.
    pub failed: Vec<SandboxOutcome>,
    /// Overall status.
    pub status: BatchStatus,
}

impl BatchResult {
    /// Result of a batch with nothing to do.
    pub fn empty() -> Self {
        aggregate(Vec::new(), 0)
    }

    /// Number of outcomes across all three sets.
    pub fn resolved(&self) -> usize {
        self.created.len() + self.already_existing.len() + self.failed.len()
    }

    /// Whether the desired end state was reached for every sandbox.
    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }

    /// Iterate over every outcome, in no particular cross-set order.
    pub fn outcomes(&self) -> impl Iterator<Item = &SandboxOutcome> {
        self.created
            .iter()
            .chain(&self.already_existing)
            .chain(&self.failed)
    }
}

/// Reduce a batch's outcomes into a [`BatchResult`].
///
/// Order-independent: any permutation of `outcomes` yields the same result.
pub fn aggregate(outcomes: Vec<SandboxOutcome>, expected_total: usize) -> BatchResult {
    let mut created = Vec::new();
    let mut already_existing = Vec::new();
    let mut failed = Vec::new();

    for outcome in outcomes {
        match outcome.status {
            OutcomeStatus::Created => created.push(outcome),
            OutcomeStatus::AlreadyExists => already_existing.push(outcome),
            OutcomeStatus::Failed => failed.push(outcome),
        }
    }

    for set in [&mut created, &mut already_existing, &mut failed] {
        set.sort_by(|a, b| a.name.cmp(&b.name));
    }

    let resolved = created.len() + already_existing.len() + failed.len();
    if resolved != expected_total {
        tracing::error!(
            expected = expected_total,
            resolved,
            "Batch outcome count does not match the number of dispatched sandboxes"
        );
        debug_assert_eq!(resolved, expected_total, "every sandbox needs one outcome");
    }

    let status = if failed.is_empty() {
        BatchStatus::Success
    } else if created.is_empty() && already_existing.is_empty() {
        BatchStatus::TotalFailure
    } else {
        BatchStatus::PartialSuccess
    };

    BatchResult {
        total: expected_total,
        created,
        already_existing,
        failed,
        status,
    }
}
