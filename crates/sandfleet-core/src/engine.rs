//! Batch provisioning engine.
//!
//! Turns one "create N sandboxes" request into N independent create calls
//! against a [`RuntimeClient`], bounded by a counting semaphore, and reduces
//! their outcomes into a [`BatchResult`].
//!
//! # Example
//!
//! ```no_run
//! use sandfleet_core::{BatchRequest, DockerRuntime, EngineConfig, Provisioner};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let provisioner = Provisioner::new(Arc::new(DockerRuntime::default()), EngineConfig::default());
//!
//! let request = BatchRequest::builder("worker")
//!     .count(10)
//!     .concurrency_limit(4)
//!     .build()?;
//!
//! let result = provisioner.provision(&request).await?;
//! println!("{}: {} created", result.status, result.created.len());
//! # Ok(())
//! # }
//! ```

use crate::config::{BatchRequest, EngineConfig, WorkloadSpec};
use crate::error::{RuntimeError, SandboxError, ValidationError};
use crate::events::{EventSink, ProvisionEvent};
use crate::naming::{self, SandboxName};
use crate::outcome::{aggregate, BatchResult, OutcomeStatus, SandboxOutcome};
use crate::runtime::{RuntimeClient, SandboxSummary};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ============================================================================
// Rollback reporting
// ============================================================================

/// A sandbox that could not be removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemovalFailure {
    /// Sandbox name.
    pub name: String,
    /// Why removal failed.
    pub error: String,
}

/// Result of removing a set of sandboxes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Sandboxes that are gone (including ones that were already missing).
    pub removed: Vec<String>,
    /// Sandboxes that are still present.
    pub failed: Vec<RemovalFailure>,
}

impl RollbackReport {
    /// Whether every removal succeeded.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// Provisioner
// ============================================================================

/// Provisions batches of sandboxes against an injected runtime.
///
/// The provisioner keeps no per-batch state; every call to
/// [`provision`](Self::provision) is independent and the returned
/// [`BatchResult`] belongs to the caller.
pub struct Provisioner {
    runtime: Arc<dyn RuntimeClient>,
    config: EngineConfig,
    events: EventSink,
}

impl Provisioner {
    /// Create a provisioner that issues calls through `runtime`.
    pub fn new(runtime: Arc<dyn RuntimeClient>, config: EngineConfig) -> Self {
        tracing::debug!(
            create_timeout = ?config.create_timeout,
            max_attempts = config.retry.max_attempts,
            "Creating provisioner"
        );
        Self {
            runtime,
            config,
            events: EventSink::default(),
        }
    }

    /// Emit a [`ProvisionEvent`] on `sender` for every step of every batch.
    pub fn with_events(mut self, sender: UnboundedSender<ProvisionEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Provision a batch and wait until every sandbox has a terminal outcome.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the request is invalid. No runtime
    /// call is made in that case. Runtime failures never surface here; they
    /// are recorded in [`BatchResult::failed`].
    pub async fn provision(&self, request: &BatchRequest) -> Result<BatchResult, ValidationError> {
        self.provision_with_cancel(request, CancellationToken::new())
            .await
    }

    /// Like [`provision`](Self::provision), but stops dispatching once
    /// `cancel` fires.
    ///
    /// Create calls already in flight run to completion. Sandboxes that were
    /// not attempted, or were waiting to retry, fail with
    /// [`SandboxError::Cancelled`].
    pub async fn provision_with_cancel(
        &self,
        request: &BatchRequest,
        cancel: CancellationToken,
    ) -> Result<BatchResult, ValidationError> {
        request.validate()?;

        let batch_id = Uuid::new_v4();
        let names = naming::allocate(&request.name_prefix, request.count);
        let total = names.len();
        let pool_size = request.pool_size();

        tracing::info!(
            %batch_id,
            prefix = %request.name_prefix,
            total,
            pool_size,
            image = %request.workload.image,
            "Provisioning batch"
        );
        self.events.emit(ProvisionEvent::BatchStarted {
            batch_id,
            prefix: request.name_prefix.clone(),
            total,
            pool_size,
        });

        // Child token so the deadline never cancels the caller's token.
        let cancel = cancel.child_token();
        let deadline = request.deadline.map(|deadline| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(deadline).await;
                tracing::warn!(%batch_id, ?deadline, "Batch deadline reached, cancelling");
                cancel.cancel();
            })
        });

        let worker = Arc::new(Worker {
            batch_id,
            runtime: Arc::clone(&self.runtime),
            workload: request.workload.clone(),
            config: self.config.clone(),
            permits: Arc::new(Semaphore::new(pool_size)),
            cancel,
            events: self.events.clone(),
        });

        let mut pending: BTreeSet<SandboxName> = names.iter().cloned().collect();
        let mut tasks = JoinSet::new();
        for name in names {
            let worker = Arc::clone(&worker);
            tasks.spawn(async move { worker.run(name).await });
        }

        let mut outcomes = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    pending.remove(outcome.name());
                    self.record(batch_id, outcome, &mut outcomes);
                }
                Err(e) => {
                    tracing::error!(%batch_id, error = %e, "Provisioning worker died");
                }
            }
        }

        // A worker that panicked never reported; its sandbox still needs an outcome.
        for name in pending {
            let error = SandboxError::Internal {
                message: "worker exited without reporting an outcome".to_string(),
            };
            self.record(batch_id, SandboxOutcome::failed(name, error, 0), &mut outcomes);
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        let result = aggregate(outcomes, total);
        tracing::info!(
            %batch_id,
            status = %result.status,
            created = result.created.len(),
            already_existing = result.already_existing.len(),
            failed = result.failed.len(),
            "Batch finished"
        );
        self.events.emit(ProvisionEvent::finished(batch_id, &result));

        Ok(result)
    }

    fn record(&self, batch_id: Uuid, outcome: SandboxOutcome, outcomes: &mut Vec<SandboxOutcome>) {
        match outcome.status() {
            OutcomeStatus::Created => tracing::info!(
                %batch_id,
                name = %outcome.name(),
                handle = %outcome.handle().map(|h| h.as_str()).unwrap_or_default(),
                attempts = outcome.attempts(),
                "Sandbox created"
            ),
            OutcomeStatus::AlreadyExists => tracing::info!(
                %batch_id,
                name = %outcome.name(),
                "Sandbox already exists"
            ),
            OutcomeStatus::Failed => tracing::warn!(
                %batch_id,
                name = %outcome.name(),
                error = %outcome.error().map(ToString::to_string).unwrap_or_default(),
                attempts = outcome.attempts(),
                "Sandbox failed"
            ),
        }

        self.events.emit(ProvisionEvent::SandboxFinished {
            batch_id,
            outcome: outcome.clone(),
        });
        outcomes.push(outcome);
    }

    /// Report which of the batch's names already exist in the runtime.
    ///
    /// Informational only: creation-time classification stays authoritative.
    pub async fn preflight(&self, request: &BatchRequest) -> Result<Vec<SandboxName>, RuntimeError> {
        let existing: HashSet<String> = self
            .runtime
            .list(&request.name_prefix)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let taken: Vec<SandboxName> = naming::allocate(&request.name_prefix, request.count)
            .into_iter()
            .filter(|name| existing.contains(name.as_str()))
            .collect();

        if !taken.is_empty() {
            tracing::warn!(
                prefix = %request.name_prefix,
                count = taken.len(),
                "Some sandbox names are already in use"
            );
        }
        Ok(taken)
    }

    /// List the sandboxes of the batch named `prefix`.
    ///
    /// Only names of the form `{prefix}_{n}` are returned, so a sibling batch
    /// such as `web_1_*` is not mistaken for part of `web`.
    pub async fn list(&self, prefix: &str) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let mut sandboxes: Vec<SandboxSummary> = self
            .runtime
            .list(prefix)
            .await?
            .into_iter()
            .filter(|s| naming::parse_index(prefix, &s.name).is_some())
            .collect();
        sandboxes.sort_by_key(|s| naming::parse_index(prefix, &s.name));
        Ok(sandboxes)
    }

    /// Remove every sandbox this batch created.
    ///
    /// Sandboxes that already existed before the batch are left alone.
    pub async fn rollback(&self, result: &BatchResult) -> RollbackReport {
        let names = result
            .created
            .iter()
            .map(|outcome| outcome.name().to_string())
            .collect();
        tracing::info!(count = result.created.len(), "Rolling back created sandboxes");
        self.remove_all(names).await
    }

    /// Remove every sandbox of the batch named `prefix`.
    pub async fn teardown(&self, prefix: &str) -> Result<RollbackReport, RuntimeError> {
        let names: Vec<String> = self
            .list(prefix)
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();
        tracing::info!(prefix, count = names.len(), "Tearing down sandboxes");
        Ok(self.remove_all(names).await)
    }

    async fn remove_all(&self, names: Vec<String>) -> RollbackReport {
        let mut report = RollbackReport::default();
        for name in names {
            match self.runtime.remove(&name).await {
                Ok(()) => {
                    tracing::debug!(name = %name, "Sandbox removed");
                    report.removed.push(name);
                }
                Err(e) if e.is_not_found() => {
                    tracing::debug!(name = %name, "Sandbox already gone");
                    report.removed.push(name);
                }
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Failed to remove sandbox");
                    report.failed.push(RemovalFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }
        report
    }
}

// ============================================================================
// Worker
// ============================================================================

/// State shared by every worker of one batch.
struct Worker {
    batch_id: Uuid,
    runtime: Arc<dyn RuntimeClient>,
    workload: WorkloadSpec,
    config: EngineConfig,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
    events: EventSink,
}

impl Worker {
    /// Drive one sandbox to a terminal outcome.
    async fn run(&self, name: SandboxName) -> SandboxOutcome {
        // Held until this function returns, backoff sleeps included.
        let _permit = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => return SandboxOutcome::failed(name, SandboxError::Cancelled, 0),

            permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return SandboxOutcome::failed(name, SandboxError::Cancelled, 0),
            },
        };

        if self.cancel.is_cancelled() {
            return SandboxOutcome::failed(name, SandboxError::Cancelled, 0);
        }

        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(batch_id = %self.batch_id, name = %name, attempt, "Creating sandbox");

            let result = self
                .runtime
                .create(name.as_str(), &self.workload, self.config.create_timeout)
                .await;

            let error = match result {
                Ok(handle) => return SandboxOutcome::created(name, handle, attempt),
                Err(RuntimeError::NameConflict(_)) => {
                    return SandboxOutcome::already_exists(name, attempt)
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => return SandboxOutcome::failed(name, e.into(), attempt),
            };

            if !policy.should_retry(attempt) {
                let error = SandboxError::RetriesExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                };
                return SandboxOutcome::failed(name, error, attempt);
            }

            let delay = policy.backoff(attempt);
            tracing::warn!(
                batch_id = %self.batch_id,
                name = %name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient runtime error, retrying"
            );
            self.events.emit(ProvisionEvent::Retrying {
                batch_id: self.batch_id,
                name: name.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
                error: error.to_string(),
            });

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return SandboxOutcome::failed(name, SandboxError::Cancelled, attempt)
                }

                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
