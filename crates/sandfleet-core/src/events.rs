//! Progress events emitted while a batch runs.

use crate::naming::SandboxName;
use crate::outcome::{BatchResult, BatchStatus, SandboxOutcome};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// One step of a batch's progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvisionEvent {
    /// Names were allocated and workers are about to start.
    BatchStarted {
        /// Identifier shared by every event of this batch.
        batch_id: Uuid,
        /// Name prefix of the batch.
        prefix: String,
        /// Number of sandboxes requested.
        total: usize,
        /// Number of create calls allowed in flight at once.
        pool_size: usize,
    },
    /// A transient failure will be retried after `delay_ms`.
    Retrying {
        /// Identifier shared by every event of this batch.
        batch_id: Uuid,
        /// Sandbox being retried.
        name: SandboxName,
        /// The attempt that just failed, starting at 1.
        attempt: u32,
        /// Backoff before the next attempt, in milliseconds.
        delay_ms: u64,
        /// The transient error that triggered the retry.
        error: String,
    },
    /// A sandbox reached its terminal outcome.
    SandboxFinished {
        /// Identifier shared by every event of this batch.
        batch_id: Uuid,
        /// The sandbox's terminal outcome.
        outcome: SandboxOutcome,
    },
    /// Every sandbox has a terminal outcome.
    BatchFinished {
        /// Identifier shared by every event of this batch.
        batch_id: Uuid,
        /// Overall batch status.
        status: BatchStatus,
        /// Sandboxes created by this batch.
        created: usize,
        /// Sandboxes that were already present.
        already_existing: usize,
        /// Sandboxes that failed.
        failed: usize,
    },
}

impl ProvisionEvent {
    pub(crate) fn finished(batch_id: Uuid, result: &BatchResult) -> Self {
        Self::BatchFinished {
            batch_id,
            status: result.status,
            created: result.created.len(),
            already_existing: result.already_existing.len(),
            failed: result.failed.len(),
        }
    }
}

/// Optional sink for [`ProvisionEvent`]s.
///
/// A closed receiver is ignored; events are best-effort.
#[derive(Debug, Clone, Default)]
pub(crate) struct EventSink(Option<UnboundedSender<ProvisionEvent>>);

impl EventSink {
    pub(crate) fn new(sender: UnboundedSender<ProvisionEvent>) -> Self {
        Self(Some(sender))
    }

    pub(crate) fn emit(&self, event: ProvisionEvent) {
        if let Some(sender) = &self.0 {
            let _ = sender.send(event);
        }
    }
}
