//! In-process [`RuntimeClient`] that keeps sandboxes in memory.
//!
//! State survives across batches, so re-running a batch against the same
//! instance observes the sandboxes the first run created. Faults can be
//! scripted per name, and the runtime records how many creates were in
//! flight at once.

use super::{RuntimeClient, RuntimeHandle, SandboxSummary};
use crate::config::WorkloadSpec;
use crate::error::RuntimeError;
use crate::naming::NAME_SEPARATOR;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Record {
    handle: RuntimeHandle,
    image: String,
}

#[derive(Debug, Default)]
struct State {
    sandboxes: BTreeMap<String, Record>,
    one_shot_faults: HashMap<String, VecDeque<RuntimeError>>,
    persistent_faults: HashMap<String, RuntimeError>,
}

/// A runtime that lives entirely in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRuntime {
    state: Mutex<State>,
    latency: Duration,
    next_handle: AtomicU64,
    create_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Decrements the in-flight counter however `create` exits.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryRuntime {
    /// Create an empty runtime with no latency.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every create call take `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail the next create call for `name` with `error`.
    ///
    /// Repeated calls queue further one-shot failures.
    pub async fn fail_next(&self, name: &str, error: RuntimeError) {
        self.state
            .lock()
            .await
            .one_shot_faults
            .entry(name.to_string())
            .or_default()
            .push_back(error);
    }

    /// Fail every create call for `name` with `error`.
    pub async fn fail_always(&self, name: &str, error: RuntimeError) {
        self.state
            .lock()
            .await
            .persistent_faults
            .insert(name.to_string(), error);
    }

    /// Insert a sandbox as if some earlier process had created it.
    pub async fn seed(&self, name: &str, image: &str) -> RuntimeHandle {
        let handle = self.allocate_handle();
        self.state.lock().await.sandboxes.insert(
            name.to_string(),
            Record {
                handle: handle.clone(),
                image: image.to_string(),
            },
        );
        handle
    }

    /// Check whether a sandbox named `name` exists.
    pub async fn contains(&self, name: &str) -> bool {
        self.state.lock().await.sandboxes.contains_key(name)
    }

    /// Number of sandboxes currently present.
    pub async fn len(&self) -> usize {
        self.state.lock().await.sandboxes.len()
    }

    /// Whether no sandboxes are present.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Total create calls received.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Highest number of create calls that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn allocate_handle(&self) -> RuntimeHandle {
        let n = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        RuntimeHandle::new(format!("mem-{n:012x}"))
    }
}

#[async_trait]
impl RuntimeClient for InMemoryRuntime {
    async fn create(
        &self,
        name: &str,
        spec: &WorkloadSpec,
        timeout: Duration,
    ) -> Result<RuntimeHandle, RuntimeError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if !self.latency.is_zero() {
            if self.latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(RuntimeError::Transient(format!(
                    "create {name} did not finish within {timeout:?}"
                )));
            }
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(error) = state.persistent_faults.get(name) {
            return Err(error.clone());
        }
        if let Some(error) = state
            .one_shot_faults
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        if state.sandboxes.contains_key(name) {
            return Err(RuntimeError::NameConflict(name.to_string()));
        }

        let handle = self.allocate_handle();
        state.sandboxes.insert(
            name.to_string(),
            Record {
                handle: handle.clone(),
                image: spec.image.clone(),
            },
        );
        tracing::trace!(name, handle = %handle, "In-memory sandbox created");
        Ok(handle)
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        match self.state.lock().await.sandboxes.remove(name) {
            Some(_) => Ok(()),
            None => Err(RuntimeError::NotFound(name.to_string())),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let owned = format!("{prefix}{NAME_SEPARATOR}");
        let state = self.state.lock().await;
        Ok(state
            .sandboxes
            .iter()
            .filter(|(name, _)| name.starts_with(&owned))
            .map(|(name, record)| SandboxSummary {
                id: record.handle.to_string(),
                name: name.clone(),
                image: record.image.clone(),
                status: "running".to_string(),
            })
            .collect())
    }
}
