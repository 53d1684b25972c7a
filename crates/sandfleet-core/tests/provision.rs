//! End-to-end batch provisioning against the in-memory runtime.

use async_trait::async_trait;
use sandfleet_core::{
    BatchRequest, BatchStatus, CancellationToken, EngineConfig, ErrorKind, InMemoryRuntime,
    OutcomeStatus, Provisioner, RetryPolicy, RuntimeClient, RuntimeError, RuntimeHandle,
    SandboxSummary, ValidationError, WorkloadSpec,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn config() -> EngineConfig {
    EngineConfig {
        create_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            jitter: true,
        },
    }
}

fn request(prefix: &str, count: u32, limit: usize) -> BatchRequest {
    BatchRequest::builder(prefix)
        .count(count)
        .concurrency_limit(limit)
        .build()
        .expect("valid request")
}

#[tokio::test]
async fn test_every_sandbox_gets_exactly_one_outcome() {
    for (count, limit) in [(1, 1), (5, 2), (10, 10), (17, 4), (8, 32)] {
        let runtime = Arc::new(InMemoryRuntime::new());
        let provisioner = Provisioner::new(runtime, config());

        let result = provisioner.provision(&request("fleet", count, limit)).await.unwrap();

        assert_eq!(result.total, count as usize);
        assert_eq!(result.resolved(), count as usize);
        let unique: HashSet<_> = result.outcomes().map(|o| o.name().to_string()).collect();
        assert_eq!(unique.len(), count as usize);
    }
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let provisioner = Provisioner::new(runtime.clone(), config());
    let request = request("idem", 6, 3);

    let first = provisioner.provision(&request).await.unwrap();
    assert_eq!(first.created.len(), 6);

    let second = provisioner.provision(&request).await.unwrap();
    assert_eq!(second.already_existing.len(), 6);
    assert!(second.created.is_empty());
    assert!(second.failed.is_empty());
    assert_eq!(second.status, BatchStatus::Success);
    assert_eq!(runtime.len().await, 6);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_bounds_in_flight_creates() {
    let runtime = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_millis(50)));
    let provisioner = Provisioner::new(runtime.clone(), config());

    let result = provisioner.provision(&request("bound", 20, 4)).await.unwrap();

    assert_eq!(result.created.len(), 20);
    assert_eq!(runtime.peak_in_flight(), 4);
}

#[tokio::test]
async fn test_permanent_failures_yield_partial_success() {
    let runtime = Arc::new(InMemoryRuntime::new());
    for name in ["part_3", "part_7"] {
        runtime
            .fail_always(name, RuntimeError::Permanent("manifest unknown".into()))
            .await;
    }
    let provisioner = Provisioner::new(runtime, config());

    let result = provisioner.provision(&request("part", 10, 4)).await.unwrap();

    assert_eq!(result.status, BatchStatus::PartialSuccess);
    assert_eq!(result.created.len(), 8);
    assert_eq!(result.failed.len(), 2);
    let failed: Vec<u32> = result.failed.iter().map(|o| o.name().index()).collect();
    assert_eq!(failed, vec![3, 7]);
    assert!(result
        .failed
        .iter()
        .all(|o| o.error().map(|e| e.kind()) == Some(ErrorKind::Permanent)));
}

#[tokio::test]
async fn test_all_permanent_failures_yield_total_failure() {
    let runtime = Arc::new(InMemoryRuntime::new());
    for i in 1..=4 {
        runtime
            .fail_always(&format!("dead_{i}"), RuntimeError::Permanent("bad image".into()))
            .await;
    }
    let provisioner = Provisioner::new(runtime, config());

    let result = provisioner.provision(&request("dead", 4, 2)).await.unwrap();

    assert_eq!(result.status, BatchStatus::TotalFailure);
    assert!(result.created.is_empty());
    assert!(result.already_existing.is_empty());
    assert_eq!(result.failed.len(), 4);
}

#[tokio::test]
async fn test_invalid_request_makes_no_runtime_calls() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let provisioner = Provisioner::new(runtime.clone(), config());

    let zero = BatchRequest {
        count: 0,
        name_prefix: "zero".to_string(),
        workload: WorkloadSpec::default(),
        concurrency_limit: 1,
        deadline: None,
    };
    assert_eq!(
        provisioner.provision(&zero).await.unwrap_err(),
        ValidationError::ZeroCount
    );

    let no_prefix = BatchRequest {
        name_prefix: String::new(),
        count: 3,
        ..zero.clone()
    };
    assert_eq!(
        provisioner.provision(&no_prefix).await.unwrap_err(),
        ValidationError::EmptyPrefix
    );

    let no_workers = BatchRequest {
        count: 3,
        concurrency_limit: 0,
        ..zero
    };
    assert_eq!(
        provisioner.provision(&no_workers).await.unwrap_err(),
        ValidationError::ZeroConcurrency
    );

    assert_eq!(runtime.create_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_resolves_every_sandbox() {
    let runtime = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_millis(100)));
    let provisioner = Provisioner::new(runtime.clone(), config());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let result = provisioner
        .provision_with_cancel(&request("cancel", 10, 2), cancel)
        .await
        .unwrap();

    assert_eq!(result.resolved(), 10);
    assert!(result.created.len() >= 2);
    let cancelled = result
        .failed
        .iter()
        .filter(|o| o.error().map(|e| e.kind()) == Some(ErrorKind::Cancelled))
        .count();
    assert_eq!(cancelled, result.failed.len());
    assert!(cancelled >= 4);
    assert!(result
        .failed
        .iter()
        .all(|o| o.status() == OutcomeStatus::Failed && o.attempts() == 0));
    assert_eq!(runtime.len().await, result.created.len());
}

#[tokio::test]
async fn test_cancelled_before_start_attempts_nothing() {
    let runtime = Arc::new(InMemoryRuntime::new());
    let provisioner = Provisioner::new(runtime.clone(), config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = provisioner
        .provision_with_cancel(&request("early", 5, 5), cancel)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::TotalFailure);
    assert_eq!(result.failed.len(), 5);
    assert_eq!(runtime.create_calls(), 0);
}

/// Cancelling while a worker sleeps in backoff ends the sleep early and keeps
/// the attempt count.
#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_backoff() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime
        .fail_always("slow_1", RuntimeError::Transient("connection reset".into()))
        .await;
    let config = EngineConfig {
        create_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            jitter: false,
        },
    };
    let provisioner = Provisioner::new(runtime.clone(), config);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = tokio::time::Instant::now();
    let result = provisioner
        .provision_with_cancel(&request("slow", 1, 1), cancel)
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(3600));
    assert_eq!(result.status, BatchStatus::TotalFailure);
    let outcome = &result.failed[0];
    assert_eq!(outcome.error().map(|e| e.kind()), Some(ErrorKind::Cancelled));
    assert_eq!(outcome.attempts(), 1);
    assert_eq!(runtime.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_the_batch() {
    let runtime = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_millis(100)));
    let provisioner = Provisioner::new(runtime, config());
    let request = BatchRequest::builder("late")
        .count(6)
        .concurrency_limit(1)
        .deadline(Duration::from_millis(250))
        .build()
        .unwrap();

    let result = provisioner.provision(&request).await.unwrap();

    assert_eq!(result.resolved(), 6);
    assert_eq!(result.status, BatchStatus::PartialSuccess);
    assert!(result
        .failed
        .iter()
        .all(|o| o.error().map(|e| e.kind()) == Some(ErrorKind::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_recover_within_budget() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime
        .fail_next("flaky_2", RuntimeError::Transient("connection reset".into()))
        .await;
    runtime
        .fail_always("flaky_4", RuntimeError::Transient("toomanyrequests".into()))
        .await;
    let provisioner = Provisioner::new(runtime.clone(), config());

    let result = provisioner.provision(&request("flaky", 4, 4)).await.unwrap();

    assert_eq!(result.status, BatchStatus::PartialSuccess);
    assert_eq!(result.created.len(), 3);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(
        result.failed[0].error().map(|e| e.kind()),
        Some(ErrorKind::RetriesExhausted)
    );
    // 1 + 2 + 1 + 3 calls
    assert_eq!(runtime.create_calls(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_create_timeout_counts_as_transient() {
    let runtime = Arc::new(InMemoryRuntime::new().with_latency(Duration::from_secs(10)));
    let mut config = config();
    config.create_timeout = Duration::from_secs(1);
    let provisioner = Provisioner::new(runtime.clone(), config);

    let result = provisioner.provision(&request("slow", 2, 2)).await.unwrap();

    assert_eq!(result.status, BatchStatus::TotalFailure);
    assert!(result
        .failed
        .iter()
        .all(|o| o.error().map(|e| e.kind()) == Some(ErrorKind::RetriesExhausted)));
    assert_eq!(runtime.create_calls(), 6);
}

#[tokio::test]
async fn test_existing_names_count_as_success() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime.seed("mixed_1", "alpine").await;
    runtime.seed("mixed_3", "alpine").await;
    let provisioner = Provisioner::new(runtime.clone(), config());

    let result = provisioner.provision(&request("mixed", 3, 3)).await.unwrap();

    assert_eq!(result.status, BatchStatus::Success);
    assert_eq!(result.created.len(), 1);
    assert_eq!(result.already_existing.len(), 2);
    assert!(result.already_existing.iter().all(|o| o.handle().is_none()));
}

/// Runtime whose create panics for one name.
struct PanicsOn(&'static str);

#[async_trait]
impl RuntimeClient for PanicsOn {
    async fn create(
        &self,
        name: &str,
        _spec: &WorkloadSpec,
        _timeout: Duration,
    ) -> Result<RuntimeHandle, RuntimeError> {
        if name == self.0 {
            panic!("runtime adapter bug");
        }
        Ok(RuntimeHandle::new(format!("id-{name}")))
    }

    async fn remove(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn list(&self, _prefix: &str) -> Result<Vec<SandboxSummary>, RuntimeError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_panicking_worker_still_yields_an_outcome() {
    let provisioner = Provisioner::new(Arc::new(PanicsOn("boom_2")), config());

    let result = provisioner.provision(&request("boom", 3, 3)).await.unwrap();

    assert_eq!(result.resolved(), 3);
    assert_eq!(result.status, BatchStatus::PartialSuccess);
    assert_eq!(result.failed[0].name().as_str(), "boom_2");
    assert_eq!(
        result.failed[0].error().map(|e| e.kind()),
        Some(ErrorKind::Internal)
    );
}

#[tokio::test]
async fn test_batch_result_serializes_to_json() {
    let runtime = Arc::new(InMemoryRuntime::new());
    runtime
        .fail_always("json_2", RuntimeError::Permanent("bad image".into()))
        .await;
    let provisioner = Provisioner::new(runtime, config());

    let result = provisioner.provision(&request("json", 2, 2)).await.unwrap();
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["status"], "partial_success");
    assert_eq!(value["created"][0]["name"], "json_1");
    assert_eq!(value["created"][0]["status"], "created");
    assert_eq!(value["failed"][0]["error"]["kind"], "permanent");
    assert!(value["failed"][0].get("handle").is_none());
}
