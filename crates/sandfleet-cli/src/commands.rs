//! Subcommand handlers.

use crate::cli::ProvisionArgs;
use crate::config::{CliConfig, DEFAULT_LIMIT};
use anyhow::Context;
use sandfleet_core::{
    BatchRequest, BatchResult, BatchStatus, CancellationToken, DockerRuntime, InMemoryRuntime,
    OutcomeStatus, ProvisionEvent, Provisioner, RollbackReport, RuntimeClient, WorkloadSpec,
};
use serde::Serialize;
use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What `provision --json` prints.
#[derive(Debug, Serialize)]
struct ProvisionReport<'a> {
    result: &'a BatchResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    rollback: Option<&'a RollbackReport>,
}

/// Exit code for a batch status: 0 success, 2 partial, 1 total failure.
pub fn exit_code(status: BatchStatus) -> ExitCode {
    match status {
        BatchStatus::Success => ExitCode::SUCCESS,
        BatchStatus::PartialSuccess => ExitCode::from(2),
        BatchStatus::TotalFailure => ExitCode::FAILURE,
    }
}

fn runtime(config: &CliConfig, dry_run: bool) -> Arc<dyn RuntimeClient> {
    if dry_run {
        tracing::info!("Dry run: using in-memory runtime");
        Arc::new(InMemoryRuntime::new())
    } else {
        Arc::new(DockerRuntime::new(config.runtime_bin.clone()))
    }
}

/// Build the batch request described by `args`.
pub fn build_request(args: &ProvisionArgs) -> anyhow::Result<BatchRequest> {
    let workload = if args.command.is_empty() {
        WorkloadSpec::idle(args.image.clone(), Duration::from_secs(args.idle_secs))
    } else {
        WorkloadSpec::new(args.image.clone(), args.command.clone())
    };

    let limit = args
        .limit
        .unwrap_or_else(|| (args.count as usize).clamp(1, DEFAULT_LIMIT));

    let mut builder = BatchRequest::builder(args.prefix.clone())
        .count(args.count)
        .concurrency_limit(limit)
        .workload(workload);
    if let Some(secs) = args.deadline_secs {
        builder = builder.deadline(Duration::from_secs(secs));
    }

    builder.build().context("invalid batch request")
}

/// `sandfleet provision`
pub async fn provision(args: ProvisionArgs, config: &CliConfig) -> anyhow::Result<ExitCode> {
    let request = build_request(&args)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let provisioner = Provisioner::new(runtime(config, args.dry_run), config.engine_config())
        .with_events(events_tx);

    let cancel = CancellationToken::new();
    let interrupt = tokio::spawn(handle_interrupts(
        tokio::signal::ctrl_c,
        cancel.clone(),
        || {
            std::process::exit(INTERRUPTED);
        },
    ));

    match provisioner.preflight(&request).await {
        Ok(taken) if !taken.is_empty() => {
            tracing::info!(
                count = taken.len(),
                first = %taken[0],
                "Names already in use will be reported as already existing"
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "Pre-flight listing failed, continuing"),
    }

    let progress = tokio::spawn(report_progress(events_rx));

    let result = provisioner.provision_with_cancel(&request, cancel).await?;

    let rollback = if args.rollback_on_failure && !result.is_success() {
        Some(provisioner.rollback(&result).await)
    } else {
        None
    };

    // Closes the event channel so the progress task drains and exits.
    drop(provisioner);
    let _ = progress.await;
    interrupt.abort();

    if args.json {
        let report = ProvisionReport {
            result: &result,
            rollback: rollback.as_ref(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render_summary(&request.name_prefix, &result));
        if let Some(report) = &rollback {
            println!(
                "rolled back {} sandbox(es), {} could not be removed",
                report.removed.len(),
                report.failed.len()
            );
        }
    }

    Ok(exit_code(result.status))
}

/// Exit status after a second interrupt.
const INTERRUPTED: i32 = 130;

/// Cancel the batch on the first interrupt and call `exit` on the second.
async fn handle_interrupts<S, F>(mut interrupt: S, cancel: CancellationToken, exit: impl FnOnce())
where
    S: FnMut() -> F,
    F: Future<Output = std::io::Result<()>>,
{
    if interrupt().await.is_err() {
        return;
    }
    tracing::warn!("Interrupted, cancelling pending sandboxes (press Ctrl-C again to exit now)");
    cancel.cancel();

    if interrupt().await.is_ok() {
        tracing::error!("Interrupted again, exiting without waiting for in-flight creates");
        exit();
    }
}

async fn report_progress(mut events: mpsc::UnboundedReceiver<ProvisionEvent>) {
    let mut total = 0;
    let mut done = 0;
    while let Some(event) = events.recv().await {
        match event {
            ProvisionEvent::BatchStarted {
                total: t,
                pool_size,
                ..
            } => {
                total = t;
                tracing::info!(total, pool_size, "Provisioning");
            }
            ProvisionEvent::Retrying {
                name,
                attempt,
                delay_ms,
                error,
                ..
            } => {
                tracing::warn!(%name, attempt, delay_ms, %error, "Retrying");
            }
            ProvisionEvent::SandboxFinished { outcome, .. } => {
                done += 1;
                match outcome.error() {
                    Some(error) => tracing::warn!(
                        "[{done}/{total}] {} {}: {error}",
                        outcome.name(),
                        outcome.status()
                    ),
                    None => tracing::info!("[{done}/{total}] {} {}", outcome.name(), outcome.status()),
                }
            }
            ProvisionEvent::BatchFinished { status, .. } => {
                tracing::info!(%status, "Batch finished");
            }
        }
    }
}

/// Human-readable batch summary.
pub fn render_summary(prefix: &str, result: &BatchResult) -> String {
    let mut out = format!(
        "batch {prefix}: {} ({} created, {} already existing, {} failed of {})\n",
        result.status,
        result.created.len(),
        result.already_existing.len(),
        result.failed.len(),
        result.total
    );
    for outcome in result.outcomes() {
        let detail = match outcome.status() {
            OutcomeStatus::Created => outcome
                .handle()
                .map(|h| h.as_str().chars().take(12).collect::<String>())
                .unwrap_or_default(),
            OutcomeStatus::AlreadyExists => String::new(),
            OutcomeStatus::Failed => outcome.error().map(ToString::to_string).unwrap_or_default(),
        };
        out.push_str(&format!(
            "  {:<24} {:<15} {}\n",
            outcome.name().as_str(),
            outcome.status().to_string(),
            detail
        ));
    }
    out
}

/// `sandfleet list`
pub async fn list(prefix: &str, json: bool, config: &CliConfig) -> anyhow::Result<ExitCode> {
    let provisioner = Provisioner::new(runtime(config, false), config.engine_config());
    let sandboxes = provisioner
        .list(prefix)
        .await
        .with_context(|| format!("failed to list sandboxes under {prefix:?}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sandboxes)?);
    } else {
        println!("{:<24} {:<14} {:<20} STATUS", "NAME", "ID", "IMAGE");
        for s in &sandboxes {
            let id: String = s.id.chars().take(12).collect();
            println!("{:<24} {:<14} {:<20} {}", s.name, id, s.image, s.status);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// `sandfleet destroy`
pub async fn destroy(prefix: &str, config: &CliConfig) -> anyhow::Result<ExitCode> {
    let provisioner = Provisioner::new(runtime(config, false), config.engine_config());
    let report = provisioner
        .teardown(prefix)
        .await
        .with_context(|| format!("failed to list sandboxes under {prefix:?}"))?;

    println!("removed {} sandbox(es)", report.removed.len());
    for failure in &report.failed {
        println!("  could not remove {}: {}", failure.name, failure.error);
    }

    Ok(if report.is_complete() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
