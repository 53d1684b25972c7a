//! [`RuntimeClient`] backed by a Docker-compatible CLI.

use super::{RuntimeClient, RuntimeHandle, SandboxSummary};
use crate::config::WorkloadSpec;
use crate::error::RuntimeError;
use crate::naming::NAME_SEPARATOR;
use async_trait::async_trait;
use serde::Deserialize;
use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use uuid::Uuid;

/// Timeout for list and remove calls.
const ADMIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for each call made while discarding a failed create.
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Label tying a container to the single `run` invocation that made it.
const ATTEMPT_LABEL: &str = "sandfleet.attempt";

/// stderr fragments that mean "try again later".
const TRANSIENT_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "connection refused",
    "connection reset",
    "i/o timeout",
    "tls handshake timeout",
    "context deadline exceeded",
    "toomanyrequests",
    "too many requests",
    "rate limit",
    "service unavailable",
    "temporary failure",
];

/// Drives `docker` (or a compatible binary such as `podman`) as a subprocess.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerRuntime {
    /// Create a runtime that invokes `binary`.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Get the CLI binary this runtime invokes.
    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, args: &[String], timeout: Duration) -> Result<Output, RuntimeError> {
        tracing::debug!(binary = %self.binary, ?args, "Invoking runtime CLI");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.spawn_error(e)),
            Err(_) => {
                return Err(RuntimeError::Transient(format!(
                    "{} did not finish within {:?}",
                    self.binary, timeout
                )))
            }
        };

        tracing::trace!(
            status = ?output.status.code(),
            stdout = %String::from_utf8_lossy(&output.stdout),
            stderr = %String::from_utf8_lossy(&output.stderr),
            "Runtime CLI finished"
        );
        Ok(output)
    }

    fn spawn_error(&self, err: io::Error) -> RuntimeError {
        match err.kind() {
            io::ErrorKind::NotFound => {
                RuntimeError::Permanent(format!("runtime binary {:?} not found", self.binary))
            }
            io::ErrorKind::PermissionDenied => RuntimeError::Permanent(format!(
                "permission denied running {:?}",
                self.binary
            )),
            _ => RuntimeError::Transient(format!("failed to run {:?}: {}", self.binary, err)),
        }
    }

    /// Remove whatever a failed `run` left behind.
    ///
    /// `run -d` creates the container before starting it, so a start failure
    /// or a killed CLI can leave a container that never ran. Only containers
    /// carrying this call's attempt label are touched; a sandbox that held the
    /// name beforehand cannot carry it. Failures are logged, not returned.
    async fn discard_attempt(&self, name: &str, attempt: &str) {
        let filter = format!("label={ATTEMPT_LABEL}={attempt}");
        let args = ["ps", "-aq", "--filter", filter.as_str()].map(String::from);
        let ids: Vec<String> = match self.run(&args, CLEANUP_TIMEOUT).await {
            Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
                .split_whitespace()
                .map(String::from)
                .collect(),
            Ok(output) => {
                tracing::warn!(
                    name,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "Could not look up container left by failed create"
                );
                return;
            }
            Err(e) => {
                tracing::debug!(name, error = %e, "Skipping cleanup of failed create");
                return;
            }
        };
        if ids.is_empty() {
            return;
        }

        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(ids);
        match self.run(&args, CLEANUP_TIMEOUT).await {
            Ok(output) if output.status.success() => {
                tracing::info!(name, "Removed container left by failed create");
            }
            Ok(output) => tracing::warn!(
                name,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Could not remove container left by failed create"
            ),
            Err(e) => {
                tracing::warn!(name, error = %e, "Could not remove container left by failed create")
            }
        }
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn create(
        &self,
        name: &str,
        spec: &WorkloadSpec,
        timeout: Duration,
    ) -> Result<RuntimeHandle, RuntimeError> {
        let attempt = Uuid::new_v4().simple().to_string();
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--label".to_string(),
            format!("{ATTEMPT_LABEL}={attempt}"),
            "--name".to_string(),
            name.to_string(),
            spec.image.clone(),
        ];
        args.extend(spec.command.iter().cloned());

        let output = match self.run(&args, timeout).await {
            Ok(output) => output,
            Err(e) => {
                // The daemon may have created the container before the CLI was killed.
                self.discard_attempt(name, &attempt).await;
                return Err(e);
            }
        };

        if !output.status.success() {
            let err = classify_create_failure(name, &String::from_utf8_lossy(&output.stderr));
            if !matches!(err, RuntimeError::NameConflict(_)) {
                self.discard_attempt(name, &attempt).await;
            }
            return Err(err);
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            self.discard_attempt(name, &attempt).await;
            return Err(RuntimeError::Permanent(format!(
                "{} run returned no container id for {}",
                self.binary, name
            )));
        }
        Ok(RuntimeHandle::new(id))
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        let args = ["rm", "-f", name].map(String::from);
        let output = self.run(&args, ADMIN_TIMEOUT).await?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.to_lowercase().contains("no such container") {
            return Err(RuntimeError::NotFound(name.to_string()));
        }
        Err(classify_stderr(&stderr))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<SandboxSummary>, RuntimeError> {
        let owned = format!("{prefix}{NAME_SEPARATOR}");
        let args = [
            "ps".to_string(),
            "-a".to_string(),
            "--filter".to_string(),
            format!("name={owned}"),
            "--format".to_string(),
            "{{json .}}".to_string(),
        ];

        let output = self.run(&args, ADMIN_TIMEOUT).await?;
        if !output.status.success() {
            return Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_ps_lines(&stdout)
            .into_iter()
            .filter(|s| s.name.starts_with(&owned))
            .collect())
    }
}

/// Classify a failed `run` from its stderr.
pub fn classify_create_failure(name: &str, stderr: &str) -> RuntimeError {
    let lower = stderr.to_lowercase();
    if lower.contains("is already in use") || lower.contains("conflict.") {
        return RuntimeError::NameConflict(name.to_string());
    }
    classify_stderr(stderr)
}

fn classify_stderr(stderr: &str) -> RuntimeError {
    let message = stderr.trim();
    let message = if message.is_empty() {
        "runtime exited with an error and no output".to_string()
    } else {
        message.to_string()
    };

    let lower = message.to_lowercase();
    if TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker)) {
        RuntimeError::Transient(message)
    } else {
        RuntimeError::Permanent(message)
    }
}

/// One line of `ps --format {{json .}}`.
#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Names")]
    names: String,
    #[serde(rename = "Status", default)]
    status: String,
}

fn parse_ps_lines(stdout: &str) -> Vec<SandboxSummary> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PsEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, line, "Skipping unparsable ps line");
                None
            }
        })
        .map(|entry| SandboxSummary {
            name: entry
                .names
                .split(',')
                .next()
                .unwrap_or_default()
                .trim()
                .to_string(),
            id: entry.id,
            image: entry.image,
            status: entry.status,
        })
        .collect()
}
