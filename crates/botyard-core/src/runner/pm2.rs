//! pm2 runner backend.
//!
//! Drives the `pm2` CLI: `start`, `stop`, `delete`, and `jlist` for state.
//! pm2 owns restart policies and log files; `delete` discards both.

use std::path::Path;
use std::process::Output;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{ProcessRunner, RunnerError};

/// One element of `pm2 jlist` output. Only the fields we read.
#[derive(Debug, Clone, Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pm2_env: Option<Pm2Env>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pm2Env {
    #[serde(default)]
    status: String,
}

impl Pm2Process {
    fn is_online(&self) -> bool {
        self.pm2_env.as_ref().is_some_and(|env| env.status == "online")
    }
}

/// Runner backed by the `pm2` process manager.
#[derive(Debug, Clone)]
pub struct Pm2Runner {
    /// Path to the `pm2` binary. Defaults to `"pm2"` (found via `$PATH`).
    binary: String,
    entry_file: String,
}

impl Pm2Runner {
    /// Create a runner that invokes `pm2` from `$PATH`.
    pub fn new(entry_file: &str) -> Self {
        Self::with_binary("pm2", entry_file)
    }

    /// Create a runner with a custom `pm2` binary path.
    pub fn with_binary(binary: impl Into<String>, entry_file: &str) -> Self {
        Self {
            binary: binary.into(),
            entry_file: entry_file.to_string(),
        }
    }

    async fn pm2(&self, args: &[&str]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "running pm2");
        Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {} {}", self.binary, args.join(" ")))
    }

    async fn processes(&self) -> Result<Vec<Pm2Process>> {
        let output = self.pm2(&["jlist"]).await?;
        if !output.status.success() {
            anyhow::bail!("pm2 jlist failed: {}", combined_output(&output));
        }
        parse_jlist(&String::from_utf8_lossy(&output.stdout))
    }

    async fn find(&self, name: &str) -> Result<Option<Pm2Process>> {
        Ok(self.processes().await?.into_iter().find(|p| p.name == name))
    }
}

/// Parse `pm2 jlist` stdout.
///
/// pm2 may print banners or update notices before the JSON array, so parsing
/// starts at the first `[`.
fn parse_jlist(stdout: &str) -> Result<Vec<Pm2Process>> {
    let start = stdout
        .find('[')
        .context("pm2 jlist output contains no JSON array")?;
    serde_json::from_str(stdout[start..].trim_end()).context("malformed pm2 jlist output")
}

fn combined_output(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    format!("{}{}", stderr.trim(), stdout.trim())
}

/// pm2 reports unknown names as "Process or Namespace <name> not found",
/// on stderr or stdout depending on the version.
fn is_not_found(output: &Output) -> bool {
    combined_output(output).contains("not found")
}

#[async_trait]
impl ProcessRunner for Pm2Runner {
    fn name(&self) -> &str {
        "pm2"
    }

    async fn start(&self, name: &str, install_path: &Path) -> Result<(), RunnerError> {
        let entry = install_path.join(&self.entry_file);
        if !entry.is_file() {
            return Err(RunnerError::MissingEntry(entry));
        }

        // A stopped entry under the same name would make `pm2 start <file>`
        // spawn a second process; clear it first.
        if let Some(existing) = self.find(name).await? {
            if existing.is_online() {
                return Err(RunnerError::AlreadyRunning(name.to_string()));
            }
            warn!(bot = name, "removing stale pm2 entry before start");
            self.remove(name).await?;
        }

        let entry_str = entry.to_string_lossy();
        let cwd = install_path.to_string_lossy();
        let output = self
            .pm2(&["start", &entry_str, "--name", name, "--cwd", &cwd])
            .await?;
        if !output.status.success() {
            return Err(anyhow::anyhow!("pm2 start failed: {}", combined_output(&output)).into());
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RunnerError> {
        let output = self.pm2(&["stop", name]).await?;
        if output.status.success() {
            return Ok(());
        }
        if is_not_found(&output) {
            return Err(RunnerError::NotFound(name.to_string()));
        }
        Err(anyhow::anyhow!("pm2 stop failed: {}", combined_output(&output)).into())
    }

    async fn remove(&self, name: &str) -> Result<(), RunnerError> {
        let output = self.pm2(&["delete", name]).await?;
        if output.status.success() || is_not_found(&output) {
            return Ok(());
        }
        Err(anyhow::anyhow!("pm2 delete failed: {}", combined_output(&output)).into())
    }

    async fn is_alive(&self, name: &str) -> Result<bool, RunnerError> {
        Ok(self.find(name).await?.is_some_and(|p| p.is_online()))
    }

    async fn list_alive(&self) -> Result<Vec<String>, RunnerError> {
        Ok(self
            .processes()
            .await?
            .into_iter()
            .filter(Pm2Process::is_online)
            .map(|p| p.name)
            .collect())
    }
}
