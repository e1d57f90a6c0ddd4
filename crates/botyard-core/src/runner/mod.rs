//! Process runner abstraction.
//!
//! Decouples the supervisor from the external process manager so that
//! different backends (pm2, directly spawned child processes, test fakes)
//! can be used interchangeably. Every operation is addressed by the bot's
//! name, which is also the process name inside the runner.

pub mod local;
pub mod pm2;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use crate::bundle::DEFAULT_ENTRY_FILE;

/// Failure reported by a [`ProcessRunner`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The runner has no process registered under this name.
    #[error("process {0:?} not found")]
    NotFound(String),

    /// A live process is already registered under this name.
    #[error("process {0:?} is already running")]
    AlreadyRunning(String),

    #[error("entry file missing: {}", .0.display())]
    MissingEntry(PathBuf),

    /// The runner itself failed (spawn error, CLI failure, unparsable output).
    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// Adapter over an external process supervisor.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Human-readable name of the backend (e.g. "pm2", "local").
    fn name(&self) -> &str;

    /// Launch the entry file inside `install_path` under the process name
    /// `name`, with `install_path` as the working directory.
    ///
    /// Fails with [`RunnerError::AlreadyRunning`] rather than launching a
    /// second process under the same name.
    async fn start(&self, name: &str, install_path: &Path) -> Result<(), RunnerError>;

    /// Request graceful termination. Fails with [`RunnerError::NotFound`] if
    /// the runner does not know the name.
    async fn stop(&self, name: &str) -> Result<(), RunnerError>;

    /// Drop all runner-side bookkeeping for `name`. Removing an unknown name
    /// succeeds.
    async fn remove(&self, name: &str) -> Result<(), RunnerError>;

    /// Point-in-time liveness of the named process.
    async fn is_alive(&self, name: &str) -> Result<bool, RunnerError>;

    /// Names of every process the runner currently reports as alive.
    async fn list_alive(&self) -> Result<Vec<String>, RunnerError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn ProcessRunner) {}
};

/// Settings for [`create_runner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Backend name: `"pm2"` or `"local"`.
    pub kind: String,
    /// Entry file launched inside each bot's install directory.
    pub entry_file: String,
    /// Program that runs the entry file (local backend only).
    pub interpreter: String,
    /// How long a stopped process gets to exit before being killed
    /// (local backend only).
    pub stop_grace: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            kind: "pm2".to_string(),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            interpreter: "node".to_string(),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Factory function: create a runner backend from its settings.
pub fn create_runner(settings: &RunnerSettings) -> anyhow::Result<Arc<dyn ProcessRunner>> {
    match settings.kind.as_str() {
        "pm2" => Ok(Arc::new(pm2::Pm2Runner::new(&settings.entry_file))),
        "local" => Ok(Arc::new(local::LocalRunner::new(
            &settings.interpreter,
            &settings.entry_file,
            settings.stop_grace,
        ))),
        other => bail!("unknown runner: {other:?} (expected \"pm2\" or \"local\")"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_known_backends() {
        let mut settings = RunnerSettings::default();
        assert_eq!(create_runner(&settings).unwrap().name(), "pm2");

        settings.kind = "local".into();
        assert_eq!(create_runner(&settings).unwrap().name(), "local");
    }

    #[test]
    fn rejects_unknown_backend() {
        let settings = RunnerSettings {
            kind: "systemd".into(),
            ..RunnerSettings::default()
        };
        let err = create_runner(&settings).err().expect("should fail");
        assert!(err.to_string().contains("unknown runner"), "{err}");
    }

    #[test]
    fn failed_error_shows_context_chain() {
        let err: RunnerError = anyhow::anyhow!("exit status 1").context("pm2 start").into();
        assert_eq!(err.to_string(), "pm2 start: exit status 1");
    }
}
