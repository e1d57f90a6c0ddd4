//! Local runner backend: bots run as direct child processes of this server.
//!
//! No restart policy and no state survives a server restart; child
//! processes are killed when the runner is dropped.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ProcessRunner, RunnerError};

/// Runner that spawns `<interpreter> <entry_file>` per bot.
#[derive(Clone)]
pub struct LocalRunner {
    interpreter: String,
    entry_file: String,
    stop_grace: Duration,
    /// Child handles keyed by bot name.
    processes: Arc<Mutex<HashMap<String, Child>>>,
}

impl std::fmt::Debug for LocalRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalRunner")
            .field("interpreter", &self.interpreter)
            .field("entry_file", &self.entry_file)
            .field("stop_grace", &self.stop_grace)
            .finish()
    }
}

impl LocalRunner {
    pub fn new(interpreter: &str, entry_file: &str, stop_grace: Duration) -> Self {
        Self {
            interpreter: interpreter.to_string(),
            entry_file: entry_file.to_string(),
            stop_grace,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// SIGTERM, then SIGKILL if the child outlives the grace period.
    async fn terminate(&self, name: &str, mut child: Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            // SAFETY: pid belongs to a child we spawned and have not reaped.
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                warn!(bot = name, pid, "SIGTERM failed, proceeding to SIGKILL");
            }
        }

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(Ok(status)) => debug!(bot = name, %status, "process exited"),
            _ => {
                debug!(bot = name, "process did not exit in time, sending SIGKILL");
                if let Err(e) = child.kill().await {
                    warn!(bot = name, error = %e, "SIGKILL failed");
                }
            }
        }
    }

    /// Take the child out of the map so that waiting for it to exit does not
    /// block operations on other bots.
    async fn take(&self, name: &str) -> Option<Child> {
        self.processes.lock().await.remove(name)
    }
}

#[async_trait]
impl ProcessRunner for LocalRunner {
    fn name(&self) -> &str {
        "local"
    }

    async fn start(&self, name: &str, install_path: &Path) -> Result<(), RunnerError> {
        let entry = install_path.join(&self.entry_file);
        if !entry.is_file() {
            return Err(RunnerError::MissingEntry(entry));
        }

        let mut processes = self.processes.lock().await;
        if let Some(child) = processes.get_mut(name) {
            match child.try_wait() {
                Ok(None) => return Err(RunnerError::AlreadyRunning(name.to_string())),
                Ok(Some(status)) => {
                    debug!(bot = name, %status, "replacing exited process");
                    processes.remove(name);
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("failed to poll process {name}"))
                        .into());
                }
            }
        }

        let child = Command::new(&self.interpreter)
            .arg(&self.entry_file)
            .current_dir(install_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn {} {}", self.interpreter, entry.display()))?;

        debug!(bot = name, pid = ?child.id(), "spawned process");
        processes.insert(name.to_string(), child);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RunnerError> {
        let Some(child) = self.take(name).await else {
            return Err(RunnerError::NotFound(name.to_string()));
        };
        self.terminate(name, child).await;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RunnerError> {
        // Bookkeeping is just the child handle; a live one is terminated.
        if let Some(child) = self.take(name).await {
            self.terminate(name, child).await;
        }
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> Result<bool, RunnerError> {
        let mut processes = self.processes.lock().await;
        let Some(child) = processes.get_mut(name) else {
            return Ok(false);
        };
        match child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(_)) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("failed to poll process {name}"))
                .into()),
        }
    }

    async fn list_alive(&self) -> Result<Vec<String>, RunnerError> {
        let mut processes = self.processes.lock().await;
        let mut alive = Vec::new();
        for (name, child) in processes.iter_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                alive.push(name.clone());
            }
        }
        alive.sort();
        Ok(alive)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A bot directory whose entry file is a shell script run by `sh`.
    fn sh_bot(dir: &Path, name: &str, script: &str) -> std::path::PathBuf {
        let bot_dir = dir.join(name);
        std::fs::create_dir_all(&bot_dir).unwrap();
        std::fs::write(bot_dir.join("index.js"), script).unwrap();
        bot_dir
    }

    fn runner() -> LocalRunner {
        LocalRunner::new("sh", "index.js", Duration::from_secs(2))
    }

    #[tokio::test]
    async fn start_stop_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        let bot = sh_bot(tmp.path(), "sleepy", "sleep 30\n");
        let runner = runner();

        runner.start("sleepy", &bot).await.unwrap();
        assert!(runner.is_alive("sleepy").await.unwrap());
        assert_eq!(runner.list_alive().await.unwrap(), vec!["sleepy".to_string()]);

        runner.stop("sleepy").await.unwrap();
        assert!(!runner.is_alive("sleepy").await.unwrap());
        assert!(runner.list_alive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let bot = sh_bot(tmp.path(), "sleepy", "sleep 30\n");
        let runner = runner();

        runner.start("sleepy", &bot).await.unwrap();
        let err = runner.start("sleepy", &bot).await.unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyRunning(_)), "{err:?}");

        runner.remove("sleepy").await.unwrap();
    }

    #[tokio::test]
    async fn stop_unknown_is_not_found_and_remove_is_idempotent() {
        let runner = runner();
        let err = runner.stop("ghost").await.unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)), "{err:?}");
        runner.remove("ghost").await.unwrap();
        runner.remove("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn exited_process_can_be_restarted() {
        let tmp = tempfile::tempdir().unwrap();
        let bot = sh_bot(tmp.path(), "quick", "exit 0\n");
        let runner = runner();

        runner.start("quick", &bot).await.unwrap();
        for _ in 0..50 {
            if !runner.is_alive("quick").await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!runner.is_alive("quick").await.unwrap());

        runner.start("quick", &bot).await.unwrap();
        runner.remove("quick").await.unwrap();
    }

    #[tokio::test]
    async fn term_ignoring_process_is_killed() {
        let tmp = tempfile::tempdir().unwrap();
        let bot = sh_bot(tmp.path(), "stubborn", "trap '' TERM\nwhile true; do sleep 1; done\n");
        let runner = LocalRunner::new("sh", "index.js", Duration::from_millis(200));

        runner.start("stubborn", &bot).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.stop("stubborn"))
            .await
            .expect("stop should finish after the grace period")
            .unwrap();
        assert!(!runner.is_alive("stubborn").await.unwrap());
    }

    #[tokio::test]
    async fn missing_entry_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = runner().start("none", tmp.path()).await.unwrap_err();
        assert!(matches!(err, RunnerError::MissingEntry(_)), "{err:?}");
    }
}
