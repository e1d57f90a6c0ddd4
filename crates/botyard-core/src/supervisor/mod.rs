//! Lifecycle supervisor: start, stop, delete, and status for installed bots.
//!
//! Per-bot state machine:
//!
//! ```text
//! Unregistered --install--> Stopped --start--> Running
//!                              ^                  |
//!                              +------stop--------+
//! Stopped | Running --delete--> Deleting --> Unregistered
//! ```
//!
//! The registry decides whether a bot exists, the runner decides whether it
//! is alive, and [`RuntimeState`] caches the latter. Every mutating
//! operation runs under the bot's [`NameLocks`] entry, and every external
//! call is bounded by [`SupervisorConfig::call_timeout`].

pub mod locks;
pub mod runtime;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use botyard_db::models::BotRecord;

use crate::bundle::{self, DEFAULT_ENTRY_FILE};
use crate::deadline::within;
use crate::error::BotError;
use crate::registry::{BotRegistry, RegistryError};
use crate::runner::{ProcessRunner, RunnerError};

pub use locks::{NameGuard, NameLocks};
pub use runtime::RuntimeState;

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory under which `<account>/<name>` bot folders live.
    pub bots_root: PathBuf,
    /// Entry file that must exist in a bot's folder before it can start.
    pub entry_file: String,
    /// Upper bound on every registry and runner call.
    pub call_timeout: Duration,
    /// Ask the runner for liveness when answering status queries.
    pub reconcile_status: bool,
}

impl SupervisorConfig {
    pub fn new(bots_root: impl Into<PathBuf>) -> Self {
        Self {
            bots_root: bots_root.into(),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            call_timeout: Duration::from_secs(30),
            reconcile_status: true,
        }
    }
}

/// Externally visible run state of a registered bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotStatus {
    Online,
    Offline,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Online => "online",
            Self::Offline => "offline",
        })
    }
}

impl BotStatus {
    fn from_running(running: bool) -> Self {
        if running { Self::Online } else { Self::Offline }
    }
}

/// One row of an account's bot listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotSummary {
    pub name: String,
    pub status: BotStatus,
    pub created_at: DateTime<Utc>,
    /// When this server first saw the bot running, if it is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_since: Option<DateTime<Utc>>,
}

/// Owns lifecycle decisions for every installed bot.
pub struct Supervisor {
    registry: Arc<dyn BotRegistry>,
    runner: Arc<dyn ProcessRunner>,
    locks: Arc<NameLocks>,
    runtime: RuntimeState,
    config: SupervisorConfig,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("runner", &self.runner.name())
            .field("running", &self.runtime.running_names())
            .field("config", &self.config)
            .finish()
    }
}

impl Supervisor {
    /// Create a supervisor. `locks` should be shared with the
    /// [`crate::InstallPipeline`] so installs and deletes of one name
    /// serialize.
    pub fn new(
        registry: Arc<dyn BotRegistry>,
        runner: Arc<dyn ProcessRunner>,
        locks: Arc<NameLocks>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            registry,
            runner,
            locks,
            runtime: RuntimeState::new(),
            config,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Read-only view of the running-bots cache.
    pub fn runtime(&self) -> &RuntimeState {
        &self.runtime
    }

    /// Rebuild the running-bots cache from the runner.
    ///
    /// Called once at startup, when the cache is empty but bots launched by
    /// an earlier server may still be alive. Returns the number of bots
    /// found running.
    pub async fn reconcile(&self) -> Result<usize, BotError> {
        let alive = within(
            self.config.call_timeout,
            "runner list",
            self.runner.list_alive(),
        )
        .await?
        .map_err(|e| BotError::unavailable(format!("cannot list runner processes: {e}")))?;

        for name in &alive {
            let guard = self.locks.lock(name).await;
            self.runtime.mark_running(&guard);
        }
        for name in self.runtime.running_names() {
            if !alive.contains(&name) {
                let guard = self.locks.lock(&name).await;
                self.runtime.mark_stopped(&guard);
            }
        }

        info!(runner = self.runner.name(), running = alive.len(), "reconciled runtime state");
        Ok(alive.len())
    }

    /// Start a stopped bot.
    ///
    /// Fails with [`BotError::AlreadyRunning`] instead of launching a second
    /// process. On any other failure the bot stays stopped.
    pub async fn start(&self, account_id: &str, name: &str) -> Result<(), BotError> {
        bundle::validate_bot_name(name)?;
        let guard = self.locks.lock(name).await;

        let bot = self
            .require_bot(account_id, name, |e| BotError::start_failed(name, e))
            .await?;
        let install_path = PathBuf::from(&bot.install_path);
        let entry = install_path.join(&self.config.entry_file);
        if !entry.is_file() {
            return Err(BotError::start_failed(
                name,
                format!("entry file {} is missing", entry.display()),
            ));
        }

        // The cache can be stale in either direction after a crash or a
        // restart; the runner decides.
        let alive = within(
            self.config.call_timeout,
            "runner liveness check",
            self.runner.is_alive(name),
        )
        .await?
        .map_err(|e| BotError::start_failed(name, e))?;
        if alive {
            self.runtime.mark_running(&guard);
            return Err(BotError::AlreadyRunning {
                name: name.to_owned(),
            });
        }
        if self.runtime.mark_stopped(&guard) {
            warn!(bot = name, "cached as running but the runner reports it dead");
        }

        let started = within(
            self.config.call_timeout,
            "runner start",
            self.runner.start(name, &install_path),
        )
        .await?;
        match started {
            Ok(()) => {
                self.runtime.mark_running(&guard);
                info!(account = account_id, bot = name, "bot started");
                Ok(())
            }
            Err(RunnerError::AlreadyRunning(_)) => {
                self.runtime.mark_running(&guard);
                Err(BotError::AlreadyRunning {
                    name: name.to_owned(),
                })
            }
            Err(e) => Err(BotError::start_failed(name, e)),
        }
    }

    /// Stop a bot. Stopping a bot that is not running succeeds.
    pub async fn stop(&self, account_id: &str, name: &str) -> Result<(), BotError> {
        bundle::validate_bot_name(name)?;
        let guard = self.locks.lock(name).await;

        self.require_bot(account_id, name, |e| BotError::stop_failed(name, e))
            .await?;
        self.stop_locked(&guard)
            .await?
            .map_err(|e| BotError::stop_failed(name, e))?;

        info!(account = account_id, bot = name, "bot stopped");
        Ok(())
    }

    /// Delete a bot: stop it, drop it from the runner, the registry, and the
    /// filesystem, in that order.
    ///
    /// A failed stop aborts before the registry is touched, so a registry
    /// record never disappears while its process may still be alive. Later
    /// step failures are collected and reported together; every step is
    /// idempotent, so the call can simply be repeated. Deleting an unknown
    /// bot only clears its leftover folder, if any, and succeeds.
    pub async fn delete(&self, account_id: &str, name: &str) -> Result<(), BotError> {
        bundle::validate_bot_name(name)?;
        bundle::validate_account_id(account_id)?;
        let guard = self.locks.lock(name).await;

        let derived_dir = bundle::bot_dir(&self.config.bots_root, account_id, name);
        let Some(bot) = self
            .lookup(account_id, name, |e| BotError::delete_failed(name, e))
            .await?
        else {
            // Runner names are global; without a record this account has no
            // claim on a process by that name.
            remove_dir(&derived_dir)
                .await
                .map_err(|e| BotError::delete_failed(name, format!("files: {e}")))?;
            return Ok(());
        };

        self.stop_locked(&guard)
            .await?
            .map_err(|e| BotError::delete_failed(name, format!("stop: {e}")))?;

        let mut failures = Vec::new();
        match within(
            self.config.call_timeout,
            "runner remove",
            self.runner.remove(name),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(format!("runner remove: {e}")),
            Err(e) => failures.push(e.to_string()),
        }
        if !failures.is_empty() {
            // Keep the record so a retry repeats the runner steps.
            return Err(BotError::delete_failed(name, failures.join("; ")));
        }

        match within(
            self.config.call_timeout,
            "registry remove",
            self.registry.remove_bot(account_id, name),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => failures.push(format!("registry remove: {e}")),
            Err(e) => failures.push(e.to_string()),
        }

        let mut dirs = vec![PathBuf::from(&bot.install_path)];
        if dirs[0] != derived_dir {
            dirs.push(derived_dir);
        }
        for dir in &dirs {
            if let Err(e) = remove_dir(dir).await {
                failures.push(format!("files: {e}"));
            }
        }

        if failures.is_empty() {
            info!(account = account_id, bot = name, "bot deleted");
            Ok(())
        } else {
            warn!(account = account_id, bot = name, ?failures, "bot deletion incomplete");
            Err(BotError::delete_failed(name, failures.join("; ")))
        }
    }

    /// Report whether a registered bot is online.
    ///
    /// When reconciliation is enabled and no operation is in flight for the
    /// bot, the runner is asked directly and the cache updated; otherwise the
    /// cached value is returned.
    pub async fn status(&self, account_id: &str, name: &str) -> Result<BotStatus, BotError> {
        bundle::validate_bot_name(name)?;
        self.require_bot(account_id, name, BotError::unavailable)
            .await?;

        if self.config.reconcile_status {
            if let Some(guard) = self.locks.try_lock(name) {
                match within(
                    self.config.call_timeout,
                    "runner liveness check",
                    self.runner.is_alive(name),
                )
                .await
                {
                    Ok(Ok(alive)) => self.reconcile_one(&guard, alive),
                    Ok(Err(e)) => warn!(bot = name, error = %e, "liveness check failed, using cache"),
                    Err(e) => warn!(bot = name, error = %e, "liveness check timed out, using cache"),
                }
            }
        }

        Ok(BotStatus::from_running(self.runtime.is_running(name)))
    }

    /// List an account's bots with their status, oldest first.
    pub async fn list(&self, account_id: &str) -> Result<Vec<BotSummary>, BotError> {
        let bots = within(
            self.config.call_timeout,
            "registry list",
            self.registry.list_bots(account_id),
        )
        .await?
        .map_err(BotError::unavailable)?;

        if self.config.reconcile_status && !bots.is_empty() {
            match within(
                self.config.call_timeout,
                "runner list",
                self.runner.list_alive(),
            )
            .await
            {
                Ok(Ok(alive)) => {
                    for bot in &bots {
                        if let Some(guard) = self.locks.try_lock(&bot.name) {
                            self.reconcile_one(&guard, alive.contains(&bot.name));
                        }
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "runner list failed, using cache"),
                Err(e) => warn!(error = %e, "runner list timed out, using cache"),
            }
        }

        Ok(bots
            .into_iter()
            .map(|bot| BotSummary {
                status: BotStatus::from_running(self.runtime.is_running(&bot.name)),
                running_since: self.runtime.running_since(&bot.name),
                created_at: bot.created_at,
                name: bot.name,
            })
            .collect())
    }

    fn reconcile_one(&self, guard: &NameGuard, alive: bool) {
        if self.runtime.is_running(guard.name()) != alive {
            warn!(bot = guard.name(), alive, "runtime cache disagreed with runner");
        }
        self.runtime.set(guard, alive);
    }

    /// Stop inside an already-held critical section. A runner "not found"
    /// counts as stopped. The outer error is a timeout; the inner one a
    /// runner failure, after which the cache is left unchanged.
    async fn stop_locked(&self, guard: &NameGuard) -> Result<Result<(), RunnerError>, BotError> {
        let name = guard.name();
        let stopped = within(
            self.config.call_timeout,
            "runner stop",
            self.runner.stop(name),
        )
        .await?;
        match stopped {
            Ok(()) | Err(RunnerError::NotFound(_)) => {
                self.runtime.mark_stopped(guard);
                Ok(Ok(()))
            }
            Err(e) => Ok(Err(e)),
        }
    }

    /// Fetch the registry record; `wrap` classifies a registry failure as
    /// the calling operation's error kind.
    async fn lookup(
        &self,
        account_id: &str,
        name: &str,
        wrap: impl FnOnce(RegistryError) -> BotError,
    ) -> Result<Option<BotRecord>, BotError> {
        within(
            self.config.call_timeout,
            "registry lookup",
            self.registry.get_bot(account_id, name),
        )
        .await?
        .map_err(wrap)
    }

    async fn require_bot(
        &self,
        account_id: &str,
        name: &str,
        wrap: impl FnOnce(RegistryError) -> BotError,
    ) -> Result<BotRecord, BotError> {
        self.lookup(account_id, name, wrap)
            .await?
            .ok_or_else(|| BotError::not_found(name))
    }
}

/// Remove a directory tree; a missing directory is fine.
async fn remove_dir(dir: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
