//! Install pipeline: uploaded archive -> extracted folder -> registry record.
//!
//! Order of checks: quota, duplicate name, extraction, entry file, register.
//! The registry only ever gains a record after the bot's folder is fully
//! materialized, so any record the supervisor reads is startable.
//!
//! Installs for one account run one at a time: the quota check and the
//! registry insert sit under the account's lock, then the bot's name lock.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use botyard_db::models::BotRecord;

use crate::bundle::{self, DEFAULT_ENTRY_FILE};
use crate::deadline::within;
use crate::error::BotError;
use crate::registry::{BotRegistry, RegistryError};
use crate::supervisor::NameLocks;

/// Default per-account bot limit.
pub const DEFAULT_MAX_BOTS: usize = 10;

/// Configuration for the install pipeline.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Directory under which `<account>/<name>` bot folders are created.
    /// A relative root is resolved against the working directory at install.
    pub bots_root: PathBuf,
    /// Entry file that must sit at the root of every extracted bundle.
    pub entry_file: String,
    /// Maximum number of bots per account.
    pub max_bots_per_account: usize,
    /// Upper bound on every registry call.
    pub call_timeout: Duration,
}

impl InstallConfig {
    pub fn new(bots_root: impl Into<PathBuf>) -> Self {
        Self {
            bots_root: bots_root.into(),
            entry_file: DEFAULT_ENTRY_FILE.to_string(),
            max_bots_per_account: DEFAULT_MAX_BOTS,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Validates, extracts and registers uploaded bots.
pub struct InstallPipeline {
    registry: Arc<dyn BotRegistry>,
    locks: Arc<NameLocks>,
    accounts: NameLocks,
    config: InstallConfig,
}

impl std::fmt::Debug for InstallPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallPipeline")
            .field("config", &self.config)
            .finish()
    }
}

impl InstallPipeline {
    /// Create a pipeline sharing `locks` with the [`crate::Supervisor`].
    pub fn new(registry: Arc<dyn BotRegistry>, locks: Arc<NameLocks>, config: InstallConfig) -> Self {
        Self {
            registry,
            locks,
            accounts: NameLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &InstallConfig {
        &self.config
    }

    /// Install `archive` (zip bytes) as bot `name` for `account_id`.
    ///
    /// Retrying after any failure is safe: a folder left behind without a
    /// registry record is replaced.
    pub async fn install(
        &self,
        account_id: &str,
        name: &str,
        archive: Vec<u8>,
    ) -> Result<BotRecord, BotError> {
        bundle::validate_account_id(account_id)?;
        bundle::validate_bot_name(name)?;
        let root = std::path::absolute(&self.config.bots_root).map_err(|e| {
            BotError::install_failed(name, format!("bad bots root {}: {e}", self.config.bots_root.display()))
        })?;

        let _account = self.accounts.lock(account_id).await;
        let _guard = self.locks.lock(name).await;

        let existing = within(
            self.config.call_timeout,
            "registry list",
            self.registry.list_bots(account_id),
        )
        .await?
        .map_err(|e| BotError::install_failed(name, e))?;

        if existing.len() >= self.config.max_bots_per_account {
            return Err(BotError::QuotaExceeded {
                max: self.config.max_bots_per_account,
            });
        }
        if existing.iter().any(|bot| bot.name == name) {
            return Err(BotError::DuplicateName {
                name: name.to_owned(),
            });
        }

        let target = bundle::bot_dir(&root, account_id, name);
        let staging = bundle::staging_dir(&root, account_id, name);

        let extracted = {
            let staging = staging.clone();
            let entry_file = self.config.entry_file.clone();
            let bot_name = name.to_owned();
            tokio::task::spawn_blocking(move || {
                bundle::extract_bundle(&archive, &staging, &entry_file, &bot_name)
            })
            .await
            .map_err(|e| BotError::install_failed(name, format!("extraction task failed: {e}")))
            .and_then(|result| result)
        };
        if let Err(e) = extracted {
            discard(&staging).await;
            warn!(account = account_id, bot = name, error = %e, "bundle rejected");
            return Err(e);
        }

        if let Err(e) = self.move_into_place(&staging, &target).await {
            discard(&staging).await;
            return Err(BotError::install_failed(name, e));
        }

        // The folder stays on failure: a timed-out insert may still have
        // committed, and an unregistered folder is replaced on retry anyway.
        let record = within(
            self.config.call_timeout,
            "registry add",
            self.registry.add_bot(account_id, name, &target),
        )
        .await?
        .map_err(|e| match e {
            RegistryError::DuplicateName(name) => BotError::DuplicateName { name },
            other => BotError::install_failed(name, other),
        })?;

        info!(
            account = account_id,
            bot = name,
            path = %target.display(),
            "bot installed"
        );
        Ok(record)
    }

    async fn move_into_place(&self, staging: &Path, target: &Path) -> std::io::Result<()> {
        if tokio::fs::try_exists(target).await? {
            warn!(path = %target.display(), "replacing unregistered leftover bot folder");
            tokio::fs::remove_dir_all(target).await?;
        }
        tokio::fs::rename(staging, target).await
    }
}

async fn discard(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "failed to remove staging folder");
        }
    }
}
