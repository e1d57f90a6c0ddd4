//! Bot registry client: the durable account -> bots map.
//!
//! The supervisor treats the registry as the source of truth for which bots
//! exist. [`PgRegistry`] stores records in PostgreSQL via `botyard-db`.

use std::path::Path;

use async_trait::async_trait;
use sqlx::PgPool;

use botyard_db::models::BotRecord;
use botyard_db::queries::bots as bot_db;

/// Failure reported by a [`BotRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a bot named {0:?} already exists")]
    DuplicateName(String),

    /// The backing store failed.
    #[error("{0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Storage interface for bot records.
#[async_trait]
pub trait BotRegistry: Send + Sync {
    /// All bots owned by `account_id`, oldest first.
    async fn list_bots(&self, account_id: &str) -> Result<Vec<BotRecord>, RegistryError>;

    /// A single bot, or `None` if the account has no bot by that name.
    async fn get_bot(&self, account_id: &str, name: &str)
    -> Result<Option<BotRecord>, RegistryError>;

    /// Record a newly installed bot. Fails with
    /// [`RegistryError::DuplicateName`] if the name is taken for the account.
    async fn add_bot(
        &self,
        account_id: &str,
        name: &str,
        install_path: &Path,
    ) -> Result<BotRecord, RegistryError>;

    /// Delete a bot record. Deleting a missing record succeeds.
    async fn remove_bot(&self, account_id: &str, name: &str) -> Result<(), RegistryError>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn BotRegistry) {}
};

/// PostgreSQL-backed registry.
#[derive(Debug, Clone)]
pub struct PgRegistry {
    pool: PgPool,
}

impl PgRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BotRegistry for PgRegistry {
    async fn list_bots(&self, account_id: &str) -> Result<Vec<BotRecord>, RegistryError> {
        Ok(bot_db::list_bots(&self.pool, account_id).await?)
    }

    async fn get_bot(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Option<BotRecord>, RegistryError> {
        Ok(bot_db::get_bot(&self.pool, account_id, name).await?)
    }

    async fn add_bot(
        &self,
        account_id: &str,
        name: &str,
        install_path: &Path,
    ) -> Result<BotRecord, RegistryError> {
        let path = install_path.to_string_lossy();
        bot_db::insert_bot(&self.pool, account_id, name, &path)
            .await?
            .ok_or_else(|| RegistryError::DuplicateName(name.to_string()))
    }

    async fn remove_bot(&self, account_id: &str, name: &str) -> Result<(), RegistryError> {
        bot_db::delete_bot(&self.pool, account_id, name).await?;
        Ok(())
    }
}
