//! Registry database connections and schema setup used by `botyard db-init`
//! and by every command that talks to the `bots` table.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Schema for the `bots` table, compiled in from `migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .with_context(|| format!("cannot reach registry database at {url}"))
}

/// Open the pool shared by the registry, the supervisor and the HTTP server.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    connect(&config.database_url, 5).await
}

/// Bring the `bots` schema up to date.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("registry schema migration failed")?;
    info!("registry schema is current");
    Ok(())
}

/// Create the registry database through the server's `postgres` database
/// unless it is already there.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let name = config
        .database_name()
        .context("database URL has no database name")?;
    // Interpolated into CREATE DATABASE below.
    if !is_plain_identifier(name) {
        anyhow::bail!("refusing to create database {name:?}: use letters, digits and '_' only");
    }

    let admin = connect(&config.maintenance_url(), 1).await?;
    let found: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&admin)
            .await
            .context("failed to look up pg_database")?;

    if found {
        info!(db = name, "registry database present");
    } else {
        admin
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .with_context(|| format!("failed to create registry database {name}"))?;
        info!(db = name, "registry database created");
    }

    admin.close().await;
    Ok(())
}

/// Installed bots across every account.
pub async fn total_bot_count(pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM bots")
        .fetch_one(pool)
        .await
        .context("failed to count bots")
}

fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
