//! Database query functions for the `bots` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::BotRecord;

/// Insert a new bot row.
///
/// Returns `None` when a bot with the same `(account_id, name)` already
/// exists; the existing row is left untouched.
pub async fn insert_bot(
    pool: &PgPool,
    account_id: &str,
    name: &str,
    install_path: &str,
) -> Result<Option<BotRecord>> {
    let bot = sqlx::query_as::<_, BotRecord>(
        "INSERT INTO bots (account_id, name, install_path) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (account_id, name) DO NOTHING \
         RETURNING *",
    )
    .bind(account_id)
    .bind(name)
    .bind(install_path)
    .fetch_optional(pool)
    .await
    .context("failed to insert bot")?;

    Ok(bot)
}

/// Fetch a single bot by account and name.
pub async fn get_bot(pool: &PgPool, account_id: &str, name: &str) -> Result<Option<BotRecord>> {
    let bot = sqlx::query_as::<_, BotRecord>(
        "SELECT * FROM bots WHERE account_id = $1 AND name = $2",
    )
    .bind(account_id)
    .bind(name)
    .fetch_optional(pool)
    .await
    .context("failed to fetch bot")?;

    Ok(bot)
}

/// List an account's bots, oldest first.
pub async fn list_bots(pool: &PgPool, account_id: &str) -> Result<Vec<BotRecord>> {
    let bots = sqlx::query_as::<_, BotRecord>(
        "SELECT * FROM bots WHERE account_id = $1 ORDER BY created_at ASC, name ASC",
    )
    .bind(account_id)
    .fetch_all(pool)
    .await
    .context("failed to list bots")?;

    Ok(bots)
}

/// Count an account's bots.
pub async fn count_bots(pool: &PgPool, account_id: &str) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bots WHERE account_id = $1")
        .bind(account_id)
        .fetch_one(pool)
        .await
        .context("failed to count bots")?;

    Ok(count)
}

/// Delete a bot row. Returns the number of rows removed (0 or 1); deleting a
/// missing bot is not an error.
pub async fn delete_bot(pool: &PgPool, account_id: &str, name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM bots WHERE account_id = $1 AND name = $2")
        .bind(account_id)
        .bind(name)
        .execute(pool)
        .await
        .context("failed to delete bot")?;

    Ok(result.rows_affected())
}
