use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row in the `bots` table.
///
/// `name` is unique per account and is used both as the on-disk folder name
/// and as the process runner's process name. `created_at` is set once by the
/// database on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BotRecord {
    pub account_id: String,
    pub name: String,
    pub install_path: String,
    pub created_at: DateTime<Utc>,
}
