//! Integration tests for the `bots` table queries.
//!
//! Each test gets its own database on the shared PostgreSQL instance from
//! `botyard-test-utils` and drops it on completion.

use sqlx::Row;

use botyard_db::pool;
use botyard_db::queries::bots as bot_db;
use botyard_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
#[ignore = "requires docker"]
async fn migrations_create_bots_table() {
    let (pool, db_name) = create_test_db().await;

    let row = sqlx::query(
        "SELECT COUNT(*) AS n FROM information_schema.tables WHERE table_name = 'bots'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);

    // Re-running is a no-op.
    pool::run_migrations(&pool).await.unwrap();

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn insert_get_list_delete() {
    let (pool, db_name) = create_test_db().await;

    let bot = bot_db::insert_bot(&pool, "acct", "echo", "/bots/acct/echo")
        .await
        .unwrap()
        .expect("first insert creates a row");
    assert_eq!(bot.account_id, "acct");
    assert_eq!(bot.install_path, "/bots/acct/echo");

    let fetched = bot_db::get_bot(&pool, "acct", "echo").await.unwrap();
    assert_eq!(fetched, Some(bot.clone()));
    assert!(bot_db::get_bot(&pool, "other", "echo").await.unwrap().is_none());

    bot_db::insert_bot(&pool, "acct", "relay", "/bots/acct/relay")
        .await
        .unwrap();
    bot_db::insert_bot(&pool, "other", "echo", "/bots/other/echo")
        .await
        .unwrap();

    let names: Vec<_> = bot_db::list_bots(&pool, "acct")
        .await
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, ["echo", "relay"]);
    assert_eq!(bot_db::count_bots(&pool, "acct").await.unwrap(), 2);
    assert_eq!(pool::total_bot_count(&pool).await.unwrap(), 3);

    assert_eq!(bot_db::delete_bot(&pool, "acct", "echo").await.unwrap(), 1);
    assert_eq!(bot_db::delete_bot(&pool, "acct", "echo").await.unwrap(), 0);
    assert_eq!(bot_db::count_bots(&pool, "acct").await.unwrap(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn duplicate_insert_keeps_original_row() {
    let (pool, db_name) = create_test_db().await;

    let original = bot_db::insert_bot(&pool, "acct", "echo", "/first")
        .await
        .unwrap()
        .unwrap();
    let second = bot_db::insert_bot(&pool, "acct", "echo", "/second")
        .await
        .unwrap();
    assert!(second.is_none());

    let stored = bot_db::get_bot(&pool, "acct", "echo").await.unwrap().unwrap();
    assert_eq!(stored, original);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
#[ignore = "requires docker"]
async fn empty_name_is_rejected_by_schema() {
    let (pool, db_name) = create_test_db().await;

    let result = bot_db::insert_bot(&pool, "acct", "", "/bots/acct").await;
    assert!(result.is_err());

    pool.close().await;
    drop_test_db(&db_name).await;
}
