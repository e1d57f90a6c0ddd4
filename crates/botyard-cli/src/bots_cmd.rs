//! `botyard bots` commands: run the lifecycle operations in-process against
//! the configured registry and runner.

use std::path::Path;

use anyhow::{Context, Result};

use crate::BotsCommands;
use crate::services::Services;

/// Run one `bots` subcommand for `account_id`.
pub async fn run_bots_command(
    command: BotsCommands,
    services: &Services,
    account_id: &str,
) -> Result<()> {
    // This process starts with an empty cache; ask the runner first.
    if let Err(e) = services.supervisor.reconcile().await {
        tracing::warn!(error = %e, "runner reconciliation failed, statuses may be stale");
    }

    match command {
        BotsCommands::List => run_list(services, account_id).await,
        BotsCommands::Upload { file, name } => {
            let name = match name {
                Some(name) => name,
                None => default_bot_name(&file)?,
            };
            run_upload(services, account_id, &file, &name).await
        }
        BotsCommands::Start { name } => {
            services.supervisor.start(account_id, &name).await?;
            println!("Bot {name} started.");
            Ok(())
        }
        BotsCommands::Stop { name } => {
            services.supervisor.stop(account_id, &name).await?;
            println!("Bot {name} stopped.");
            Ok(())
        }
        BotsCommands::Delete { name } => {
            services.supervisor.delete(account_id, &name).await?;
            println!("Bot {name} deleted.");
            Ok(())
        }
        BotsCommands::Status { name } => {
            let status = services.supervisor.status(account_id, &name).await?;
            println!("{name}: {status}");
            Ok(())
        }
    }
}

async fn run_list(services: &Services, account_id: &str) -> Result<()> {
    let bots = services.supervisor.list(account_id).await?;
    if bots.is_empty() {
        println!("No bots installed for account {account_id}.");
        return Ok(());
    }

    println!("Bots for account {account_id}:");
    for bot in &bots {
        let icon = match bot.status {
            botyard_core::BotStatus::Online => "*",
            botyard_core::BotStatus::Offline => ".",
        };
        println!(
            "  [{icon}] {} ({}, installed {})",
            bot.name,
            bot.status,
            bot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

async fn run_upload(services: &Services, account_id: &str, file: &Path, name: &str) -> Result<()> {
    let archive = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let record = services.installer.install(account_id, name, archive).await?;
    println!("Bot {} installed at {}.", record.name, record.install_path);
    println!("Next: run `botyard bots start {}`.", record.name);
    Ok(())
}

/// Bot name from an archive path: `./echo-bot.zip` -> `echo-bot`.
fn default_bot_name(file: &Path) -> Result<String> {
    file.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_owned)
        .with_context(|| format!("cannot derive a bot name from {}; pass --name", file.display()))
}
