mod bots_cmd;
mod config;
mod serve_cmd;
mod services;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use botyard_db::pool;

use config::BotyardConfig;
use services::Services;

#[derive(Parser)]
#[command(name = "botyard", about = "Upload, run, and supervise self-contained bots")]
struct Cli {
    /// Database URL (overrides BOTYARD_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Bot install root (overrides BOTYARD_BOTS_ROOT env var)
    #[arg(long, global = true)]
    bots_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a botyard config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/botyard")]
        db_url: String,
        /// Directory bots are installed under
        #[arg(long = "root", default_value = "./uploads")]
        root: PathBuf,
        /// Process runner backend: pm2 or local
        #[arg(long, default_value = "pm2")]
        runner: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the botyard database (create it and apply migrations)
    DbInit,
    /// Run the HTTP control surface
    Serve {
        /// Address to bind (overrides [server] bind)
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides [server] port)
        #[arg(long)]
        port: Option<u16>,
        /// Account the server acts for (overrides [server] account_id)
        #[arg(long)]
        account: Option<String>,
    },
    /// Bot lifecycle management
    Bots {
        /// Account to operate on (defaults to [server] account_id)
        #[arg(long)]
        account: Option<String>,
        #[command(subcommand)]
        command: BotsCommands,
    },
}

#[derive(Clone, Subcommand)]
pub enum BotsCommands {
    /// List installed bots and their status
    List,
    /// Install a bot from a zip archive
    Upload {
        /// Path to the zip archive
        file: PathBuf,
        /// Bot name (defaults to the archive's file stem)
        #[arg(long)]
        name: Option<String>,
    },
    /// Start a bot
    Start { name: String },
    /// Stop a bot
    Stop { name: String },
    /// Stop and remove a bot with all of its files
    Delete { name: String },
    /// Show whether a bot is online
    Status { name: String },
}

/// Execute the `botyard init` command: write config file.
fn cmd_init(db_url: &str, root: &Path, runner: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }
    if !matches!(runner, "pm2" | "local") {
        anyhow::bail!("unknown runner {runner:?} (expected \"pm2\" or \"local\")");
    }

    let mut cfg = config::ConfigFile::default();
    cfg.database.url = db_url.to_string();
    cfg.bots.root = root.to_path_buf();
    cfg.bots.runner = runner.to_string();

    config::save_config_to(&cfg, &path)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!("  bots.root = {}", root.display());
    println!("  bots.runner = {runner}");
    println!();
    println!("Next: run `botyard db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `botyard db-init` command: create database and run migrations.
async fn cmd_db_init(resolved: &BotyardConfig) -> anyhow::Result<()> {
    println!("Initializing botyard database...");

    // 1. Create the database if it does not exist.
    pool::ensure_database_exists(&resolved.db_config).await?;

    // 2. Connect and migrate.
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    pool::run_migrations(&db_pool).await?;

    // 3. Summary.
    let count = pool::total_bot_count(&db_pool).await?;
    println!("Database ready. bots: {count} rows");

    db_pool.close().await;

    println!("botyard db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let resolve = || BotyardConfig::resolve(cli.database_url.as_deref(), cli.bots_root.as_deref());

    match &cli.command {
        Commands::Init {
            db_url,
            root,
            runner,
            force,
        } => {
            cmd_init(db_url, root, runner, *force)?;
        }
        Commands::DbInit => {
            cmd_db_init(&resolve()?).await?;
        }
        Commands::Serve {
            bind,
            port,
            account,
        } => {
            let resolved = resolve()?;
            let bind = bind.clone().unwrap_or_else(|| resolved.server.bind.clone());
            let port = port.unwrap_or(resolved.server.port);
            let account = account.clone().unwrap_or_else(|| resolved.server.account_id.clone());

            let (services, db_pool) = Services::connect(&resolved).await?;
            let state = serve_cmd::AppState::new(services, &account);
            let result = serve_cmd::run_serve(state, &bind, port).await;
            db_pool.close().await;
            result?;
        }
        Commands::Bots { account, command } => {
            let resolved = resolve()?;
            let account = account.clone().unwrap_or_else(|| resolved.server.account_id.clone());
            if resolved.runner.kind == "local" && matches!(command, BotsCommands::Start { .. }) {
                tracing::warn!("the local runner's processes exit with this command; use `botyard serve`");
            }

            let (services, db_pool) = Services::connect(&resolved).await?;
            let result = bots_cmd::run_bots_command(command.clone(), &services, &account).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test_util {
    use std::sync::Mutex;

    /// Serializes tests that read or write process environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }
}
