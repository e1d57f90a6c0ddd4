//! Configuration file management for botyard.
//!
//! Provides a TOML-based config file at `~/.config/botyard/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use botyard_core::install::DEFAULT_MAX_BOTS;
use botyard_core::runner::RunnerSettings;
use botyard_core::{InstallConfig, SupervisorConfig};
use botyard_db::config::DbConfig;

/// Env var overriding `[bots] root`.
pub const BOTS_ROOT_ENV: &str = "BOTYARD_BOTS_ROOT";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    pub bots: BotsSection,
    pub server: ServerSection,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotsSection {
    /// Install root; bots live at `<root>/<account>/<name>`.
    pub root: PathBuf,
    pub max_per_account: usize,
    pub entry_file: String,
    /// `pm2` or `local`.
    pub runner: String,
    /// Program that runs the entry file (local runner only).
    pub interpreter: String,
    pub call_timeout_secs: u64,
    /// Seconds a stopping process gets before SIGKILL (local runner only).
    pub stop_grace_secs: u64,
    pub reconcile_status: bool,
}

impl Default for BotsSection {
    fn default() -> Self {
        let runner = RunnerSettings::default();
        Self {
            root: PathBuf::from("./uploads"),
            max_per_account: DEFAULT_MAX_BOTS,
            entry_file: runner.entry_file,
            runner: runner.kind,
            interpreter: runner.interpreter,
            call_timeout_secs: 30,
            stop_grace_secs: runner.stop_grace.as_secs(),
            reconcile_status: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
    pub port: u16,
    /// Account the HTTP server acts for.
    pub account_id: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
            account_id: "default".to_string(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the botyard config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/botyard` or `~/.config/botyard`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("botyard");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("botyard")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`. A missing file yields `None`;
/// an unreadable or malformed one is an error.
pub fn load_config_from(path: &Path) -> Result<Option<ConfigFile>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read config file at {}", path.display()));
        }
    };
    let config = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(Some(config))
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed. Sets file permissions to 0600 on Unix.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(path, perms)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct BotyardConfig {
    pub db_config: DbConfig,
    pub supervisor: SupervisorConfig,
    pub install: InstallConfig,
    pub runner: RunnerSettings,
    pub server: ServerSection,
}

impl BotyardConfig {
    /// Resolve configuration from the user's config file.
    ///
    /// - DB URL: `cli_db_url` > `BOTYARD_DATABASE_URL` > `[database] url` > default
    /// - Bots root: `cli_bots_root` > `BOTYARD_BOTS_ROOT` > `[bots] root` > `./uploads`
    pub fn resolve(cli_db_url: Option<&str>, cli_bots_root: Option<&Path>) -> Result<Self> {
        let file = load_config_from(&config_path())?.unwrap_or_default();
        Ok(Self::from_file(file, cli_db_url, cli_bots_root))
    }

    /// Apply CLI flags and env vars on top of an already-loaded file.
    pub fn from_file(file: ConfigFile, cli_db_url: Option<&str>, cli_bots_root: Option<&Path>) -> Self {
        let db_url = if let Some(url) = cli_db_url {
            url.to_string()
        } else if let Ok(url) = std::env::var(DbConfig::ENV_VAR) {
            url
        } else {
            file.database.url
        };

        let bots_root = if let Some(root) = cli_bots_root {
            root.to_path_buf()
        } else if let Ok(root) = std::env::var(BOTS_ROOT_ENV) {
            PathBuf::from(root)
        } else {
            file.bots.root.clone()
        };
        // Records store absolute install paths; pin a relative root to the cwd now.
        let bots_root = std::path::absolute(&bots_root).unwrap_or(bots_root);

        let bots = file.bots;
        let call_timeout = Duration::from_secs(bots.call_timeout_secs);

        let supervisor = SupervisorConfig {
            bots_root: bots_root.clone(),
            entry_file: bots.entry_file.clone(),
            call_timeout,
            reconcile_status: bots.reconcile_status,
        };
        let install = InstallConfig {
            bots_root,
            entry_file: bots.entry_file.clone(),
            max_bots_per_account: bots.max_per_account,
            call_timeout,
        };
        let runner = RunnerSettings {
            kind: bots.runner,
            entry_file: bots.entry_file,
            interpreter: bots.interpreter,
            stop_grace: Duration::from_secs(bots.stop_grace_secs),
        };

        Self {
            db_config: DbConfig::new(db_url),
            supervisor,
            install,
            runner,
            server: file.server,
        }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    fn clear_env() {
        unsafe { std::env::remove_var(DbConfig::ENV_VAR) };
        unsafe { std::env::remove_var(BOTS_ROOT_ENV) };
    }

    #[test]
    fn empty_file_yields_defaults() {
        let file: ConfigFile = toml::from_str("").unwrap();
        assert_eq!(file.database.url, DbConfig::DEFAULT_URL);
        assert_eq!(file.bots.root, PathBuf::from("./uploads"));
        assert_eq!(file.bots.max_per_account, 10);
        assert_eq!(file.bots.entry_file, "index.js");
        assert_eq!(file.bots.runner, "pm2");
        assert_eq!(file.server.port, 5000);
        assert!(file.bots.reconcile_status);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let file: ConfigFile = toml::from_str(
            r#"
            [bots]
            runner = "local"
            max_per_account = 3

            [server]
            port = 8080
            "#,
        )
        .unwrap();
        assert_eq!(file.bots.runner, "local");
        assert_eq!(file.bots.max_per_account, 3);
        assert_eq!(file.bots.interpreter, "node");
        assert_eq!(file.server.port, 8080);
        assert_eq!(file.server.bind, "127.0.0.1");
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("botyard").join("config.toml");

        let mut original = ConfigFile::default();
        original.database.url = "postgresql://testhost:5432/testdb".to_string();
        original.bots.root = PathBuf::from("/srv/bots");
        save_config_to(&original, &path).unwrap();

        let loaded = load_config_from(&path).unwrap().expect("file exists");
        assert_eq!(loaded.database.url, original.database.url);
        assert_eq!(loaded.bots.root, PathBuf::from("/srv/bots"));
    }

    #[cfg(unix)]
    #[test]
    fn save_config_sets_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        save_config_to(&ConfigFile::default(), &path).unwrap();

        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn missing_file_is_none_and_malformed_file_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        assert!(load_config_from(&path).unwrap().is_none());

        std::fs::write(&path, "[bots\nroot = ").unwrap();
        assert!(load_config_from(&path).is_err());
    }

    #[test]
    fn cli_flags_override_env_and_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(BOTS_ROOT_ENV, "/env/bots") };

        let config = BotyardConfig::from_file(
            ConfigFile::default(),
            Some("postgresql://cli:5432/clidb"),
            Some(Path::new("/cli/bots")),
        );
        assert_eq!(config.db_config.database_url, "postgresql://cli:5432/clidb");
        assert_eq!(config.supervisor.bots_root, PathBuf::from("/cli/bots"));
        assert_eq!(config.install.bots_root, PathBuf::from("/cli/bots"));

        clear_env();
    }

    #[test]
    fn env_overrides_file() {
        let _lock = lock_env();
        unsafe { std::env::set_var(DbConfig::ENV_VAR, "postgresql://env:5432/envdb") };
        unsafe { std::env::set_var(BOTS_ROOT_ENV, "/env/bots") };

        let mut file = ConfigFile::default();
        file.database.url = "postgresql://file:5432/filedb".to_string();
        file.bots.root = PathBuf::from("/file/bots");
        let config = BotyardConfig::from_file(file, None, None);

        assert_eq!(config.db_config.database_url, "postgresql://env:5432/envdb");
        assert_eq!(config.install.bots_root, PathBuf::from("/env/bots"));

        clear_env();
    }

    #[test]
    fn file_values_flow_into_components() {
        let _lock = lock_env();
        clear_env();

        let mut file = ConfigFile::default();
        file.bots.entry_file = "main.js".to_string();
        file.bots.max_per_account = 4;
        file.bots.call_timeout_secs = 7;
        file.bots.runner = "local".to_string();
        file.bots.reconcile_status = false;
        let config = BotyardConfig::from_file(file, None, None);

        assert_eq!(config.db_config.database_url, DbConfig::DEFAULT_URL);
        assert_eq!(config.supervisor.entry_file, "main.js");
        assert_eq!(config.install.entry_file, "main.js");
        assert_eq!(config.runner.entry_file, "main.js");
        assert_eq!(config.install.max_bots_per_account, 4);
        assert_eq!(config.supervisor.call_timeout, Duration::from_secs(7));
        assert_eq!(config.runner.kind, "local");
        assert!(!config.supervisor.reconcile_status);
    }

    #[test]
    fn relative_bots_root_is_made_absolute() {
        let _lock = lock_env();
        clear_env();

        let config = BotyardConfig::from_file(ConfigFile::default(), None, None);
        let expected = std::env::current_dir().unwrap().join("uploads");

        assert!(config.install.bots_root.is_absolute());
        assert!(config.supervisor.bots_root.is_absolute());
        assert_eq!(config.install.bots_root, expected);

        let config = BotyardConfig::from_file(ConfigFile::default(), None, Some(Path::new("bots")));
        assert_eq!(config.install.bots_root, std::env::current_dir().unwrap().join("bots"));
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(
            path.ends_with("botyard/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
    }
}
