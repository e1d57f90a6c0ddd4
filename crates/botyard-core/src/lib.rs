//! Bot lifecycle supervision.
//!
//! ```text
//! caller --install--> InstallPipeline --add_bot--> BotRegistry
//!    |                      |
//!    |                 extract + verify entry file on disk
//!    |
//!    +--start/stop/delete/status--> Supervisor
//!                                      |  per-name lock (NameLocks)
//!                                      |  RuntimeState cache
//!                                      +--> BotRegistry (identity, source of truth)
//!                                      +--> ProcessRunner (pm2 / local processes)
//! ```

pub mod bundle;
pub mod deadline;
pub mod error;
pub mod install;
pub mod registry;
pub mod runner;
pub mod supervisor;

pub use botyard_db::models::BotRecord;
pub use error::BotError;
pub use install::{InstallConfig, InstallPipeline};
pub use registry::{BotRegistry, PgRegistry, RegistryError};
pub use runner::{ProcessRunner, RunnerError};
pub use supervisor::{BotStatus, BotSummary, NameLocks, Supervisor, SupervisorConfig};
