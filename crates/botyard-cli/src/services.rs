//! Wiring: build the install pipeline and supervisor from resolved config.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;

use botyard_core::runner::create_runner;
use botyard_core::{
    BotRegistry, InstallPipeline, NameLocks, PgRegistry, ProcessRunner, Supervisor,
};
use botyard_db::pool;

use crate::config::BotyardConfig;

/// The lifecycle components, sharing one set of per-name locks.
pub struct Services {
    pub supervisor: Arc<Supervisor>,
    pub installer: Arc<InstallPipeline>,
}

impl Services {
    pub fn new(
        registry: Arc<dyn BotRegistry>,
        runner: Arc<dyn ProcessRunner>,
        config: &BotyardConfig,
    ) -> Self {
        let locks = Arc::new(NameLocks::new());
        let installer = InstallPipeline::new(registry.clone(), locks.clone(), config.install.clone());
        let supervisor = Supervisor::new(registry, runner, locks, config.supervisor.clone());
        Self {
            supervisor: Arc::new(supervisor),
            installer: Arc::new(installer),
        }
    }

    /// Connect to the database and build services over it. The caller owns
    /// the returned pool and should close it on shutdown.
    pub async fn connect(config: &BotyardConfig) -> Result<(Self, PgPool)> {
        let db_pool = pool::create_pool(&config.db_config).await?;
        let runner = create_runner(&config.runner).context("invalid [bots] runner setting")?;
        let registry: Arc<dyn BotRegistry> = Arc::new(PgRegistry::new(db_pool.clone()));
        Ok((Self::new(registry, runner, config), db_pool))
    }
}
