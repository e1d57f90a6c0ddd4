//! End-to-end lifecycle with real child processes: install a bundle whose
//! entry file is a shell script, then drive it through the local runner.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use botyard_core::runner::local::LocalRunner;
use botyard_core::{
    BotRegistry, BotStatus, InstallConfig, InstallPipeline, NameLocks, ProcessRunner, Supervisor,
    SupervisorConfig,
};
use botyard_test_utils::{MemoryRegistry, zip_bundle};

const ACCOUNT: &str = "acct-1";

#[tokio::test]
async fn install_start_stop_delete_with_local_processes() {
    let root = tempfile::tempdir().unwrap();
    let registry: Arc<dyn BotRegistry> = Arc::new(MemoryRegistry::new());
    let runner: Arc<dyn ProcessRunner> =
        Arc::new(LocalRunner::new("sh", "index.js", Duration::from_secs(2)));
    let locks = Arc::new(NameLocks::new());

    let installer = InstallPipeline::new(
        registry.clone(),
        locks.clone(),
        InstallConfig::new(root.path()),
    );
    let supervisor = Supervisor::new(
        registry,
        runner.clone(),
        locks,
        SupervisorConfig::new(root.path()),
    );

    let bundle = zip_bundle(&[("index.js", "echo started > started.txt\nsleep 30\n")]);
    let record = installer.install(ACCOUNT, "sleeper", bundle).await.unwrap();
    let dir = std::path::PathBuf::from(&record.install_path);

    supervisor.start(ACCOUNT, "sleeper").await.unwrap();
    assert_eq!(
        supervisor.status(ACCOUNT, "sleeper").await.unwrap(),
        BotStatus::Online
    );

    // The working directory is the bot's own folder.
    let marker = dir.join("started.txt");
    for _ in 0..100 {
        if marker.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(marker.exists());

    supervisor.stop(ACCOUNT, "sleeper").await.unwrap();
    assert_eq!(
        supervisor.status(ACCOUNT, "sleeper").await.unwrap(),
        BotStatus::Offline
    );
    assert!(!runner.is_alive("sleeper").await.unwrap());

    supervisor.start(ACCOUNT, "sleeper").await.unwrap();
    supervisor.delete(ACCOUNT, "sleeper").await.unwrap();
    assert!(!runner.is_alive("sleeper").await.unwrap());
    assert!(!dir.exists());
}
