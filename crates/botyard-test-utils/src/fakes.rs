//! In-memory test doubles for [`BotRegistry`] and [`ProcessRunner`].

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use botyard_core::{BotRecord, BotRegistry, ProcessRunner, RegistryError, RunnerError};

/// Registry backed by a `Vec`, in insertion order.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    records: Mutex<Vec<BotRecord>>,
    failing: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Sleep this long before every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn records(&self) -> Vec<BotRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn contains(&self, account_id: &str, name: &str) -> bool {
        self.records
            .lock()
            .unwrap()
            .iter()
            .any(|r| r.account_id == account_id && r.name == name)
    }

    async fn enter(&self) -> Result<(), RegistryError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if *self.failing.lock().unwrap() {
            return Err(anyhow::anyhow!("registry unavailable").into());
        }
        Ok(())
    }
}

#[async_trait]
impl BotRegistry for MemoryRegistry {
    async fn list_bots(&self, account_id: &str) -> Result<Vec<BotRecord>, RegistryError> {
        self.enter().await?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_bot(
        &self,
        account_id: &str,
        name: &str,
    ) -> Result<Option<BotRecord>, RegistryError> {
        self.enter().await?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.account_id == account_id && r.name == name)
            .cloned())
    }

    async fn add_bot(
        &self,
        account_id: &str,
        name: &str,
        install_path: &Path,
    ) -> Result<BotRecord, RegistryError> {
        self.enter().await?;
        let mut records = self.records.lock().unwrap();
        if records
            .iter()
            .any(|r| r.account_id == account_id && r.name == name)
        {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        let record = BotRecord {
            account_id: account_id.to_string(),
            name: name.to_string(),
            install_path: install_path.to_string_lossy().into_owned(),
            created_at: Utc::now(),
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn remove_bot(&self, account_id: &str, name: &str) -> Result<(), RegistryError> {
        self.enter().await?;
        self.records
            .lock()
            .unwrap()
            .retain(|r| !(r.account_id == account_id && r.name == name));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct RunnerState {
    /// Names the runner has bookkeeping for (started and not removed).
    known: HashSet<String>,
    alive: HashSet<String>,
    starts: HashMap<String, usize>,
    fail_start: bool,
    fail_stop: bool,
    fail_remove: bool,
    fail_alive: bool,
    delay: Option<Duration>,
}

/// Process runner that only records what it was asked to do.
#[derive(Debug)]
pub struct FakeRunner {
    entry_file: String,
    state: Mutex<RunnerState>,
}

impl Default for FakeRunner {
    fn default() -> Self {
        Self::new("index.js")
    }
}

impl FakeRunner {
    pub fn new(entry_file: &str) -> Self {
        Self {
            entry_file: entry_file.to_string(),
            state: Mutex::new(RunnerState::default()),
        }
    }

    /// How many times `name` was launched.
    pub fn start_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .starts
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn alive(&self, name: &str) -> bool {
        self.state.lock().unwrap().alive.contains(name)
    }

    pub fn knows(&self, name: &str) -> bool {
        self.state.lock().unwrap().known.contains(name)
    }

    /// Simulate the process dying on its own.
    pub fn crash(&self, name: &str) {
        self.state.lock().unwrap().alive.remove(name);
    }

    /// Simulate a process launched outside this server (e.g. before a restart).
    pub fn adopt(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.known.insert(name.to_string());
        state.alive.insert(name.to_string());
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.state.lock().unwrap().fail_start = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state.lock().unwrap().fail_stop = fail;
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.state.lock().unwrap().fail_remove = fail;
    }

    pub fn set_fail_alive(&self, fail: bool) {
        self.state.lock().unwrap().fail_alive = fail;
    }

    /// Sleep this long before start, stop, and remove take effect.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().unwrap().delay = delay;
    }

    async fn pause(&self) {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    fn name(&self) -> &str {
        "fake"
    }

    async fn start(&self, name: &str, install_path: &Path) -> Result<(), RunnerError> {
        self.pause().await;
        let entry = install_path.join(&self.entry_file);
        if !entry.is_file() {
            return Err(RunnerError::MissingEntry(entry));
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_start {
            return Err(anyhow::anyhow!("launch refused").into());
        }
        if state.alive.contains(name) {
            return Err(RunnerError::AlreadyRunning(name.to_string()));
        }
        state.known.insert(name.to_string());
        state.alive.insert(name.to_string());
        *state.starts.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RunnerError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_stop {
            return Err(anyhow::anyhow!("stop refused").into());
        }
        if !state.known.contains(name) {
            return Err(RunnerError::NotFound(name.to_string()));
        }
        state.alive.remove(name);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RunnerError> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_remove {
            return Err(anyhow::anyhow!("remove refused").into());
        }
        state.known.remove(name);
        state.alive.remove(name);
        Ok(())
    }

    async fn is_alive(&self, name: &str) -> Result<bool, RunnerError> {
        let state = self.state.lock().unwrap();
        if state.fail_alive {
            return Err(anyhow::anyhow!("runner unreachable").into());
        }
        Ok(state.alive.contains(name))
    }

    async fn list_alive(&self) -> Result<Vec<String>, RunnerError> {
        let state = self.state.lock().unwrap();
        if state.fail_alive {
            return Err(anyhow::anyhow!("runner unreachable").into());
        }
        let mut names: Vec<_> = state.alive.iter().cloned().collect();
        names.sort();
        Ok(names)
    }
}
