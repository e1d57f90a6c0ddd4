//! In-memory view of which bots are running.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::locks::NameGuard;

/// Cache of running bots keyed by name.
///
/// Not a source of truth: it starts empty and is rebuilt from the runner.
/// Mutation requires the caller's [`NameGuard`], so writes only ever happen
/// inside that bot's critical section.
#[derive(Debug, Default)]
pub struct RuntimeState {
    running: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.map().contains_key(name)
    }

    /// When this process first observed the bot running.
    pub fn running_since(&self, name: &str) -> Option<DateTime<Utc>> {
        self.map().get(name).copied()
    }

    /// Names currently cached as running, sorted.
    pub fn running_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.map().keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn mark_running(&self, guard: &NameGuard) {
        self.map()
            .entry(guard.name().to_owned())
            .or_insert_with(Utc::now);
    }

    /// Returns `true` if the bot was cached as running.
    pub(crate) fn mark_stopped(&self, guard: &NameGuard) -> bool {
        self.map().remove(guard.name()).is_some()
    }

    pub(crate) fn set(&self, guard: &NameGuard, alive: bool) {
        if alive {
            self.mark_running(guard);
        } else {
            self.mark_stopped(guard);
        }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
