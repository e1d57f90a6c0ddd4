//! Per-name mutual exclusion.
//!
//! Every lifecycle operation on a bot holds that bot's lock for its whole
//! duration, including the runner call. Different names never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slot = Arc<tokio::sync::Mutex<()>>;

/// Table of async locks keyed by bot name.
///
/// The inner std mutex only guards the table itself and is never held across
/// an `.await`. Slots nobody holds or waits on are pruned lazily.
#[derive(Debug, Default)]
pub struct NameLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

/// Proof that the holder owns the critical section for [`NameGuard::name`].
#[derive(Debug)]
pub struct NameGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl NameGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl NameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and acquire the lock for `name`.
    pub async fn lock(&self, name: &str) -> NameGuard {
        let guard = self.slot(name).lock_owned().await;
        NameGuard {
            name: name.to_owned(),
            _guard: guard,
        }
    }

    /// Acquire the lock for `name` only if nobody holds it right now.
    pub fn try_lock(&self, name: &str) -> Option<NameGuard> {
        let guard = self.slot(name).try_lock_owned().ok()?;
        Some(NameGuard {
            name: name.to_owned(),
            _guard: guard,
        })
    }

    /// Number of slots currently in the table.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, name: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // A strong count of 1 means only the table references the slot.
        slots.retain(|key, slot| key == name || Arc::strong_count(slot) > 1);
        slots.entry(name.to_owned()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_name_is_exclusive() {
        let locks = NameLocks::new();
        let held = locks.lock("echo").await;
        assert_eq!(held.name(), "echo");
        assert!(locks.try_lock("echo").is_none());
        drop(held);
        assert!(locks.try_lock("echo").is_some());
    }

    #[tokio::test]
    async fn different_names_do_not_contend() {
        let locks = NameLocks::new();
        let _a = locks.lock("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b")).await;
        assert!(b.is_ok(), "lock on another name should not wait");
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let locks = Arc::new(NameLocks::new());
        let held = locks.lock("echo").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.lock("echo").await.name().to_owned() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), "echo");
    }

    #[tokio::test]
    async fn idle_slots_are_pruned() {
        let locks = NameLocks::new();
        for name in ["a", "b", "c"] {
            drop(locks.lock(name).await);
        }
        let _held = locks.lock("d").await;
        assert_eq!(locks.len(), 1);
    }
}
