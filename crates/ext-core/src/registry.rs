//! In-flight registries used to deduplicate concurrent requests.
//!
//! Entries are registered through guards that release them on drop, so a
//! failing or cancelled request never leaves a stale entry behind. Locks are
//! only held for the check-then-insert sequence, never across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use tracing::debug;

use crate::error::Result;
use crate::task::InstallTask;

/// A removal shared by every caller uninstalling the same extension.
pub type SharedRemoval = Shared<BoxFuture<'static, Result<()>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Install tasks in flight, keyed by [`IdentifierWithVersion::key`](crate::IdentifierWithVersion::key).
#[derive(Default)]
pub struct InstallingRegistry {
    tasks: Mutex<HashMap<String, Arc<InstallTask>>>,
}

impl InstallingRegistry {
    pub fn get(&self, key: &str) -> Option<Arc<InstallTask>> {
        lock(&self.tasks).get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.tasks).contains_key(key)
    }

    /// Return the task in flight for `key`, or register the one built by
    /// `create`. The guard is only returned for a newly registered task.
    pub fn get_or_register<F>(&self, key: &str, create: F) -> (Arc<InstallTask>, Option<InstallGuard<'_>>)
    where
        F: FnOnce() -> Arc<InstallTask>,
    {
        let mut tasks = lock(&self.tasks);
        if let Some(existing) = tasks.get(key) {
            return (Arc::clone(existing), None);
        }
        let task = create();
        tasks.insert(key.to_string(), Arc::clone(&task));
        let guard = InstallGuard {
            registry: self,
            key: key.to_string(),
            task: Arc::clone(&task),
        };
        (task, Some(guard))
    }

    /// Register `task` unless another task is in flight for the same key.
    pub fn try_register(&self, task: &Arc<InstallTask>) -> Option<InstallGuard<'_>> {
        let key = task.identifier_with_version().key();
        let mut tasks = lock(&self.tasks);
        if tasks.contains_key(&key) {
            return None;
        }
        tasks.insert(key.clone(), Arc::clone(task));
        Some(InstallGuard {
            registry: self,
            key,
            task: Arc::clone(task),
        })
    }

    /// Remove and return every task in flight.
    pub fn drain(&self) -> Vec<Arc<InstallTask>> {
        lock(&self.tasks).drain().map(|(_, task)| task).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases an install registration on drop.
pub struct InstallGuard<'a> {
    registry: &'a InstallingRegistry,
    key: String,
    task: Arc<InstallTask>,
}

impl InstallGuard<'_> {
    pub fn task(&self) -> &Arc<InstallTask> {
        &self.task
    }
}

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        let mut tasks = lock(&self.registry.tasks);
        match tasks.get(&self.key) {
            Some(current) if Arc::ptr_eq(current, &self.task) => {
                tasks.remove(&self.key);
            }
            // Drained by shutdown or replaced after it.
            _ => debug!(key = %self.key, "Install registration already released"),
        }
    }
}

/// Removals in flight, keyed by [`ExtensionIdentifier::key`](crate::ExtensionIdentifier::key).
#[derive(Default)]
pub struct UninstallingRegistry {
    removals: Mutex<HashMap<String, SharedRemoval>>,
}

impl UninstallingRegistry {
    /// Join the removal in flight for `key`, or start tracking the one built
    /// by `create`. The guard is only returned for a newly tracked removal.
    pub fn get_or_insert<F>(&self, key: &str, create: F) -> (SharedRemoval, Option<UninstallGuard<'_>>)
    where
        F: FnOnce() -> SharedRemoval,
    {
        let mut removals = lock(&self.removals);
        if let Some(existing) = removals.get(key) {
            return (existing.clone(), None);
        }
        let removal = create();
        removals.insert(key.to_string(), removal.clone());
        let guard = UninstallGuard {
            registry: self,
            key: key.to_string(),
            removal: removal.clone(),
        };
        (removal, Some(guard))
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.removals).contains_key(key)
    }

    pub fn clear(&self) {
        lock(&self.removals).clear();
    }
}

/// Releases an uninstall registration on drop.
pub struct UninstallGuard<'a> {
    registry: &'a UninstallingRegistry,
    key: String,
    removal: SharedRemoval,
}

impl Drop for UninstallGuard<'_> {
    fn drop(&mut self) {
        let mut removals = lock(&self.registry.removals);
        if removals
            .get(&self.key)
            .is_some_and(|current| current.ptr_eq(&self.removal))
        {
            removals.remove(&self.key);
        }
    }
}
