//! Bookkeeping shared by the engines: open-handle registry, per-store upgrade
//! locks and version-change listener sets.

use crate::engine::{StoreHandle, VersionChange, VersionChangeListener};
use crate::error::{EngineError, EngineResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Lock a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Listeners attached to one handle.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<VersionChangeListener>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: VersionChangeListener) {
        lock(&self.listeners).push(listener);
    }

    pub(crate) fn dispatch(&self, handle: &dyn StoreHandle, change: VersionChange) {
        let listeners = lock(&self.listeners);
        for listener in listeners.iter() {
            listener(handle, change);
        }
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.listeners).len()
    }
}

/// Weak references to every open handle, grouped by store name.
pub(crate) struct HandleRegistry<H> {
    handles: Mutex<HashMap<String, Vec<Weak<H>>>>,
}

impl<H> Default for HandleRegistry<H> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
        }
    }
}

impl<H: StoreHandle + 'static> HandleRegistry<H> {
    pub(crate) fn register(&self, handle: &Arc<H>) {
        let mut handles = lock(&self.handles);
        let entry = handles.entry(handle.name().to_string()).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        entry.push(Arc::downgrade(handle));
    }

    fn open_handles(&self, name: &str) -> Vec<Arc<H>> {
        let handles = lock(&self.handles);
        handles
            .get(name)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(Weak::upgrade)
                    .filter(|h| !h.is_closed())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver a version change to every open handle of `name`.
    ///
    /// Fails with [`EngineError::Blocked`] if any handle is still open afterwards.
    pub(crate) fn notify_upgrade(
        &self,
        name: &str,
        change: VersionChange,
        deliver: impl Fn(&H, VersionChange),
    ) -> EngineResult<()> {
        let open = self.open_handles(name);
        if open.is_empty() {
            return Ok(());
        }

        debug!(
            "notifying {} open handle(s) of '{}' about upgrade to v{}",
            open.len(),
            name,
            change.new_version
        );
        for handle in &open {
            deliver(handle, change);
        }

        if open.iter().any(|h| !h.is_closed()) {
            return Err(EngineError::Blocked {
                name: name.to_string(),
                version: change.new_version,
            });
        }
        Ok(())
    }
}

/// One async mutex per store name, serializing opens that may upgrade.
#[derive(Default)]
pub(crate) struct UpgradeLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl UpgradeLocks {
    pub(crate) async fn acquire(&self, name: &str) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = lock(&self.locks);
            locks.entry(name.to_string()).or_default().clone()
        };
        mutex.lock_owned().await
    }
}
