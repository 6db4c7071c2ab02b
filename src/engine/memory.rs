//! In-process store engine
//!
//! `MemoryEngine` keeps every store in memory and follows the same open,
//! upgrade and notification rules as the SQLite engine. Data lives as long
//! as the engine (and its clones) do.

use crate::engine::registry::{lock, HandleRegistry, ListenerSet, UpgradeLocks};
use crate::engine::{
    record_key, resolve_target_version, OpenRequest, Record, RecordId, StoreEngine, StoreHandle,
    UpgradeHandler, UpgradeTransaction, VersionChange, VersionChangeListener, ID_FIELD,
};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Debug)]
struct MemoryContainer {
    next_id: RecordId,
    records: BTreeMap<RecordId, Record>,
}

impl MemoryContainer {
    fn new() -> Self {
        Self {
            next_id: 1,
            records: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryStore {
    version: u32,
    containers: BTreeMap<String, MemoryContainer>,
    upgrades: u64,
}

type SharedStore = Arc<Mutex<MemoryStore>>;

#[derive(Default)]
struct EngineState {
    stores: Mutex<HashMap<String, SharedStore>>,
    handles: HandleRegistry<MemoryHandle>,
    upgrade_locks: UpgradeLocks,
}

/// In-memory store engine.
///
/// Cloning the engine shares the underlying stores.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<EngineState>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, name: &str) -> SharedStore {
        lock(&self.state.stores)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    fn existing_store(&self, name: &str) -> Option<SharedStore> {
        lock(&self.state.stores).get(name).cloned()
    }

    /// Current version of a store, `None` if it was never opened.
    pub fn version(&self, name: &str) -> Option<u32> {
        self.existing_store(name).map(|s| lock(&s).version)
    }

    /// Number of upgrades the store has gone through.
    pub fn upgrade_count(&self, name: &str) -> u64 {
        self.existing_store(name)
            .map(|s| lock(&s).upgrades)
            .unwrap_or(0)
    }

    /// Containers currently present in a store.
    pub fn container_names(&self, name: &str) -> BTreeSet<String> {
        self.existing_store(name)
            .map(|s| lock(&s).containers.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Containers staged during an upgrade; applied only if the handler succeeds.
struct MemoryUpgrade {
    existing: BTreeSet<String>,
    created: Vec<String>,
}

impl UpgradeTransaction for MemoryUpgrade {
    fn container_names(&self) -> BTreeSet<String> {
        let mut names = self.existing.clone();
        names.extend(self.created.iter().cloned());
        names
    }

    fn has_container(&self, name: &str) -> bool {
        self.existing.contains(name) || self.created.iter().any(|c| c == name)
    }

    fn create_container(&mut self, name: &str) -> EngineResult<()> {
        if self.has_container(name) {
            return Err(EngineError::ContainerExists(name.to_string()));
        }
        self.created.push(name.to_string());
        Ok(())
    }
}

#[async_trait]
impl StoreEngine for MemoryEngine {
    async fn open(
        &self,
        request: OpenRequest,
        upgrade: Option<Arc<dyn UpgradeHandler>>,
    ) -> EngineResult<Arc<dyn StoreHandle>> {
        let _guard = self.state.upgrade_locks.acquire(&request.name).await;
        tokio::task::yield_now().await;

        let store = self.store(&request.name);
        let current = lock(&store).version;

        if let Some(target) = resolve_target_version(request.version, current)? {
            let change = VersionChange {
                old_version: current,
                new_version: target,
            };
            self.state
                .handles
                .notify_upgrade(&request.name, change, |h, c| h.deliver(c))?;

            let mut staged = MemoryUpgrade {
                existing: lock(&store).containers.keys().cloned().collect(),
                created: Vec::new(),
            };
            if let Some(handler) = &upgrade {
                handler.upgrade(&mut staged, current, target)?;
            }

            let mut guard = lock(&store);
            for name in staged.created {
                guard.containers.insert(name, MemoryContainer::new());
            }
            guard.version = target;
            guard.upgrades += 1;
            info!(
                "upgraded in-memory store '{}' from v{} to v{}",
                request.name, current, target
            );
        }

        let (version, containers) = {
            let guard = lock(&store);
            (guard.version, guard.containers.keys().cloned().collect())
        };
        let handle = Arc::new(MemoryHandle {
            name: request.name,
            version,
            containers,
            store,
            closed: AtomicBool::new(false),
            listeners: ListenerSet::default(),
        });
        self.state.handles.register(&handle);
        Ok(handle)
    }
}

fn following_id(container: &str, id: RecordId) -> EngineResult<RecordId> {
    id.checked_add(1)
        .ok_or_else(|| EngineError::IdExhausted(container.to_string(), id))
}

/// Handle to an in-memory store.
pub struct MemoryHandle {
    name: String,
    version: u32,
    containers: BTreeSet<String>,
    store: SharedStore,
    closed: AtomicBool,
    listeners: ListenerSet,
}

impl fmt::Debug for MemoryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("containers", &self.containers)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl MemoryHandle {
    fn deliver(&self, change: VersionChange) {
        self.listeners.dispatch(self, change);
    }

    /// Check the handle is usable for `container`, then yield to the scheduler.
    async fn begin(&self, container: &str) -> EngineResult<()> {
        if self.is_closed() {
            return Err(EngineError::Closed(self.name.clone()));
        }
        if !self.containers.contains(container) {
            return Err(EngineError::UnknownContainer(container.to_string()));
        }
        tokio::task::yield_now().await;
        Ok(())
    }

    fn with_container<T>(
        &self,
        container: &str,
        f: impl FnOnce(&mut MemoryContainer) -> T,
    ) -> EngineResult<T> {
        let mut store = lock(&self.store);
        let entry = store
            .containers
            .get_mut(container)
            .ok_or_else(|| EngineError::UnknownContainer(container.to_string()))?;
        Ok(f(entry))
    }
}

#[async_trait]
impl StoreHandle for MemoryHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn container_names(&self) -> BTreeSet<String> {
        self.containers.clone()
    }

    fn has_container(&self, name: &str) -> bool {
        self.containers.contains(name)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn on_version_change(&self, listener: VersionChangeListener) {
        self.listeners.add(listener);
    }

    async fn insert(&self, container: &str, mut record: Record) -> EngineResult<RecordId> {
        self.begin(container).await?;
        self.with_container(container, |c| -> EngineResult<RecordId> {
            let id = c.next_id;
            c.next_id = following_id(container, id)?;
            record.insert(ID_FIELD.to_string(), Value::from(id));
            c.records.insert(id, record);
            Ok(id)
        })?
    }

    async fn get_all(&self, container: &str) -> EngineResult<Vec<Record>> {
        self.begin(container).await?;
        self.with_container(container, |c| c.records.values().cloned().collect())
    }

    async fn get(&self, container: &str, id: RecordId) -> EngineResult<Option<Record>> {
        self.begin(container).await?;
        self.with_container(container, |c| c.records.get(&id).cloned())
    }

    async fn put(&self, container: &str, record: Record) -> EngineResult<RecordId> {
        let id = record_key(&record)?;
        self.begin(container).await?;
        self.with_container(container, |c| -> EngineResult<RecordId> {
            if id >= c.next_id {
                c.next_id = following_id(container, id)?;
            }
            c.records.insert(id, record);
            Ok(id)
        })?
    }

    async fn delete(&self, container: &str, id: RecordId) -> EngineResult<()> {
        self.begin(container).await?;
        self.with_container(container, |c| {
            c.records.remove(&id);
        })
    }

    async fn count(&self, container: &str) -> EngineResult<u64> {
        self.begin(container).await?;
        self.with_container(container, |c| c.records.len() as u64)
    }
}
