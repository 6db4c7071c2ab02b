//! SQLite store engine
//!
//! Each store name maps to one file, `{data_dir}/{name}.sqlite3`. The store
//! version lives in SQLite's `user_version` field, so an upgrade is a single
//! `BEGIN IMMEDIATE` transaction that creates containers and bumps the
//! version together. The stored version is re-read inside that transaction,
//! which keeps concurrent upgrades from other processes from double-applying.
//!
//! Handles hold their own connection. Blocking SQLite work runs on tokio's
//! blocking pool.

mod connection;
mod schema;

use connection::StoreConn;
use schema::SchemaManager;

use crate::engine::registry::{lock, HandleRegistry, ListenerSet, UpgradeLocks};
use crate::engine::{
    record_key, resolve_target_version, OpenRequest, Record, RecordId, StoreEngine, StoreHandle,
    UpgradeHandler, UpgradeTransaction, VersionChange, VersionChangeListener, ID_FIELD,
};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use rusqlite::{Connection, TransactionBehavior};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Run blocking SQLite work off the async executor.
async fn blocking<T, F>(f: F) -> EngineResult<T>
where
    F: FnOnce() -> EngineResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EngineError::Task(e.to_string()))?
}

/// SQLite-backed store engine
pub struct SqliteEngine {
    data_dir: PathBuf,
    handles: HandleRegistry<SqliteHandle>,
    upgrade_locks: UpgradeLocks,
}

impl SqliteEngine {
    /// Create an engine storing files under `data_dir` (created if missing)
    pub fn new(data_dir: impl AsRef<Path>) -> EngineResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            handles: HandleRegistry::default(),
            upgrade_locks: UpgradeLocks::default(),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the file backing store `name`
    ///
    /// Characters outside `[A-Za-z0-9_-]` are replaced so any name maps to a
    /// file inside the data directory.
    pub fn store_path(&self, name: &str) -> PathBuf {
        let file_name: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.data_dir.join(format!("{}.sqlite3", file_name))
    }
}

/// Upgrade transaction over an open `BEGIN IMMEDIATE` transaction
struct SqliteUpgrade<'a> {
    schema: SchemaManager<'a>,
    containers: BTreeSet<String>,
}

impl UpgradeTransaction for SqliteUpgrade<'_> {
    fn container_names(&self) -> BTreeSet<String> {
        self.containers.clone()
    }

    fn has_container(&self, name: &str) -> bool {
        self.containers.contains(name)
    }

    fn create_container(&mut self, name: &str) -> EngineResult<()> {
        self.schema.create_container(name)?;
        self.containers.insert(name.to_string());
        Ok(())
    }
}

/// Run the upgrade `requested` asks for, resolved against the version read
/// inside the transaction.
///
/// Returns the version the store ended up at.
fn run_upgrade(
    conn: &mut Connection,
    requested: Option<u32>,
    handler: Option<&dyn UpgradeHandler>,
) -> EngineResult<u32> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let current: u32 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    // another process may have upgraded between our first read and the lock
    let target = match resolve_target_version(requested, current)? {
        Some(t) => t,
        None => {
            tx.commit()?;
            return Ok(current);
        }
    };

    {
        let schema = SchemaManager::new(&tx);
        let containers = schema.container_names()?;
        let mut upgrade = SqliteUpgrade { schema, containers };
        if let Some(handler) = handler {
            handler.upgrade(&mut upgrade, current, target)?;
        }
    }

    tx.execute_batch(&format!("PRAGMA user_version = {}", target))?;
    tx.commit()?;
    Ok(target)
}

#[async_trait]
impl StoreEngine for SqliteEngine {
    async fn open(
        &self,
        request: OpenRequest,
        upgrade: Option<Arc<dyn UpgradeHandler>>,
    ) -> EngineResult<Arc<dyn StoreHandle>> {
        let _guard = self.upgrade_locks.acquire(&request.name).await;
        let path = self.store_path(&request.name);

        let (db, current) = blocking(move || {
            let db = StoreConn::open(&path)?;
            SchemaManager::new(&db.conn).initialize()?;
            let current = db.user_version()?;
            Ok((db, current))
        })
        .await?;

        let requested = request.version;
        let db = match resolve_target_version(requested, current)? {
            None => db,
            Some(target) => {
                let change = VersionChange {
                    old_version: current,
                    new_version: target,
                };
                self.handles
                    .notify_upgrade(&request.name, change, |h, c| h.deliver(c))?;

                let name = request.name.clone();
                blocking(move || {
                    let mut db = db;
                    let reached = run_upgrade(&mut db.conn, requested, upgrade.as_deref())?;
                    info!(
                        "upgraded store '{}' from v{} to v{}",
                        name, current, reached
                    );
                    Ok(db)
                })
                .await?
            }
        };

        let (db, version, containers) = blocking(move || {
            let version = db.user_version()?;
            let containers = SchemaManager::new(&db.conn).container_names()?;
            Ok((db, version, containers))
        })
        .await?;

        let handle = Arc::new(SqliteHandle {
            name: request.name,
            version,
            containers,
            conn: Arc::new(Mutex::new(db)),
            closed: AtomicBool::new(false),
            listeners: ListenerSet::default(),
        });
        self.handles.register(&handle);
        Ok(handle)
    }
}

/// Handle to one SQLite store file
pub struct SqliteHandle {
    name: String,
    version: u32,
    containers: BTreeSet<String>,
    conn: Arc<Mutex<StoreConn>>,
    closed: AtomicBool,
    listeners: ListenerSet,
}

impl fmt::Debug for SqliteHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteHandle")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("containers", &self.containers)
            .field("closed", &self.is_closed())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl SqliteHandle {
    fn deliver(&self, change: VersionChange) {
        self.listeners.dispatch(self, change);
    }

    /// Run `f` as one transaction against `container`.
    ///
    /// If another process raised the store version since this handle was
    /// opened, listeners are notified and the operation fails.
    async fn run<T, F>(&self, container: &str, write: bool, f: F) -> EngineResult<T>
    where
        F: FnOnce(&SchemaManager<'_>) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(EngineError::Closed(self.name.clone()));
        }
        if !self.containers.contains(container) {
            return Err(EngineError::UnknownContainer(container.to_string()));
        }

        let conn = self.conn.clone();
        let expected = self.version;
        let outcome = blocking(move || {
            let mut db = lock(&conn);
            let behavior = if write {
                TransactionBehavior::Immediate
            } else {
                TransactionBehavior::Deferred
            };
            let tx = db.conn.transaction_with_behavior(behavior)?;
            let stored: u32 = tx.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            if stored != expected {
                return Ok(Err(stored));
            }
            let value = f(&SchemaManager::new(&tx))?;
            tx.commit()?;
            Ok(Ok(value))
        })
        .await?;

        outcome.map_err(|stored| {
            let change = VersionChange {
                old_version: self.version,
                new_version: stored,
            };
            warn!(
                "store '{}' changed from v{} to v{} underneath an open handle",
                self.name, change.old_version, change.new_version
            );
            self.deliver(change);
            EngineError::VersionChanged {
                name: self.name.clone(),
                old: change.old_version,
                new: change.new_version,
            }
        })
    }
}

#[async_trait]
impl StoreHandle for SqliteHandle {
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
        let name = container.to_string();
        self.run(container, true, move |schema| {
            let id = schema.next_id(&name)?;
            record.insert(ID_FIELD.to_string(), Value::from(id));
            schema.put_record(&name, id, &record)?;
            Ok(id)
        })
        .await
    }

    async fn get_all(&self, container: &str) -> EngineResult<Vec<Record>> {
        let name = container.to_string();
        self.run(container, false, move |schema| schema.all_records(&name))
            .await
    }

    async fn get(&self, container: &str, id: RecordId) -> EngineResult<Option<Record>> {
        let name = container.to_string();
        self.run(container, false, move |schema| schema.get_record(&name, id))
            .await
    }

    async fn put(&self, container: &str, record: Record) -> EngineResult<RecordId> {
        let id = record_key(&record)?;
        let name = container.to_string();
        self.run(container, true, move |schema| {
            schema.put_record(&name, id, &record)?;
            schema.advance_id(&name, id)?;
            Ok(id)
        })
        .await
    }

    async fn delete(&self, container: &str, id: RecordId) -> EngineResult<()> {
        let name = container.to_string();
        self.run(container, true, move |schema| schema.delete_record(&name, id))
            .await
    }

    async fn count(&self, container: &str) -> EngineResult<u64> {
        let name = container.to_string();
        self.run(container, false, move |schema| schema.count_records(&name))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    struct CreateAll(Vec<&'static str>);

    impl UpgradeHandler for CreateAll {
        fn upgrade(
            &self,
            tx: &mut dyn UpgradeTransaction,
            _old_version: u32,
            _new_version: u32,
        ) -> EngineResult<()> {
            for name in &self.0 {
                if !tx.has_container(name) {
                    tx.create_container(name)?;
                }
            }
            Ok(())
        }
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn engine() -> (TempDir, SqliteEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = SqliteEngine::new(dir.path()).unwrap();
        (dir, engine)
    }

    #[test]
    fn test_store_path_sanitizes_name() {
        let (dir, engine) = engine();
        assert_eq!(
            engine.store_path("../Personal Hub"),
            dir.path().join("___Personal_Hub.sqlite3")
        );
        assert_eq!(
            engine.store_path("unistore"),
            dir.path().join("unistore.sqlite3")
        );
    }

    #[tokio::test]
    async fn test_open_new_store() {
        let (_dir, engine) = engine();
        let handle = engine
            .open(OpenRequest::unversioned("db"), None)
            .await
            .unwrap();

        assert_eq!(handle.version(), 1);
        assert!(handle.container_names().is_empty());
        assert!(engine.store_path("db").exists());
    }

    #[tokio::test]
    async fn test_upgrade_persists_across_engines() {
        let dir = tempfile::tempdir().unwrap();
        {
            let engine = SqliteEngine::new(dir.path()).unwrap();
            let handle = engine
                .open(
                    OpenRequest::new("db", Some(2)),
                    Some(Arc::new(CreateAll(vec!["notes", "todos"]))),
                )
                .await
                .unwrap();
            handle
                .insert("notes", record(json!({"text": "kept"})))
                .await
                .unwrap();
        }

        let engine = SqliteEngine::new(dir.path()).unwrap();
        let handle = engine
            .open(OpenRequest::unversioned("db"), None)
            .await
            .unwrap();
        assert_eq!(handle.version(), 2);
        assert!(handle.has_container("todos"));

        let notes = handle.get_all("notes").await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0]["text"], json!("kept"));
        assert_eq!(notes[0]["id"], json!(1));
    }

    #[tokio::test]
    async fn test_failed_upgrade_rolls_back() {
        let (_dir, engine) = engine();
        engine
            .open(
                OpenRequest::new("db", Some(1)),
                Some(Arc::new(CreateAll(vec!["notes"]))),
            )
            .await
            .unwrap()
            .close();

        struct Failing;
        impl UpgradeHandler for Failing {
            fn upgrade(
                &self,
                tx: &mut dyn UpgradeTransaction,
                _old_version: u32,
                _new_version: u32,
            ) -> EngineResult<()> {
                tx.create_container("todos")?;
                tx.create_container("notes")
            }
        }

        let result = engine
            .open(OpenRequest::new("db", Some(2)), Some(Arc::new(Failing)))
            .await;
        assert!(matches!(result, Err(EngineError::ContainerExists(_))));

        let handle = engine
            .open(OpenRequest::unversioned("db"), None)
            .await
            .unwrap();
        assert_eq!(handle.version(), 1);
        assert!(!handle.has_container("todos"));
    }

    #[tokio::test]
    async fn test_upgrade_blocked_until_listener_closes() {
        let (_dir, engine) = engine();
        let first = engine
            .open(OpenRequest::unversioned("db"), None)
            .await
            .unwrap();

        let blocked = engine.open(OpenRequest::new("db", Some(2)), None).await;
        assert!(matches!(blocked, Err(EngineError::Blocked { .. })));

        first.on_version_change(Box::new(|handle, _| handle.close()));
        let upgraded = engine
            .open(OpenRequest::new("db", Some(2)), None)
            .await
            .unwrap();
        assert!(first.is_closed());
        assert_eq!(upgraded.version(), 2);
    }

    #[tokio::test]
    async fn test_external_upgrade_detected() {
        let dir = tempfile::tempdir().unwrap();
        let ours = SqliteEngine::new(dir.path()).unwrap();
        let handle = ours
            .open(
                OpenRequest::new("db", Some(1)),
                Some(Arc::new(CreateAll(vec!["notes"]))),
            )
            .await
            .unwrap();
        handle.on_version_change(Box::new(|handle, _| handle.close()));

        // a second engine stands in for another process
        let theirs = SqliteEngine::new(dir.path()).unwrap();
        theirs
            .open(
                OpenRequest::new("db", Some(2)),
                Some(Arc::new(CreateAll(vec!["todos"]))),
            )
            .await
            .unwrap();

        let result = handle.get_all("notes").await;
        assert!(matches!(
            result,
            Err(EngineError::VersionChanged { old: 1, new: 2, .. })
        ));
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_record_operations() {
        let (_dir, engine) = engine();
        let handle = engine
            .open(
                OpenRequest::new("db", Some(1)),
                Some(Arc::new(CreateAll(vec!["notes"]))),
            )
            .await
            .unwrap();

        let id = handle
            .insert("notes", record(json!({"text": "a"})))
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(handle.get("notes", 42).await.unwrap(), None);

        handle
            .put("notes", record(json!({"id": 1, "text": "edited"})))
            .await
            .unwrap();
        let stored = handle.get("notes", 1).await.unwrap().unwrap();
        assert_eq!(stored["text"], json!("edited"));

        handle
            .put("notes", record(json!({"id": 5, "text": "upsert"})))
            .await
            .unwrap();
        let next = handle
            .insert("notes", record(json!({"text": "after"})))
            .await
            .unwrap();
        assert_eq!(next, 6);

        handle.delete("notes", 5).await.unwrap();
        handle.delete("notes", 5).await.unwrap();
        assert_eq!(handle.count("notes").await.unwrap(), 2);

        let missing_key = handle.put("notes", record(json!({"text": "x"}))).await;
        assert!(matches!(missing_key, Err(EngineError::MissingKey)));
    }

    #[tokio::test]
    async fn test_put_at_max_id_rolls_back() {
        let (_dir, engine) = engine();
        let handle = engine
            .open(
                OpenRequest::new("db", Some(1)),
                Some(Arc::new(CreateAll(vec!["notes"]))),
            )
            .await
            .unwrap();

        let result = handle
            .put("notes", record(json!({"id": RecordId::MAX})))
            .await;
        assert!(matches!(result, Err(EngineError::IdExhausted(_, RecordId::MAX))));
        assert_eq!(handle.get("notes", RecordId::MAX).await.unwrap(), None);

        let id = handle
            .insert("notes", record(json!({"x": 1})))
            .await
            .unwrap();
        assert_eq!(id, 1);
    }
}
