//! Store engine contract
//!
//! This module defines the minimum capability set unistore needs from a
//! persistent store engine, and ships two engines implementing it:
//!
//! - `SqliteEngine`: durable storage, one SQLite file per store name
//! - `MemoryEngine`: in-process storage with the same semantics
//!
//! # Model
//!
//! ```text
//! StoreEngine ──open(name, version?)──> StoreHandle
//!     │                                   ├── version / container_names
//!     │                                   ├── insert / get_all / get / put / delete / count
//!     │                                   └── on_version_change(listener)
//!     └── version > current ──> UpgradeHandler::upgrade(&mut dyn UpgradeTransaction)
//!                                   └── create_container(name)
//! ```
//!
//! A handle sees the container set that existed when it was opened. Containers
//! can only be created inside an upgrade, and an upgrade is only triggered by
//! opening with a version strictly greater than the stored one.

mod memory;
mod registry;
mod sqlite;

pub use memory::MemoryEngine;
pub use sqlite::SqliteEngine;

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// A stored record: a JSON object keyed by field name.
pub type Record = Map<String, Value>;

/// Engine-assigned record identifier.
pub type RecordId = i64;

/// Field carrying the record identifier.
pub const ID_FIELD: &str = "id";

/// Parameters of a request to open a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest {
    pub name: String,
    /// `None` opens at whatever version the store currently has.
    pub version: Option<u32>,
}

impl OpenRequest {
    pub fn new(name: impl Into<String>, version: Option<u32>) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn unversioned(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }
}

/// Notification delivered to open handles when another connection upgrades the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u32,
    pub new_version: u32,
}

/// Callback invoked when a handle receives a [`VersionChange`].
pub type VersionChangeListener = Box<dyn Fn(&dyn StoreHandle, VersionChange) + Send + Sync>;

/// Schema operations available only while an upgrade is in progress.
pub trait UpgradeTransaction {
    fn container_names(&self) -> BTreeSet<String>;

    fn has_container(&self, name: &str) -> bool {
        self.container_names().contains(name)
    }

    /// Create a container keyed by an auto-incrementing integer id.
    ///
    /// Fails with [`EngineError::ContainerExists`] if the container is already present.
    fn create_container(&mut self, name: &str) -> EngineResult<()>;
}

/// Hook run by the engine when an open request raises the store version.
pub trait UpgradeHandler: Send + Sync {
    fn upgrade(
        &self,
        tx: &mut dyn UpgradeTransaction,
        old_version: u32,
        new_version: u32,
    ) -> EngineResult<()>;
}

/// A live connection to a store at a fixed version.
///
/// Every data operation runs as its own single-container transaction.
#[async_trait]
pub trait StoreHandle: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    /// Containers that existed when this handle was opened.
    fn container_names(&self) -> BTreeSet<String>;

    fn has_container(&self, name: &str) -> bool {
        self.container_names().contains(name)
    }

    fn is_closed(&self) -> bool;

    /// Close the handle. Further operations fail with [`EngineError::Closed`].
    fn close(&self);

    fn on_version_change(&self, listener: VersionChangeListener);

    /// Insert a record, assigning a fresh id which is also written into the stored record.
    async fn insert(&self, container: &str, record: Record) -> EngineResult<RecordId>;

    /// All records of a container in ascending id order.
    async fn get_all(&self, container: &str) -> EngineResult<Vec<Record>>;

    async fn get(&self, container: &str, id: RecordId) -> EngineResult<Option<Record>>;

    /// Insert or replace the record stored under its `id` field.
    async fn put(&self, container: &str, record: Record) -> EngineResult<RecordId>;

    /// Delete a record; deleting an absent id succeeds.
    async fn delete(&self, container: &str, id: RecordId) -> EngineResult<()>;

    async fn count(&self, container: &str) -> EngineResult<u64>;
}

/// A persistent store engine capable of opening named, versioned stores.
#[async_trait]
pub trait StoreEngine: Send + Sync {
    /// Open `request.name`.
    ///
    /// - unversioned: open at the current version, creating version 1 for a new store
    /// - version below current: [`EngineError::VersionTooLow`]
    /// - version above current: run `upgrade` exclusively, then open at the new version
    async fn open(
        &self,
        request: OpenRequest,
        upgrade: Option<Arc<dyn UpgradeHandler>>,
    ) -> EngineResult<Arc<dyn StoreHandle>>;
}

/// Work out the version an open request lands on, given the stored version.
///
/// Returns `Some(target)` when an upgrade from `current` to `target` is needed.
pub(crate) fn resolve_target_version(
    requested: Option<u32>,
    current: u32,
) -> EngineResult<Option<u32>> {
    match requested {
        Some(0) => Err(EngineError::InvalidVersion),
        Some(v) if v < current => Err(EngineError::VersionTooLow {
            requested: v,
            current,
        }),
        Some(v) if v > current => Ok(Some(v)),
        Some(_) => Ok(None),
        None if current == 0 => Ok(Some(1)),
        None => Ok(None),
    }
}

/// Read the `id` field of a record as an integer key.
pub(crate) fn record_key(record: &Record) -> EngineResult<RecordId> {
    match record.get(ID_FIELD) {
        Some(Value::Number(n)) => n.as_i64().ok_or(EngineError::MissingKey),
        _ => Err(EngineError::MissingKey),
    }
}
