#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

//! Unistore - one versioned store for every feature of the hub application
//!
//! Older releases of the application opened their data under several store
//! names and versions. Unistore funnels all of them into a single canonical
//! store, creates the containers each feature needs by raising the store
//! version, and keeps one shared handle that survives upgrades made by other
//! connections.
//!
//! # Feature Flags
//!
//! | Feature | Description | Key Dependencies |
//! |---------|-------------|------------------|
//! | `display` | Table formatting of status rows | `tabled` |
//! | `cli` | The `unistore` command-line binary | All above + `clap`, `tracing-subscriber` |
//!
//! # Architecture
//!
//! - **[`engine`]**: the store engine contract and its implementations
//!   - `SqliteEngine`: one SQLite file per store, version in `user_version`
//!   - `MemoryEngine`: in-process engine with identical semantics
//! - **[`store`]**: everything built on top of an engine
//!   - `normalizer`: legacy store names and the minimum version
//!   - `provisioner`: creates missing containers through a version upgrade
//!   - `session`: the process-wide cached handle
//!   - `accessor`: [`HubStore`], the validated CRUD surface
//! - **[`config`]**: configuration management
//! - **[`output`]**: output formats for the CLI
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use unistore::{HubStore, UnistoreConfig};
//! use serde_json::json;
//!
//! let config = UnistoreConfig::new(&None)?;
//! let store = HubStore::open_sqlite(&config)?;
//! store.bootstrap().await?;
//!
//! let id = store.create("todo", json!({"task": "write report"})).await?;
//! let todos = store.list_all("todos").await?;
//! assert_eq!(todos[0]["id"], json!(id));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod output;
pub mod store;

// =============================================================================
// Configuration
// =============================================================================

pub use config::{format_size, UnistoreConfig};

// =============================================================================
// Errors
// =============================================================================

pub use error::{EngineError, EngineResult, Error, Result};

// =============================================================================
// Engine
// =============================================================================

pub use engine::{
    MemoryEngine, OpenRequest, Record, RecordId, SqliteEngine, StoreEngine, StoreHandle,
    UpgradeHandler, UpgradeTransaction, VersionChange,
};

// =============================================================================
// Store
// =============================================================================

pub use store::{
    ContainerStatus, HubStore, IntoRecordId, Provisioner, SessionCache, StoreNormalizer,
    StoreStatus, CANONICAL_STORE_NAME, LEGACY_STORE_NAMES, MIN_STORE_VERSION,
    REQUIRED_CONTAINERS,
};

pub use output::OutputFormat;
