//! Error types
//!
//! Two layers of errors are used throughout unistore:
//! - [`EngineError`]: anything the underlying store engine reports
//! - [`Error`]: what the public store surface returns to callers

use thiserror::Error;

/// Failures reported by a store engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store handle for '{0}' is closed")]
    Closed(String),

    #[error("Requested version {requested} is lower than the current version {current}")]
    VersionTooLow { requested: u32, current: u32 },

    #[error("Version 0 is not a valid store version")]
    InvalidVersion,

    #[error("Upgrade of '{name}' to version {version} blocked by open handles")]
    Blocked { name: String, version: u32 },

    #[error("Store '{name}' was upgraded from version {old} to {new} by another connection")]
    VersionChanged { name: String, old: u32, new: u32 },

    #[error("Container '{0}' already exists")]
    ContainerExists(String),

    #[error("Container '{0}' does not exist")]
    UnknownContainer(String),

    #[error("Record has no usable 'id' key")]
    MissingKey,

    #[error("Container '{0}' has no ids left after {1}")]
    IdExhausted(String, i64),

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Errors returned by the validated store surface.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Container '{0}' is missing after provisioning")]
    ContainerMissing(String),

    #[error("Store error: {0}")]
    Store(#[from] EngineError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
