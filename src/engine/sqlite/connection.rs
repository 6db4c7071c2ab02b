//! SQLite connection management
//!
//! This module provides the connection wrapper used by the SQLite engine.

use crate::error::EngineResult;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a lock held by another connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Core SQLite connection wrapper
///
/// `StoreConn` opens a store file and applies the pragmas every unistore
/// connection shares.
pub struct StoreConn {
    pub conn: Connection,
}

impl StoreConn {
    /// Open (creating if needed) the store file at `path`
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open(path)?;
        let db = StoreConn { conn };
        db.configure()?;
        Ok(db)
    }

    /// Create an in-memory database
    #[cfg(test)]
    pub fn open_in_memory() -> EngineResult<Self> {
        let db = StoreConn {
            conn: Connection::open_in_memory()?,
        };
        db.configure()?;
        Ok(db)
    }

    fn configure(&self) -> EngineResult<()> {
        // WAL lets readers in other handles proceed during writes
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        self.conn.execute("PRAGMA synchronous=NORMAL", [])?;
        self.conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(())
    }

    /// Store version, kept in SQLite's `user_version` header field
    pub fn user_version(&self) -> EngineResult<u32> {
        let version: u32 = self
            .conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))?;
        Ok(version)
    }

    #[cfg(test)]
    pub fn set_user_version(&self, version: u32) -> EngineResult<()> {
        self.conn
            .execute_batch(&format!("PRAGMA user_version = {}", version))?;
        Ok(())
    }

    /// Check if a table exists in the database
    #[cfg(test)]
    pub fn table_exists(&self, table_name: &str) -> EngineResult<bool> {
        let count: i32 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
