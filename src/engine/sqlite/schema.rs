//! Store file schema
//!
//! Containers are not SQLite tables of their own. Every store file carries two
//! bookkeeping tables: one row per container (with its id generator), and one
//! row per record holding the record body as JSON.

use crate::engine::{Record, RecordId};
use crate::error::{EngineError, EngineResult};
use rusqlite::{Connection, OptionalExtension};
use std::collections::BTreeSet;

/// Schema definitions for the bookkeeping tables
pub struct SchemaDefinitions;

impl SchemaDefinitions {
    /// SQL for creating the container registry
    pub const CONTAINERS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS unistore_containers (
            name TEXT PRIMARY KEY,
            next_id INTEGER NOT NULL DEFAULT 1,
            created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );
    "#;

    /// SQL for creating the record table
    pub const RECORDS_TABLE: &'static str = r#"
        CREATE TABLE IF NOT EXISTS unistore_records (
            container TEXT NOT NULL,
            id INTEGER NOT NULL,
            body TEXT NOT NULL,
            PRIMARY KEY (container, id)
        );
    "#;
}

/// Schema and record access over one connection (or transaction)
///
/// Callers own transaction boundaries; every method here is a plain statement.
pub struct SchemaManager<'a> {
    conn: &'a Connection,
}

impl<'a> SchemaManager<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create the bookkeeping tables if they don't exist
    pub fn initialize(&self) -> EngineResult<()> {
        self.conn.execute(SchemaDefinitions::CONTAINERS_TABLE, [])?;
        self.conn.execute(SchemaDefinitions::RECORDS_TABLE, [])?;
        Ok(())
    }

    pub fn container_names(&self) -> EngineResult<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT name FROM unistore_containers")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(names)
    }

    pub fn create_container(&self, name: &str) -> EngineResult<()> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO unistore_containers (name) VALUES (?1)",
            [name],
        )?;
        if inserted == 0 {
            return Err(EngineError::ContainerExists(name.to_string()));
        }
        Ok(())
    }

    /// Take the next id from a container's generator
    pub fn next_id(&self, container: &str) -> EngineResult<RecordId> {
        let id: Option<RecordId> = self
            .conn
            .query_row(
                "SELECT next_id FROM unistore_containers WHERE name = ?1",
                [container],
                |row| row.get(0),
            )
            .optional()?;
        let id = id.ok_or_else(|| EngineError::UnknownContainer(container.to_string()))?;

        let next = id
            .checked_add(1)
            .ok_or_else(|| EngineError::IdExhausted(container.to_string(), id))?;
        self.conn.execute(
            "UPDATE unistore_containers SET next_id = ?2 WHERE name = ?1",
            rusqlite::params![container, next],
        )?;
        Ok(id)
    }

    /// Keep the generator ahead of an explicitly written id
    ///
    /// The increment happens here rather than in SQL, where it would overflow
    /// into a REAL column value.
    pub fn advance_id(&self, container: &str, id: RecordId) -> EngineResult<()> {
        let next = id
            .checked_add(1)
            .ok_or_else(|| EngineError::IdExhausted(container.to_string(), id))?;
        self.conn.execute(
            "UPDATE unistore_containers SET next_id = MAX(next_id, ?2) WHERE name = ?1",
            rusqlite::params![container, next],
        )?;
        Ok(())
    }

    pub fn put_record(&self, container: &str, id: RecordId, record: &Record) -> EngineResult<()> {
        let body = serde_json::to_string(record)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO unistore_records (container, id, body) VALUES (?1, ?2, ?3)",
            rusqlite::params![container, id, body],
        )?;
        Ok(())
    }

    pub fn get_record(&self, container: &str, id: RecordId) -> EngineResult<Option<Record>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM unistore_records WHERE container = ?1 AND id = ?2",
                rusqlite::params![container, id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(EngineError::from)
    }

    pub fn all_records(&self, container: &str) -> EngineResult<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT body FROM unistore_records WHERE container = ?1 ORDER BY id",
        )?;
        let bodies = stmt
            .query_map([container], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(EngineError::from))
            .collect()
    }

    pub fn delete_record(&self, container: &str, id: RecordId) -> EngineResult<()> {
        self.conn.execute(
            "DELETE FROM unistore_records WHERE container = ?1 AND id = ?2",
            rusqlite::params![container, id],
        )?;
        Ok(())
    }

    pub fn count_records(&self, container: &str) -> EngineResult<u64> {
        let count: u64 = self.conn.query_row(
            "SELECT COUNT(*) FROM unistore_records WHERE container = ?1",
            [container],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sqlite::connection::StoreConn;
    use serde_json::json;

    fn create_test_db() -> StoreConn {
        let db = StoreConn::open_in_memory().unwrap();
        SchemaManager::new(&db.conn).initialize().unwrap();
        db
    }

    #[test]
    fn test_initialize_creates_tables() {
        let db = create_test_db();
        assert!(db.table_exists("unistore_containers").unwrap());
        assert!(db.table_exists("unistore_records").unwrap());
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let db = create_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.create_container("notes").unwrap();
        manager.initialize().unwrap();

        assert!(manager.container_names().unwrap().contains("notes"));
    }

    #[test]
    fn test_create_container_twice() {
        let db = create_test_db();
        let manager = SchemaManager::new(&db.conn);

        manager.create_container("notes").unwrap();
        let result = manager.create_container("notes");
        assert!(matches!(result, Err(EngineError::ContainerExists(_))));
        assert_eq!(manager.container_names().unwrap().len(), 1);
    }

    #[test]
    fn test_id_generator() {
        let db = create_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.create_container("notes").unwrap();

        assert_eq!(manager.next_id("notes").unwrap(), 1);
        assert_eq!(manager.next_id("notes").unwrap(), 2);

        manager.advance_id("notes", 10).unwrap();
        assert_eq!(manager.next_id("notes").unwrap(), 11);

        // never moves backwards
        manager.advance_id("notes", 3).unwrap();
        assert_eq!(manager.next_id("notes").unwrap(), 12);

        assert!(matches!(
            manager.next_id("missing"),
            Err(EngineError::UnknownContainer(_))
        ));
    }

    #[test]
    fn test_id_generator_at_max() {
        let db = create_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.create_container("notes").unwrap();

        let result = manager.advance_id("notes", RecordId::MAX);
        assert!(matches!(result, Err(EngineError::IdExhausted(_, RecordId::MAX))));
        assert_eq!(manager.next_id("notes").unwrap(), 1);

        manager.advance_id("notes", RecordId::MAX - 1).unwrap();
        let result = manager.next_id("notes");
        assert!(matches!(result, Err(EngineError::IdExhausted(_, _))));
    }

    #[test]
    fn test_record_storage() {
        let db = create_test_db();
        let manager = SchemaManager::new(&db.conn);
        manager.create_container("notes").unwrap();

        let record = json!({"id": 2, "text": "b"}).as_object().cloned().unwrap();
        manager.put_record("notes", 2, &record).unwrap();
        let record = json!({"id": 1, "text": "a"}).as_object().cloned().unwrap();
        manager.put_record("notes", 1, &record).unwrap();

        let all = manager.all_records("notes").unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["text"], json!("a"));
        assert_eq!(manager.count_records("notes").unwrap(), 2);

        manager.delete_record("notes", 1).unwrap();
        assert_eq!(manager.get_record("notes", 1).unwrap(), None);
        assert_eq!(manager.get_record("notes", 2).unwrap(), Some(record_two()));
    }

    fn record_two() -> Record {
        json!({"id": 2, "text": "b"}).as_object().cloned().unwrap()
    }
}
