use crate::errors::{StoreError, StoreResult};
use crate::index::IndexStore;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Key/value persistence for the local project index.
#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

impl Database {
    pub fn new(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("database mutex poisoned".to_string()))
    }
}

impl IndexStore for Database {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.lock()?;
        let raw = conn
            .query_row("SELECT value_json FROM kv_store WHERE key = ?1", [key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(raw)
    }

    fn store(&self, key: &str, value: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO kv_store (key, value_json, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::index::IndexStore;

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("nested").join("index.db");
        {
            let db = Database::new(&db_path).expect("db");
            db.store("recent", "[1]").expect("store");
            db.store("recent", "[1,2]").expect("overwrite");
        }
        let db = Database::new(&db_path).expect("reopen");
        assert_eq!(db.path(), Some(db_path.as_path()));
        assert_eq!(db.load("recent").expect("load").as_deref(), Some("[1,2]"));
    }

    #[test]
    fn remove_clears_key() {
        let db = Database::open_in_memory().expect("db");
        db.store("recent", "[]").expect("store");
        db.remove("recent").expect("remove");
        assert!(db.load("recent").expect("load").is_none());
        db.remove("recent").expect("removing twice is fine");
    }
}
