use crate::errors::{StoreError, StoreResult};
use crate::models::ProjectCache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const DEFAULT_INDEX_KEY: &str = "deck_project_cache";

/// Persistence behind the local index: a handful of string values by key.
pub trait IndexStore: Send + Sync {
    fn load(&self, key: &str) -> StoreResult<Option<String>>;
    fn store(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn load(&self, key: &str) -> StoreResult<Option<String>> {
        let values = self
            .values
            .lock()
            .map_err(|_| StoreError::Internal("index store mutex poisoned".to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Internal("index store mutex poisoned".to_string()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| StoreError::Internal("index store mutex poisoned".to_string()))?;
        values.remove(key);
        Ok(())
    }
}

/// Recent-projects list persisted as one JSON array under a single key.
///
/// Every mutation reads the whole list, changes it and writes it back. Two
/// writers sharing the same store can lose each other's updates.
#[derive(Clone)]
pub struct LocalIndex {
    store: Arc<dyn IndexStore>,
    key: String,
}

impl LocalIndex {
    pub fn new(store: Arc<dyn IndexStore>) -> Self {
        Self::with_key(store, DEFAULT_INDEX_KEY)
    }

    pub fn with_key(store: Arc<dyn IndexStore>, key: &str) -> Self {
        Self {
            store,
            key: key.to_string(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryIndexStore::new()))
    }

    /// Entries in stored order. An unreadable document reads as empty.
    pub fn list(&self) -> StoreResult<Vec<ProjectCache>> {
        let Some(raw) = self.store.load(&self.key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<ProjectCache>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(error) => {
                tracing::warn!(key = %self.key, error = %error, "malformed project index; treating as empty");
                Ok(Vec::new())
            }
        }
    }

    /// Replaces the entry living at the same directory, else appends.
    pub fn upsert_by_path(&self, entry: ProjectCache) -> StoreResult<()> {
        let mut entries = self.list()?;
        match entries.iter().position(|existing| existing.path == entry.path) {
            Some(index) => entries[index] = entry,
            None => entries.push(entry),
        }
        self.write(&entries)
    }

    /// Replaces the entry with the same project id, else appends.
    pub fn upsert_by_id(&self, entry: ProjectCache) -> StoreResult<()> {
        let mut entries = self.list()?;
        match entries.iter().position(|existing| existing.id == entry.id) {
            Some(index) => entries[index] = entry,
            None => entries.push(entry),
        }
        self.write(&entries)
    }

    pub fn remove_by_id(&self, id: &str) -> StoreResult<()> {
        let mut entries = self.list()?;
        entries.retain(|entry| entry.id != id);
        self.write(&entries)
    }

    pub fn clear(&self) -> StoreResult<()> {
        self.store.remove(&self.key)
    }

    fn write(&self, entries: &[ProjectCache]) -> StoreResult<()> {
        let raw = serde_json::to_string(entries)?;
        self.store.store(&self.key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(id: &str, name: &str, path: &str) -> ProjectCache {
        ProjectCache {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            path: path.to_string(),
            page_count: 1,
            updated_at: Utc::now(),
            thumbnail: None,
        }
    }

    #[test]
    fn upsert_by_path_is_idempotent() {
        let index = LocalIndex::in_memory();
        index.upsert_by_path(entry("a", "First", "/decks/one")).expect("upsert");
        index.upsert_by_path(entry("b", "Renamed", "/decks/one")).expect("upsert again");

        let entries = index.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b");
        assert_eq!(entries[0].name, "Renamed");
    }

    #[test]
    fn upsert_by_id_follows_moved_projects() {
        let index = LocalIndex::in_memory();
        index.upsert_by_id(entry("a", "Deck", "/decks/old")).expect("upsert");
        index.upsert_by_id(entry("a", "Deck", "/decks/new")).expect("upsert moved");

        let entries = index.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/decks/new");
    }

    #[test]
    fn list_keeps_insertion_order() {
        let index = LocalIndex::in_memory();
        index.upsert_by_path(entry("a", "A", "/a")).expect("a");
        index.upsert_by_path(entry("b", "B", "/b")).expect("b");
        index.upsert_by_id(entry("c", "C", "/c")).expect("c");
        index.upsert_by_id(entry("a", "A2", "/a")).expect("a again");

        let ids: Vec<String> = index.list().expect("list").into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn remove_and_clear() {
        let index = LocalIndex::in_memory();
        index.upsert_by_path(entry("a", "A", "/a")).expect("a");
        index.upsert_by_path(entry("b", "B", "/b")).expect("b");
        index.remove_by_id("a").expect("remove");
        assert_eq!(index.list().expect("list").len(), 1);
        index.remove_by_id("missing").expect("remove missing is a no-op");

        index.clear().expect("clear");
        assert!(index.list().expect("list").is_empty());
    }

    #[test]
    fn malformed_document_reads_as_empty() {
        let store = Arc::new(MemoryIndexStore::new());
        store.store(DEFAULT_INDEX_KEY, "{oops").expect("seed");
        let index = LocalIndex::new(store);
        assert!(index.list().expect("list").is_empty());
        index.upsert_by_path(entry("a", "A", "/a")).expect("recovers on write");
        assert_eq!(index.list().expect("list").len(), 1);
    }

    #[test]
    fn sqlite_backed_index_round_trips() {
        let db = crate::db::Database::open_in_memory().expect("db");
        let index = LocalIndex::with_key(Arc::new(db), "recent");
        index.upsert_by_path(entry("a", "A", "/a")).expect("a");
        let entries = index.list().expect("list");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "A");
    }
}
