//! Flat-file collection storage.
//!
//! Every collection is one JSON array on disk. Each operation does a full
//! read-modify-write with no locking, so two concurrent writers to the same
//! collection race and the last save wins.

use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::ident::{IdGenerator, ObjectIdGenerator};
use crate::models::{merge_fields, Collection, Item};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Invalid collection: {0}")]
    UnknownCollection(String),
    #[error("Item not found")]
    ItemNotFound(String),
    #[error("Storage unavailable for {collection}: {source}")]
    StorageUnavailable {
        collection: Collection,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    fn unavailable(collection: Collection) -> impl FnOnce(io::Error) -> StoreError {
        move |source| StoreError::StorageUnavailable { collection, source }
    }
}

/// Storage port for the collections.
///
/// Implementors provide whole-collection `load` and `save`; the CRUD
/// operations are built on top of those two and shared by every backend.
pub trait CollectionStore: Send + Sync {
    fn load(&self, collection: Collection) -> Result<Vec<Item>, StoreError>;

    fn save(&self, collection: Collection, items: &[Item]) -> Result<(), StoreError>;

    fn ids(&self) -> &dyn IdGenerator;

    fn list(&self, collection: Collection) -> Result<Vec<Item>, StoreError> {
        self.load(collection)
    }

    fn insert(
        &self,
        collection: Collection,
        fields: Map<String, Value>,
    ) -> Result<Item, StoreError> {
        let mut items = self.load(collection)?;
        let item = Item::new(&self.ids().generate(), Utc::now(), fields);
        items.push(item.clone());
        self.save(collection, &items)?;
        Ok(item)
    }

    fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: &Map<String, Value>,
    ) -> Result<Item, StoreError> {
        let mut items = self.load(collection)?;
        let slot = items
            .iter_mut()
            .find(|item| item.has_id(id))
            .ok_or_else(|| StoreError::ItemNotFound(id.to_string()))?;
        *slot = Item::from(merge_fields(slot.fields(), fields));
        let merged = slot.clone();
        self.save(collection, &items)?;
        Ok(merged)
    }

    fn delete(&self, collection: Collection, id: &str) -> Result<(), StoreError> {
        let mut items = self.load(collection)?;
        let before = items.len();
        items.retain(|item| !item.has_id(id));
        if items.len() == before {
            return Err(StoreError::ItemNotFound(id.to_string()));
        }
        self.save(collection, &items)
    }
}

/// Collections stored as `nsm-database.<name>.json` files in one directory.
pub struct FileStore {
    data_dir: PathBuf,
    ids: Box<dyn IdGenerator>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_generator(data_dir, ObjectIdGenerator)
    }

    pub fn with_generator(data_dir: impl Into<PathBuf>, ids: impl IdGenerator + 'static) -> Self {
        FileStore {
            data_dir: data_dir.into(),
            ids: Box::new(ids),
        }
    }

    pub fn path_for(&self, collection: Collection) -> PathBuf {
        self.data_dir.join(collection.file_name())
    }
}

impl CollectionStore for FileStore {
    fn load(&self, collection: Collection) -> Result<Vec<Item>, StoreError> {
        let path = self.path_for(collection);
        let bytes = fs::read(&path).map_err(StoreError::unavailable(collection))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::unavailable(collection)(io::Error::from(e)))
    }

    fn save(&self, collection: Collection, items: &[Item]) -> Result<(), StoreError> {
        let path = self.path_for(collection);
        let json = serde_json::to_vec_pretty(items)
            .map_err(|e| StoreError::unavailable(collection)(io::Error::from(e)))?;

        // Write next to the target and rename over it, so a crash never
        // leaves a truncated collection behind.
        let tmp = self.data_dir.join(format!(
            ".{}.{}.tmp",
            collection.file_name(),
            Uuid::new_v4().simple()
        ));
        let written = fs::write(&tmp, &json).and_then(|_| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::unavailable(collection)(e));
        }

        debug!(collection = %collection, items = items.len(), "Collection saved");
        Ok(())
    }

    fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }
}

/// In-memory store for tests. `load` hands out a snapshot and `save`
/// replaces the collection wholesale, same as the file backend.
pub struct MemoryStore {
    collections: Mutex<HashMap<Collection, Vec<Item>>>,
    ids: Box<dyn IdGenerator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_generator(ObjectIdGenerator)
    }

    pub fn with_generator(ids: impl IdGenerator + 'static) -> Self {
        let collections = Collection::ALL.into_iter().map(|c| (c, Vec::new())).collect();
        MemoryStore {
            collections: Mutex::new(collections),
            ids: Box::new(ids),
        }
    }

    fn poisoned(collection: Collection) -> StoreError {
        StoreError::unavailable(collection)(io::Error::other("memory store lock poisoned"))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore for MemoryStore {
    fn load(&self, collection: Collection) -> Result<Vec<Item>, StoreError> {
        let guard = self
            .collections
            .lock()
            .map_err(|_| Self::poisoned(collection))?;
        Ok(guard.get(&collection).cloned().unwrap_or_default())
    }

    fn save(&self, collection: Collection, items: &[Item]) -> Result<(), StoreError> {
        let mut guard = self
            .collections
            .lock()
            .map_err(|_| Self::poisoned(collection))?;
        guard.insert(collection, items.to_vec());
        Ok(())
    }

    fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::is_object_id;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tempfile::TempDir;

    struct Sequential(AtomicUsize);

    impl IdGenerator for Sequential {
        fn generate(&self) -> String {
            format!("{:024x}", self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn file_store() -> (TempDir, FileStore) {
        let tmp = tempfile::tempdir().unwrap();
        for collection in Collection::ALL {
            fs::write(tmp.path().join(collection.file_name()), "[]").unwrap();
        }
        let store = FileStore::new(tmp.path());
        (tmp, store)
    }

    #[test]
    fn insert_then_list_adds_exactly_one_item() {
        let (_tmp, store) = file_store();
        for collection in Collection::ALL {
            let before = store.list(collection).unwrap().len();
            let item = store
                .insert(collection, object(json!({ "name": "Asha" })))
                .unwrap();
            let after = store.list(collection).unwrap();

            assert_eq!(after.len(), before + 1);
            let id = item.id().unwrap();
            assert!(is_object_id(id));
            assert_eq!(after.iter().filter(|i| i.has_id(id)).count(), 1);
        }
    }

    #[test]
    fn list_keeps_file_order() {
        let store = MemoryStore::with_generator(Sequential(AtomicUsize::new(0)));
        for title in ["first", "second", "third"] {
            store
                .insert(Collection::Materials, object(json!({ "title": title })))
                .unwrap();
        }
        let titles: Vec<_> = store
            .list(Collection::Materials)
            .unwrap()
            .into_iter()
            .map(|i| i.get("title").cloned().unwrap())
            .collect();
        assert_eq!(titles, [json!("first"), json!("second"), json!("third")]);
    }

    #[test]
    fn update_merges_shallowly_and_keeps_id() {
        let store = MemoryStore::new();
        let item = store
            .insert(
                Collection::Coordinators,
                object(json!({ "name": "Asha", "email": "asha@example.org" })),
            )
            .unwrap();
        let id = item.id().unwrap().to_string();

        let patch = object(json!({
            "_id": { "$oid": "ffffffffffffffffffffffff" },
            "name": "Asha K",
            "url": "https://example.org/asha"
        }));
        let updated = store.update(Collection::Coordinators, &id, &patch).unwrap();

        assert_eq!(updated.id(), Some(id.as_str()));
        assert_eq!(updated.get("name"), Some(&json!("Asha K")));
        assert_eq!(updated.get("email"), Some(&json!("asha@example.org")));
        assert_eq!(updated.get("url"), Some(&json!("https://example.org/asha")));
        assert_eq!(updated.created_at(), item.created_at());
        assert_eq!(store.list(Collection::Coordinators).unwrap(), vec![updated]);
    }

    #[test]
    fn update_does_not_bump_version() {
        let store = MemoryStore::new();
        let item = store
            .insert(Collection::Events, object(json!({ "title": "A" })))
            .unwrap();
        let updated = store
            .update(Collection::Events, item.id().unwrap(), &object(json!({ "title": "B" })))
            .unwrap();
        assert_eq!(updated.get("__v"), Some(&json!(0)));
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update(Collection::Events, "000000000000000000000000", &Map::new())
            .unwrap_err();
        assert!(matches!(err, StoreError::ItemNotFound(_)));
    }

    #[test]
    fn delete_unknown_id_leaves_file_untouched() {
        let (tmp, store) = file_store();
        store
            .insert(Collection::Events, object(json!({ "title": "Kept" })))
            .unwrap();
        let path = tmp.path().join(Collection::Events.file_name());
        let before = fs::read(&path).unwrap();

        let err = store
            .delete(Collection::Events, "000000000000000000000000")
            .unwrap_err();

        assert!(matches!(err, StoreError::ItemNotFound(_)));
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn delete_removes_the_item() {
        let store = MemoryStore::new();
        let keep = store
            .insert(Collection::SisterNodals, object(json!({ "name": "keep" })))
            .unwrap();
        let drop = store
            .insert(Collection::SisterNodals, object(json!({ "name": "drop" })))
            .unwrap();

        store
            .delete(Collection::SisterNodals, drop.id().unwrap())
            .unwrap();

        assert_eq!(store.list(Collection::SisterNodals).unwrap(), vec![keep]);
    }

    #[test]
    fn missing_file_is_storage_unavailable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        let err = store.list(Collection::Events).unwrap_err();
        assert!(matches!(
            err,
            StoreError::StorageUnavailable { collection: Collection::Events, .. }
        ));
    }

    #[test]
    fn corrupt_file_is_storage_unavailable() {
        let (tmp, store) = file_store();
        fs::write(tmp.path().join(Collection::Events.file_name()), "[{").unwrap();
        let err = store.list(Collection::Events).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
    }

    #[test]
    fn saved_file_is_pretty_json_without_leftover_temp_files() {
        let (tmp, store) = file_store();
        store
            .insert(Collection::ImportantLinks, object(json!({ "title": "NSM" })))
            .unwrap();

        let path = tmp.path().join(Collection::ImportantLinks.file_name());
        let raw = fs::read_to_string(path).unwrap();
        assert!(raw.starts_with("[\n  {\n    \"_id\": {\n      \"$oid\""));

        let leftovers = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    /// Holds every `load` until both writers have read, forcing the
    /// read-read-write-write interleaving.
    struct Interleaved<S> {
        inner: S,
        gate: Barrier,
    }

    impl<S: CollectionStore> CollectionStore for Interleaved<S> {
        fn load(&self, collection: Collection) -> Result<Vec<Item>, StoreError> {
            let items = self.inner.load(collection)?;
            self.gate.wait();
            Ok(items)
        }

        fn save(&self, collection: Collection, items: &[Item]) -> Result<(), StoreError> {
            self.inner.save(collection, items)
        }

        fn ids(&self) -> &dyn IdGenerator {
            self.inner.ids()
        }
    }

    #[test]
    fn concurrent_inserts_are_last_write_wins() {
        let (_tmp, inner) = file_store();
        let store = Interleaved {
            inner,
            gate: Barrier::new(2),
        };

        let (a, b) = std::thread::scope(|s| {
            let a = s.spawn(|| store.insert(Collection::Events, object(json!({ "title": "A" }))));
            let b = s.spawn(|| store.insert(Collection::Events, object(json!({ "title": "B" }))));
            (a.join().unwrap(), b.join().unwrap())
        });

        // Both writers report success, yet only one item survives.
        let a = a.unwrap();
        let b = b.unwrap();
        let items = store.inner.list(Collection::Events).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0] == a || items[0] == b);
    }

    #[test]
    fn interleaved_saves_drop_the_first_writer() {
        let store = MemoryStore::new();
        let mut first = store.load(Collection::Events).unwrap();
        let mut second = store.load(Collection::Events).unwrap();

        first.push(Item::new("aaaaaaaaaaaaaaaaaaaaaaaa", Utc::now(), Map::new()));
        store.save(Collection::Events, &first).unwrap();
        second.push(Item::new("bbbbbbbbbbbbbbbbbbbbbbbb", Utc::now(), Map::new()));
        store.save(Collection::Events, &second).unwrap();

        let ids: Vec<_> = store
            .list(Collection::Events)
            .unwrap()
            .iter()
            .filter_map(|i| i.id().map(str::to_string))
            .collect();
        assert_eq!(ids, ["bbbbbbbbbbbbbbbbbbbbbbbb"]);
    }
}
