// src/storage/object_store.rs
// Embedded key-value object store. Collections and their indexes are
// declared when the database is opened; each operation commits on its own.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::schema_mod::StoreConfig;
use super::{Record, RecordId, StorageError, ID_FIELD};

const BACKEND: &str = "object-store";

#[derive(Debug)]
struct Collection {
    config: StoreConfig,
    next_key: RecordId,
    records: BTreeMap<RecordId, Record>,
}

impl Collection {
    fn new(config: StoreConfig) -> Self {
        Self {
            config,
            next_key: 1,
            records: BTreeMap::new(),
        }
    }

    /// Convert declared columns the way SQLite's column affinity would.
    fn conform(&self, record: Record) -> Record {
        record
            .into_iter()
            .map(|(field, value)| {
                let value = match self.config.affinity(&field) {
                    Some(affinity) => affinity.apply(&value),
                    None => value,
                };
                (field, value)
            })
            .collect()
    }

    /// Unique indexes skip records whose key is missing or null.
    fn check_unique(&self, key: RecordId, record: &Record) -> Result<(), StorageError> {
        for field in self.config.unique_fields() {
            let value = match record.get(field) {
                Some(Value::Null) | None => continue,
                Some(value) => value,
            };
            let conflict = self
                .records
                .iter()
                .any(|(other_key, other)| *other_key != key && other.get(field) == Some(value));
            if conflict {
                return Err(StorageError::ConstraintViolation {
                    backend: BACKEND.to_string(),
                    error: format!("unique index '{}' already contains {}", field, value),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Database {
    open: bool,
    collections: HashMap<String, Collection>,
}

/// Handle to one named object-store database. Clones share the same data,
/// the way two windows share one browser profile.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    name: String,
    inner: Arc<RwLock<Database>>,
}

impl ObjectStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(Database::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the database, declaring any collection not yet present.
    pub async fn open(&self, schema: &[(String, StoreConfig)]) -> Result<(), StorageError> {
        let mut db = self.inner.write().await;
        for (name, config) in schema {
            if config.key_path != ID_FIELD || !config.auto_increment {
                return Err(StorageError::BackendError {
                    backend: BACKEND.to_string(),
                    error: format!("collection '{}' must use an auto-incremented '{}' key", name, ID_FIELD),
                });
            }
            db.collections
                .entry(name.clone())
                .or_insert_with(|| Collection::new(config.clone()));
        }
        db.open = true;
        tracing::info!(db_name = %self.name, collections = db.collections.len(), "object store opened");
        Ok(())
    }

    pub async fn close(&self) {
        self.inner.write().await.open = false;
    }

    pub async fn is_open(&self) -> bool {
        self.inner.read().await.open
    }

    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().await.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Store a new record under the next key and return that key.
    pub async fn add(&self, collection: &str, record: Record) -> Result<RecordId, StorageError> {
        let mut db = self.inner.write().await;
        let store = collection_mut(&mut db, collection)?;
        let mut record = store.conform(record);
        let key = store.next_key;
        store.check_unique(key, &record)?;
        record.insert(ID_FIELD.to_string(), Value::from(key));
        store.records.insert(key, record);
        store.next_key += 1;
        Ok(key)
    }

    /// Replace the record stored under `key`.
    pub async fn put(&self, collection: &str, key: RecordId, record: Record) -> Result<(), StorageError> {
        let mut db = self.inner.write().await;
        let store = collection_mut(&mut db, collection)?;
        let mut record = store.conform(record);
        store.check_unique(key, &record)?;
        record.insert(ID_FIELD.to_string(), Value::from(key));
        store.records.insert(key, record);
        if key >= store.next_key {
            store.next_key = key + 1;
        }
        Ok(())
    }

    /// Declaration the collection was opened with.
    pub async fn config(&self, collection: &str) -> Result<StoreConfig, StorageError> {
        let db = self.inner.read().await;
        Ok(collection_ref(&db, collection)?.config.clone())
    }

    pub async fn get(&self, collection: &str, key: RecordId) -> Result<Option<Record>, StorageError> {
        let db = self.inner.read().await;
        Ok(collection_ref(&db, collection)?.records.get(&key).cloned())
    }

    pub async fn delete(&self, collection: &str, key: RecordId) -> Result<bool, StorageError> {
        let mut db = self.inner.write().await;
        Ok(collection_mut(&mut db, collection)?.records.remove(&key).is_some())
    }

    /// Every record, in key order.
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Record>, StorageError> {
        let db = self.inner.read().await;
        Ok(collection_ref(&db, collection)?.records.values().cloned().collect())
    }

    pub async fn count(&self, collection: &str) -> Result<u64, StorageError> {
        let db = self.inner.read().await;
        Ok(collection_ref(&db, collection)?.records.len() as u64)
    }
}

fn ensure_open(db: &Database) -> Result<(), StorageError> {
    if db.open {
        Ok(())
    } else {
        Err(StorageError::DatabaseUnavailable {
            reason: "object store is not open".to_string(),
        })
    }
}

fn collection_ref<'a>(db: &'a Database, name: &str) -> Result<&'a Collection, StorageError> {
    ensure_open(db)?;
    db.collections.get(name).ok_or_else(|| StorageError::TableNotFound {
        table: name.to_string(),
    })
}

fn collection_mut<'a>(db: &'a mut Database, name: &str) -> Result<&'a mut Collection, StorageError> {
    ensure_open(db)?;
    db.collections.get_mut(name).ok_or_else(|| StorageError::TableNotFound {
        table: name.to_string(),
    })
}
