// src/storage/object_store_adapter.rs
// Storage contract over the embedded object store. No query language: the
// whole collection is materialized and filtered/sorted/paginated in memory.
// No transactions: every write commits on its own.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use super::filter_mod::{apply_query, conform_filters, count_matching, merge_records};
use super::object_store::ObjectStore;
use super::schema_mod::{object_store_schema, StoreConfig};
use super::storage_mod::ensure_no_id;
use super::{
    BackendInfo, BackendKind, Capabilities, QueryFilter, QueryOptions, Record, RecordId, StorageAdapter,
    StorageError,
};

pub struct ObjectStoreAdapter {
    store: ObjectStore,
    schema: Vec<(String, StoreConfig)>,
    ready: AtomicBool,
}

impl ObjectStoreAdapter {
    /// Adapter over `store` declaring the application's full schema.
    pub fn new(store: ObjectStore) -> Self {
        Self::with_schema(store, object_store_schema())
    }

    pub fn with_schema(store: ObjectStore, schema: Vec<(String, StoreConfig)>) -> Self {
        Self {
            store,
            schema,
            ready: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized {
                backend: BackendKind::ObjectStore.name().to_string(),
            })
        }
    }

    fn unsupported(operation: &str) -> StorageError {
        StorageError::UnsupportedOperation {
            backend: BackendKind::ObjectStore.name().to_string(),
            operation: operation.to_string(),
        }
    }
}

#[async_trait]
impl StorageAdapter for ObjectStoreAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::OBJECT_STORE
    }

    async fn initialize(&self) -> Result<BackendInfo, StorageError> {
        self.store.open(&self.schema).await?;
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(db_name = %self.store.name(), "object store adapter initialized");
        Ok(self.backend_info())
    }

    async fn insert(&self, table: &str, record: Record) -> Result<RecordId, StorageError> {
        self.ensure_ready()?;
        ensure_no_id(&record, "insert")?;
        self.store.add(table, record).await
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> Result<Vec<RecordId>, StorageError> {
        self.ensure_ready()?;
        // Sequential and non-atomic: records added before a failure stay.
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            ensure_no_id(&record, "insert")?;
            ids.push(self.store.add(table, record).await?);
        }
        Ok(ids)
    }

    async fn update(&self, table: &str, id: RecordId, partial: Record) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        ensure_no_id(&partial, "update")?;
        // Read-modify-write: putting `partial` alone would drop every other field.
        let existing = match self.store.get(table, id).await? {
            Some(existing) => existing,
            None => return Ok(false),
        };
        self.store.put(table, id, merge_records(existing, partial)).await?;
        Ok(true)
    }

    async fn delete(&self, table: &str, id: RecordId) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        self.store.delete(table, id).await
    }

    async fn find_by_id(&self, table: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.ensure_ready()?;
        self.store.get(table, id).await
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> Result<Vec<Record>, StorageError> {
        self.ensure_ready()?;
        let config = self.store.config(table).await?;
        let options = QueryOptions {
            filters: conform_filters(&options.filters, &config),
            ..options.clone()
        };
        let records = self.store.get_all(table).await?;
        apply_query(records, &options)
    }

    async fn count(&self, table: &str, filters: &[QueryFilter]) -> Result<u64, StorageError> {
        self.ensure_ready()?;
        if filters.is_empty() {
            return self.store.count(table).await;
        }
        let config = self.store.config(table).await?;
        let filters = conform_filters(filters, &config);
        let records = self.store.get_all(table).await?;
        count_matching(&records, &filters)
    }

    async fn query(&self, _sql: &str, _params: &[Value]) -> Result<Vec<Record>, StorageError> {
        Err(Self::unsupported("query"))
    }

    async fn execute_script(&self, _script: &str) -> Result<(), StorageError> {
        Err(Self::unsupported("execute_script"))
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.ensure_ready()
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.ensure_ready()
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.ensure_ready()
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.ready.swap(false, Ordering::SeqCst) {
            self.store.close().await;
            tracing::info!(db_name = %self.store.name(), "object store adapter closed");
        }
        Ok(())
    }
}
