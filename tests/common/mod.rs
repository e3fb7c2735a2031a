// Shared helpers for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;

use ledgerbook::migrations::MigrationRunner;
use ledgerbook::storage::{
    DesktopSqlAdapter, MobileSqlAdapter, ObjectStore, ObjectStoreAdapter, Record, SqliteHost, SqlxSqlitePlugin,
    StorageAdapter,
};

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}

/// Desktop adapter over a fresh in-memory host. Not migrated.
pub async fn desktop() -> Arc<dyn StorageAdapter> {
    let (bridge, _host) = SqliteHost::spawn(":memory:").await.expect("spawn sqlite host");
    let adapter: Arc<dyn StorageAdapter> = Arc::new(DesktopSqlAdapter::new(bridge));
    adapter.initialize().await.expect("initialize desktop adapter");
    adapter
}

/// Mobile adapter over a private in-memory database. Not migrated.
pub async fn mobile() -> Arc<dyn StorageAdapter> {
    let plugin = Arc::new(SqlxSqlitePlugin::in_memory());
    let adapter: Arc<dyn StorageAdapter> = Arc::new(MobileSqlAdapter::new(plugin, ":memory:"));
    adapter.initialize().await.expect("initialize mobile adapter");
    adapter
}

/// Object-store adapter over a fresh store. Collections are declared on open.
pub async fn object_store() -> Arc<dyn StorageAdapter> {
    let adapter: Arc<dyn StorageAdapter> = Arc::new(ObjectStoreAdapter::new(ObjectStore::new("ledgerbook-test")));
    adapter.initialize().await.expect("initialize object store adapter");
    adapter
}

pub async fn migrated(adapter: Arc<dyn StorageAdapter>) -> Arc<dyn StorageAdapter> {
    MigrationRunner::new(adapter.clone()).run().await.expect("run migrations");
    adapter
}

/// One migrated adapter per backend: desktop, mobile, object store.
pub async fn all_backends() -> Vec<Arc<dyn StorageAdapter>> {
    vec![
        migrated(desktop().await).await,
        migrated(mobile().await).await,
        migrated(object_store().await).await,
    ]
}

/// The two relational backends, migrated.
pub async fn relational_backends() -> Vec<Arc<dyn StorageAdapter>> {
    vec![migrated(desktop().await).await, migrated(mobile().await).await]
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records
        .iter()
        .map(|r| r.get("id").and_then(Value::as_i64).expect("record without id"))
        .collect()
}
