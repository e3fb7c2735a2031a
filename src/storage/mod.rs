// src/storage/mod.rs
// Storage module: one contract, three adapters, one selector.

pub mod filter_mod;
pub mod ipc_bridge;
pub mod mobile_adapter;
pub mod native_plugin;
pub mod object_store;
pub mod object_store_adapter;
pub mod relational;
pub mod schema_mod;
pub mod selector;
pub mod sql_builder;
pub mod sqlite_adapter;
mod sqlite_rows;
pub mod storage_mod;
pub mod validation_mod;

// Re-export main types and traits
pub use storage_mod::{
    record_id, transaction, BackendInfo, BackendKind, Capabilities, FilterOperator, QueryFilter, QueryOptions,
    Record, RecordId, SortCriteria, SortDirection, StorageAdapter, StorageError, TransactionScope, ID_FIELD,
};

pub use ipc_bridge::{IpcBridge, SqliteHost};
pub use mobile_adapter::MobileSqlAdapter;
pub use native_plugin::{NativeSqlitePlugin, PluginChanges, PluginError, SqlxSqlitePlugin};
pub use object_store::ObjectStore;
pub use object_store_adapter::ObjectStoreAdapter;
pub use schema_mod::{IndexConfig, StoreConfig, MIGRATIONS_TABLE};
pub use selector::{BackendSelector, RuntimeEnvironment};
pub use sqlite_adapter::DesktopSqlAdapter;
