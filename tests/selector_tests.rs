use std::sync::Arc;

use ledgerbook::storage::{
    BackendKind, BackendSelector, DesktopSqlAdapter, MobileSqlAdapter, RuntimeEnvironment, SqliteHost,
    SqlxSqlitePlugin, StorageAdapter, StorageError,
};

#[tokio::test]
async fn detection_prefers_plugin_then_host_then_object_store() {
    let (bridge, _host) = SqliteHost::spawn(":memory:").await.unwrap();
    let plugin = Arc::new(SqlxSqlitePlugin::in_memory());

    let bare = RuntimeEnvironment::in_process("detect");
    assert_eq!(bare.detect(), BackendKind::ObjectStore);

    let desktop = bare.clone().with_host_bridge(bridge);
    assert_eq!(desktop.detect(), BackendKind::DesktopSql);

    let mobile = desktop.with_native_plugin(plugin);
    assert_eq!(mobile.detect(), BackendKind::MobileSql);
}

#[tokio::test]
async fn selector_memoizes_one_initialized_adapter() {
    let (bridge, _host) = SqliteHost::spawn(":memory:").await.unwrap();
    let selector = BackendSelector::new(RuntimeEnvironment::in_process("memo").with_host_bridge(bridge));
    assert_eq!(selector.selected(), None);

    let first = selector.adapter().await.unwrap();
    let second = selector.adapter().await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(selector.selected(), Some(BackendKind::DesktopSql));

    // Initialized: usable without another initialize() call.
    first.execute_script("CREATE TABLE notes (id INTEGER PRIMARY KEY AUTOINCREMENT, body TEXT)").await.unwrap();
}

#[tokio::test]
async fn separate_selectors_are_independent() {
    let a = BackendSelector::new(RuntimeEnvironment::in_process("one"));
    let b = BackendSelector::new(RuntimeEnvironment::in_process("two"));

    let adapter_a = a.adapter().await.unwrap();
    let adapter_b = b.adapter().await.unwrap();
    assert!(!Arc::ptr_eq(&adapter_a, &adapter_b));
    assert_eq!(adapter_a.kind(), BackendKind::ObjectStore);
}

#[tokio::test]
async fn failed_initialization_is_reported_and_not_memoized() {
    let (bridge, host) = SqliteHost::spawn(":memory:").await.unwrap();
    bridge.close().await.unwrap();
    host.await.unwrap();

    let selector = BackendSelector::new(RuntimeEnvironment::in_process("gone").with_host_bridge(bridge));
    let err = selector.adapter().await.err().expect("closed host must not initialize");
    assert!(matches!(err, StorageError::EnvironmentMismatch { .. }), "{:?}", err);
    assert_eq!(selector.selected(), None);
}

#[tokio::test]
async fn desktop_adapter_without_a_host_is_an_environment_mismatch() {
    let adapter = DesktopSqlAdapter::detached();
    let err = adapter.initialize().await.unwrap_err();
    assert!(matches!(err, StorageError::EnvironmentMismatch { .. }), "{:?}", err);
}

#[tokio::test]
async fn mobile_plugin_without_storage_directory_rejects_file_databases() {
    let adapter = MobileSqlAdapter::new(Arc::new(SqlxSqlitePlugin::in_memory()), "ledgerbook");
    let err = adapter.initialize().await.unwrap_err();
    assert!(matches!(err, StorageError::EnvironmentMismatch { .. }), "{:?}", err);
}

#[tokio::test]
async fn mobile_plugin_opens_named_database_files() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = Arc::new(SqlxSqlitePlugin::new(Some(dir.path().to_path_buf())));
    let adapter = MobileSqlAdapter::new(plugin, "ledgerbook");

    let info = adapter.initialize().await.unwrap();
    assert_eq!(info.kind, BackendKind::MobileSql);
    assert!(info.capabilities.atomic_transactions);
    assert!(dir.path().join("ledgerbook.db").exists());
    adapter.close().await.unwrap();
}
