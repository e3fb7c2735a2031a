// src/storage/selector.rs
// Picks exactly one adapter for the lifetime of the selector.

use std::sync::Arc;

use tokio::sync::OnceCell;

use super::ipc_bridge::IpcBridge;
use super::mobile_adapter::MobileSqlAdapter;
use super::native_plugin::NativeSqlitePlugin;
use super::object_store::ObjectStore;
use super::object_store_adapter::ObjectStoreAdapter;
use super::sqlite_adapter::DesktopSqlAdapter;
use super::{BackendKind, StorageAdapter, StorageError};

/// What the running process has access to.
#[derive(Clone)]
pub struct RuntimeEnvironment {
    pub native_plugin: Option<Arc<dyn NativeSqlitePlugin>>,
    pub host_bridge: Option<IpcBridge>,
    pub database_name: String,
    pub object_store: ObjectStore,
}

impl std::fmt::Debug for RuntimeEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeEnvironment")
            .field("native_plugin", &self.native_plugin.as_ref().map(|p| p.platform().to_string()))
            .field("host_bridge", &self.host_bridge.is_some())
            .field("database_name", &self.database_name)
            .finish()
    }
}

impl RuntimeEnvironment {
    /// Neither bridge present: the in-process object store is all there is.
    pub fn in_process(database_name: impl Into<String>) -> Self {
        let database_name = database_name.into();
        Self {
            native_plugin: None,
            host_bridge: None,
            object_store: ObjectStore::new(database_name.clone()),
            database_name,
        }
    }

    pub fn with_host_bridge(mut self, bridge: IpcBridge) -> Self {
        self.host_bridge = Some(bridge);
        self
    }

    pub fn with_native_plugin(mut self, plugin: Arc<dyn NativeSqlitePlugin>) -> Self {
        self.native_plugin = Some(plugin);
        self
    }

    /// Native plugin first, then the privileged host, then the object store.
    pub fn detect(&self) -> BackendKind {
        if self.native_plugin.is_some() {
            BackendKind::MobileSql
        } else if self.host_bridge.is_some() {
            BackendKind::DesktopSql
        } else {
            BackendKind::ObjectStore
        }
    }

    fn build_adapter(&self) -> Arc<dyn StorageAdapter> {
        match (self.detect(), &self.native_plugin, &self.host_bridge) {
            (BackendKind::MobileSql, Some(plugin), _) => {
                Arc::new(MobileSqlAdapter::new(plugin.clone(), self.database_name.clone()))
            }
            (BackendKind::DesktopSql, _, Some(bridge)) => Arc::new(DesktopSqlAdapter::new(bridge.clone())),
            _ => Arc::new(ObjectStoreAdapter::new(self.object_store.clone())),
        }
    }
}

/// Detects once, initializes once, then hands out the same adapter.
pub struct BackendSelector {
    environment: RuntimeEnvironment,
    adapter: OnceCell<Arc<dyn StorageAdapter>>,
}

impl BackendSelector {
    pub fn new(environment: RuntimeEnvironment) -> Self {
        Self {
            environment,
            adapter: OnceCell::new(),
        }
    }

    pub fn environment(&self) -> &RuntimeEnvironment {
        &self.environment
    }

    /// The memoized, initialized adapter. A failed initialization is not
    /// memoized, so the next call retries.
    pub async fn adapter(&self) -> Result<Arc<dyn StorageAdapter>, StorageError> {
        self.adapter
            .get_or_try_init(|| async {
                let adapter = self.environment.build_adapter();
                let info = adapter.initialize().await?;
                tracing::info!(
                    backend = %info.kind,
                    sql = info.capabilities.sql,
                    atomic_transactions = info.capabilities.atomic_transactions,
                    "storage backend selected"
                );
                Ok::<_, StorageError>(adapter)
            })
            .await
            .cloned()
    }

    /// Kind of the memoized adapter, if one has been selected.
    pub fn selected(&self) -> Option<BackendKind> {
        self.adapter.get().map(|adapter| adapter.kind())
    }
}
