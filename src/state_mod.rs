// src/state_mod.rs
// Application state: one selected adapter plus the services built on it.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::config_mod::{AppConfig, BackendPreference};
use crate::ledger_mod::LedgerService;
use crate::migrations::{MigrationReport, MigrationRunner};
use crate::sequence_mod::DocumentNumberGenerator;
use crate::storage::{
    BackendKind, BackendSelector, Capabilities, RuntimeEnvironment, SqliteHost, SqlxSqlitePlugin, StorageAdapter,
    StorageError,
};

/// Shared AppState handle used by the command surface
pub type AppStateType = Arc<RwLock<AppState>>;

pub struct AppState {
    pub config: AppConfig,
    pub selector: Arc<BackendSelector>,
    pub storage: Arc<dyn StorageAdapter>,
    pub numbers: Arc<DocumentNumberGenerator>,
    pub ledger: Arc<LedgerService>,
    pub migration_report: MigrationReport,
    pub started_at: chrono::DateTime<chrono::Utc>,
    host_task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("backend", &self.storage.kind())
            .field("migration_report", &self.migration_report)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub app_name: String,
    pub version: String,
    pub backend: BackendKind,
    pub capabilities: Capabilities,
    pub migrations_applied: Vec<u32>,
    pub migrations_satisfied_natively: Vec<u32>,
    pub migrations_previously_applied: Vec<u32>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Initialization failed: {reason}")]
    InitializationFailed { reason: String },
}

impl AppState {
    /// Bring up the environment the configuration asks for, then bootstrap on it.
    pub async fn from_config(config: AppConfig) -> Result<Self, AppStateError> {
        let (environment, host_task) = build_environment(&config).await?;
        let mut state = Self::bootstrap(config, environment).await?;
        state.host_task = host_task;
        Ok(state)
    }

    /// Select and initialize the adapter, migrate it, and wire the services.
    pub async fn bootstrap(config: AppConfig, environment: RuntimeEnvironment) -> Result<Self, AppStateError> {
        let selector = Arc::new(BackendSelector::new(environment));
        let storage = selector.adapter().await?;

        let migration_report = MigrationRunner::new(storage.clone()).run().await?;

        let numbers = Arc::new(DocumentNumberGenerator::with_max_retries(
            storage.clone(),
            config.numbering.max_retries,
        ));
        let ledger = Arc::new(LedgerService::new(storage.clone(), numbers.clone()));

        tracing::info!(
            app = %config.app_name,
            backend = %storage.kind(),
            migrations_applied = migration_report.newly_recorded(),
            "application state ready"
        );

        Ok(Self {
            config,
            selector,
            storage,
            numbers,
            ledger,
            migration_report,
            started_at: chrono::Utc::now(),
            host_task: None,
        })
    }

    pub fn into_shared(self) -> AppStateType {
        Arc::new(RwLock::new(self))
    }

    pub fn system_status(&self) -> SystemStatus {
        let info = self.storage.backend_info();
        SystemStatus {
            app_name: self.config.app_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: info.kind,
            capabilities: info.capabilities,
            migrations_applied: self.migration_report.applied.clone(),
            migrations_satisfied_natively: self.migration_report.satisfied_natively.clone(),
            migrations_previously_applied: self.migration_report.previously_applied.clone(),
            started_at: self.started_at,
        }
    }

    /// Close the adapter and wait for the desktop host, if this state spawned one.
    pub async fn shutdown(&mut self) -> Result<(), AppStateError> {
        self.storage.close().await?;
        if let Some(task) = self.host_task.take() {
            task.await.map_err(|e| AppStateError::InitializationFailed {
                reason: format!("storage host task failed: {}", e),
            })?;
        }
        tracing::info!(backend = %self.storage.kind(), "application state shut down");
        Ok(())
    }
}

/// `Auto` resolves to the desktop host: this binary always runs with one.
async fn build_environment(config: &AppConfig) -> Result<(RuntimeEnvironment, Option<JoinHandle<()>>), AppStateError> {
    let storage = &config.storage;
    let environment = RuntimeEnvironment::in_process(storage.database_name.clone());

    match storage.backend {
        BackendPreference::Auto | BackendPreference::Desktop => {
            let (bridge, task) = SqliteHost::spawn(&storage.database_path).await?;
            Ok((environment.with_host_bridge(bridge), Some(task)))
        }
        BackendPreference::Mobile => {
            let plugin = SqlxSqlitePlugin::new(storage.mobile_data_dir.as_ref().map(PathBuf::from));
            Ok((environment.with_native_plugin(Arc::new(plugin)), None))
        }
        BackendPreference::ObjectStore => Ok((environment, None)),
    }
}
