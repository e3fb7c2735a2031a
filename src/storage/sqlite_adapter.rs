// src/storage/sqlite_adapter.rs
// Desktop adapter: SQLite owned by the privileged host, reached over the IPC bridge.

use async_trait::async_trait;

use super::ipc_bridge::IpcBridge;
use super::relational::{ExecOutcome, RelationalAdapter, SqlChannel};
use super::sql_builder::SqlStatement;
use super::{BackendKind, Record, StorageError};

/// SQLite reached through the privileged host. Real transactions: BEGIN,
/// COMMIT and ROLLBACK run on the host's single connection.
pub type DesktopSqlAdapter = RelationalAdapter<IpcChannel>;

/// Desktop transport: every statement is a request over the IPC bridge.
pub struct IpcChannel {
    bridge: Option<IpcBridge>,
}

impl DesktopSqlAdapter {
    pub fn new(bridge: IpcBridge) -> Self {
        RelationalAdapter::with_channel(IpcChannel { bridge: Some(bridge) })
    }

    /// An adapter with no host behind it. `initialize()` refuses to run,
    /// which is how a misconfigured environment surfaces.
    pub fn detached() -> Self {
        RelationalAdapter::with_channel(IpcChannel { bridge: None })
    }
}

impl IpcChannel {
    fn bridge(&self) -> Result<&IpcBridge, StorageError> {
        self.bridge.as_ref().ok_or_else(|| StorageError::EnvironmentMismatch {
            backend: BackendKind::DesktopSql.name().to_string(),
            reason: "privileged host bridge not present; use the object store".to_string(),
        })
    }
}

#[async_trait]
impl SqlChannel for IpcChannel {
    fn kind(&self) -> BackendKind {
        BackendKind::DesktopSql
    }

    async fn probe(&self) -> Result<(), StorageError> {
        self.bridge()?.ping().await
    }

    async fn execute(&self, statement: SqlStatement) -> Result<ExecOutcome, StorageError> {
        tracing::debug!(sql = %statement.sql, "ipc execute");
        self.bridge()?.execute(statement.sql, statement.params).await
    }

    async fn select(&self, statement: SqlStatement) -> Result<Vec<Record>, StorageError> {
        tracing::debug!(sql = %statement.sql, "ipc select");
        self.bridge()?.select(statement.sql, statement.params).await
    }

    async fn execute_script(&self, script: &str) -> Result<(), StorageError> {
        self.bridge()?.execute_script(script.to_string()).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let bridge = self.bridge()?;
        if bridge.is_closed() {
            return Ok(());
        }
        bridge.close().await
    }
}
