// src/storage/mobile_adapter.rs
// SQLite reached through a native plugin. Same SQL and transaction
// semantics as the desktop adapter; only the transport differs.

use std::sync::Arc;

use async_trait::async_trait;

use super::native_plugin::{NativeSqlitePlugin, PluginError};
use super::relational::{ExecOutcome, RelationalAdapter, SqlChannel};
use super::sql_builder::SqlStatement;
use super::{BackendKind, Record, StorageError};

pub type MobileSqlAdapter = RelationalAdapter<PluginChannel>;

pub struct PluginChannel {
    plugin: Arc<dyn NativeSqlitePlugin>,
    database: String,
}

impl MobileSqlAdapter {
    pub fn new(plugin: Arc<dyn NativeSqlitePlugin>, database: impl Into<String>) -> Self {
        RelationalAdapter::with_channel(PluginChannel {
            plugin,
            database: database.into(),
        })
    }
}

impl PluginChannel {
    pub fn database(&self) -> &str {
        &self.database
    }
}

impl From<PluginError> for StorageError {
    fn from(error: PluginError) -> Self {
        let backend = BackendKind::MobileSql.name().to_string();
        match error {
            PluginError::Constraint(error) => StorageError::ConstraintViolation { backend, error },
            PluginError::Unavailable(reason) => StorageError::EnvironmentMismatch { backend, reason },
            PluginError::NotOpen(database) => StorageError::DatabaseUnavailable {
                reason: format!("plugin database '{}' is not open", database),
            },
            PluginError::Sql(error) => StorageError::BackendError { backend, error },
        }
    }
}

#[async_trait]
impl SqlChannel for PluginChannel {
    fn kind(&self) -> BackendKind {
        BackendKind::MobileSql
    }

    async fn probe(&self) -> Result<(), StorageError> {
        if !self.plugin.is_available().await {
            return Err(StorageError::EnvironmentMismatch {
                backend: BackendKind::MobileSql.name().to_string(),
                reason: format!("native plugin '{}' not available", self.plugin.platform()),
            });
        }
        self.plugin.open(&self.database).await?;
        Ok(())
    }

    async fn execute(&self, statement: SqlStatement) -> Result<ExecOutcome, StorageError> {
        tracing::debug!(database = %self.database, sql = %statement.sql, "plugin run");
        let changes = self
            .plugin
            .run(&self.database, &statement.sql, &statement.params)
            .await?;
        Ok(ExecOutcome {
            rows_affected: changes.changes,
            last_insert_id: changes.last_id,
        })
    }

    async fn select(&self, statement: SqlStatement) -> Result<Vec<Record>, StorageError> {
        tracing::debug!(database = %self.database, sql = %statement.sql, "plugin query");
        Ok(self
            .plugin
            .query(&self.database, &statement.sql, &statement.params)
            .await?)
    }

    async fn execute_script(&self, script: &str) -> Result<(), StorageError> {
        self.plugin.execute(&self.database, script).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(self.plugin.close(&self.database).await?)
    }
}
