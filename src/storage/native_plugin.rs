// src/storage/native_plugin.rs
// Native SQLite plugin surface used by the mobile adapter, plus an
// in-process implementation over sqlx.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use tokio::sync::Mutex;

use super::sql_builder::split_script;
use super::sqlite_rows::{bind_values, is_constraint_error, row_to_record};
use super::Record;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("plugin unavailable: {0}")]
    Unavailable(String),

    #[error("database not open: {0}")]
    NotOpen(String),

    #[error("constraint failed: {0}")]
    Constraint(String),

    #[error("sql error: {0}")]
    Sql(String),
}

impl PluginError {
    fn from_sqlx(error: sqlx::Error) -> Self {
        if is_constraint_error(&error) {
            PluginError::Constraint(error.to_string())
        } else {
            PluginError::Sql(error.to_string())
        }
    }
}

/// Change summary returned by write calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginChanges {
    pub changes: u64,
    pub last_id: i64,
}

/// The bridge a mobile host exposes to its SQLite engine. Every call names
/// the database it targets.
#[async_trait]
pub trait NativeSqlitePlugin: Send + Sync {
    fn platform(&self) -> &str;

    async fn is_available(&self) -> bool;

    async fn open(&self, database: &str) -> Result<(), PluginError>;

    /// Run a multi-statement script.
    async fn execute(&self, database: &str, statements: &str) -> Result<PluginChanges, PluginError>;

    /// Run one parameterized write statement.
    async fn run(&self, database: &str, statement: &str, values: &[Value]) -> Result<PluginChanges, PluginError>;

    async fn query(&self, database: &str, statement: &str, values: &[Value]) -> Result<Vec<Record>, PluginError>;

    async fn close(&self, database: &str) -> Result<(), PluginError>;
}

/// `NativeSqlitePlugin` backed by sqlx connections, one per database name.
/// `:memory:` opens a private in-memory database.
pub struct SqlxSqlitePlugin {
    base_dir: Option<PathBuf>,
    connections: Mutex<HashMap<String, SqliteConnection>>,
}

impl SqlxSqlitePlugin {
    /// Databases live as `<base_dir>/<name>.db`; without a base dir only
    /// `:memory:` can be opened.
    pub fn new(base_dir: Option<PathBuf>) -> Self {
        Self {
            base_dir,
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    fn options_for(&self, database: &str) -> Result<SqliteConnectOptions, PluginError> {
        if database == ":memory:" {
            return SqliteConnectOptions::from_str("sqlite::memory:")
                .map(|o| o.foreign_keys(true))
                .map_err(PluginError::from_sqlx);
        }
        let base_dir = self
            .base_dir
            .as_ref()
            .ok_or_else(|| PluginError::Unavailable("no database directory configured".to_string()))?;
        std::fs::create_dir_all(base_dir).map_err(|e| PluginError::Unavailable(e.to_string()))?;
        Ok(SqliteConnectOptions::new()
            .filename(base_dir.join(format!("{}.db", database)))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true))
    }
}

#[async_trait]
impl NativeSqlitePlugin for SqlxSqlitePlugin {
    fn platform(&self) -> &str {
        "sqlx"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn open(&self, database: &str) -> Result<(), PluginError> {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(database) {
            return Ok(());
        }
        let connection = self
            .options_for(database)?
            .connect()
            .await
            .map_err(PluginError::from_sqlx)?;
        connections.insert(database.to_string(), connection);
        tracing::info!(database, "native plugin database opened");
        Ok(())
    }

    async fn execute(&self, database: &str, statements: &str) -> Result<PluginChanges, PluginError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(database)
            .ok_or_else(|| PluginError::NotOpen(database.to_string()))?;

        let mut changes = PluginChanges::default();
        for statement in split_script(statements) {
            let result = sqlx::query(&statement)
                .execute(&mut *connection)
                .await
                .map_err(PluginError::from_sqlx)?;
            changes.changes += result.rows_affected();
            changes.last_id = result.last_insert_rowid();
        }
        Ok(changes)
    }

    async fn run(&self, database: &str, statement: &str, values: &[Value]) -> Result<PluginChanges, PluginError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(database)
            .ok_or_else(|| PluginError::NotOpen(database.to_string()))?;

        let result = bind_values(sqlx::query(statement), values)
            .execute(&mut *connection)
            .await
            .map_err(PluginError::from_sqlx)?;
        Ok(PluginChanges {
            changes: result.rows_affected(),
            last_id: result.last_insert_rowid(),
        })
    }

    async fn query(&self, database: &str, statement: &str, values: &[Value]) -> Result<Vec<Record>, PluginError> {
        let mut connections = self.connections.lock().await;
        let connection = connections
            .get_mut(database)
            .ok_or_else(|| PluginError::NotOpen(database.to_string()))?;

        let rows = bind_values(sqlx::query(statement), values)
            .fetch_all(&mut *connection)
            .await
            .map_err(PluginError::from_sqlx)?;
        rows.iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PluginError::from_sqlx)
    }

    async fn close(&self, database: &str) -> Result<(), PluginError> {
        let connection = self.connections.lock().await.remove(database);
        if let Some(connection) = connection {
            connection.close().await.map_err(PluginError::from_sqlx)?;
            tracing::info!(database, "native plugin database closed");
        }
        Ok(())
    }
}
