// src/storage/relational.rs
// Relational adapter core. The desktop and mobile adapters differ only in
// how statements reach the engine, so both are `RelationalAdapter<C>` over
// their own `SqlChannel`.
//
// One connection sits behind each adapter, so an open transaction belongs to
// one `TransactionScope`. Calls from other scopes queue on the gate until it
// commits or rolls back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

use super::sql_builder::{self, SqlStatement};
use super::storage_mod::ensure_no_id;
use super::{
    BackendInfo, BackendKind, Capabilities, QueryFilter, QueryOptions, Record, RecordId, StorageAdapter,
    StorageError, TransactionScope,
};

/// Result of a write statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub last_insert_id: i64,
}

/// Transport from an adapter to a SQLite engine.
#[async_trait]
pub trait SqlChannel: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Verify the bridge is present and answering.
    async fn probe(&self) -> Result<(), StorageError>;

    async fn execute(&self, statement: SqlStatement) -> Result<ExecOutcome, StorageError>;

    async fn select(&self, statement: SqlStatement) -> Result<Vec<Record>, StorageError>;

    async fn execute_script(&self, script: &str) -> Result<(), StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// The open transaction: its owner and the gate it holds.
struct OpenTransaction {
    owner: TransactionScope,
    _gate: OwnedMutexGuard<()>,
}

pub struct RelationalAdapter<C: SqlChannel> {
    channel: C,
    ready: AtomicBool,
    gate: Arc<Mutex<()>>,
    open: Mutex<Option<OpenTransaction>>,
}

impl<C: SqlChannel> RelationalAdapter<C> {
    pub fn with_channel(channel: C) -> Self {
        Self {
            channel,
            ready: AtomicBool::new(false),
            gate: Arc::new(Mutex::new(())),
            open: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// True while any scope has a transaction open.
    pub async fn in_transaction(&self) -> bool {
        self.open.lock().await.is_some()
    }

    async fn owns_transaction(&self, scope: TransactionScope) -> bool {
        matches!(&*self.open.lock().await, Some(open) if open.owner == scope)
    }

    /// Admission for one operation. The owner of the open transaction goes
    /// straight through; everyone else holds the gate for the statement,
    /// which waits out another scope's transaction.
    async fn enter(&self) -> Option<MutexGuard<'_, ()>> {
        if self.owns_transaction(TransactionScope::current()).await {
            None
        } else {
            Some(self.gate.lock().await)
        }
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::NotInitialized {
                backend: self.channel.kind().name().to_string(),
            })
        }
    }

    async fn run(&self, sql: &str) -> Result<ExecOutcome, StorageError> {
        self.channel
            .execute(SqlStatement {
                sql: sql.to_string(),
                params: vec![],
            })
            .await
    }

    async fn insert_one(&self, table: &str, record: &Record) -> Result<RecordId, StorageError> {
        ensure_no_id(record, "insert")?;
        let statement = sql_builder::build_insert(table, record)?;
        let outcome = self.channel.execute(statement).await?;
        Ok(outcome.last_insert_id)
    }
}

#[async_trait]
impl<C: SqlChannel> StorageAdapter for RelationalAdapter<C> {
    fn kind(&self) -> BackendKind {
        self.channel.kind()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::RELATIONAL
    }

    async fn initialize(&self) -> Result<BackendInfo, StorageError> {
        let backend = self.channel.kind();
        self.channel.probe().await.map_err(|e| match e {
            StorageError::EnvironmentMismatch { .. } => e,
            other => StorageError::EnvironmentMismatch {
                backend: backend.name().to_string(),
                reason: other.to_string(),
            },
        })?;
        self.ready.store(true, Ordering::SeqCst);
        tracing::info!(backend = %backend, "relational adapter initialized");
        Ok(self.backend_info())
    }

    async fn insert(&self, table: &str, record: Record) -> Result<RecordId, StorageError> {
        self.ensure_ready()?;
        let _admitted = self.enter().await;
        self.insert_one(table, &record).await
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> Result<Vec<RecordId>, StorageError> {
        self.ensure_ready()?;

        // Inside the caller's own transaction the inserts join it. Otherwise
        // they get a transaction and a scope of their own.
        if self.owns_transaction(TransactionScope::current()).await {
            let mut ids = Vec::with_capacity(records.len());
            for record in &records {
                ids.push(self.insert_one(table, record).await?);
            }
            return Ok(ids);
        }

        TransactionScope::isolate(async {
            self.begin_transaction().await?;
            let mut ids = Vec::with_capacity(records.len());
            for record in &records {
                match self.insert_one(table, record).await {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        if let Err(rollback_err) = self.rollback().await {
                            tracing::error!(table, error = %rollback_err, "bulk insert rollback failed");
                        }
                        return Err(e);
                    }
                }
            }
            self.commit().await?;
            tracing::debug!(table, count = ids.len(), "bulk insert committed");
            Ok(ids)
        })
        .await
    }

    async fn update(&self, table: &str, id: RecordId, partial: Record) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        ensure_no_id(&partial, "update")?;
        if partial.is_empty() {
            return Ok(self.find_by_id(table, id).await?.is_some());
        }
        let statement = sql_builder::build_update(table, id, &partial)?;
        let _admitted = self.enter().await;
        Ok(self.channel.execute(statement).await?.rows_affected > 0)
    }

    async fn delete(&self, table: &str, id: RecordId) -> Result<bool, StorageError> {
        self.ensure_ready()?;
        let statement = sql_builder::build_delete(table, id)?;
        let _admitted = self.enter().await;
        Ok(self.channel.execute(statement).await?.rows_affected > 0)
    }

    async fn find_by_id(&self, table: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.ensure_ready()?;
        let statement = sql_builder::build_find_by_id(table, id)?;
        let _admitted = self.enter().await;
        Ok(self.channel.select(statement).await?.into_iter().next())
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> Result<Vec<Record>, StorageError> {
        self.ensure_ready()?;
        let statement = sql_builder::build_select(table, options)?;
        let _admitted = self.enter().await;
        self.channel.select(statement).await
    }

    async fn count(&self, table: &str, filters: &[QueryFilter]) -> Result<u64, StorageError> {
        self.ensure_ready()?;
        let statement = sql_builder::build_count(table, filters)?;
        let _admitted = self.enter().await;
        let rows = self.channel.select(statement).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StorageError> {
        self.ensure_ready()?;
        let _admitted = self.enter().await;
        self.channel
            .select(SqlStatement {
                sql: sql.to_string(),
                params: params.to_vec(),
            })
            .await
    }

    async fn execute_script(&self, script: &str) -> Result<(), StorageError> {
        self.ensure_ready()?;
        let _admitted = self.enter().await;
        self.channel.execute_script(script).await
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.ensure_ready()?;
        let owner = TransactionScope::current();
        if self.owns_transaction(owner).await {
            return Err(StorageError::TransactionState {
                reason: "a transaction is already open".to_string(),
            });
        }

        let gate = self.gate.clone().lock_owned().await;
        self.run("BEGIN").await?;
        *self.open.lock().await = Some(OpenTransaction { owner, _gate: gate });
        Ok(())
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.ensure_ready()?;
        let mut open = self.open.lock().await;
        if !matches!(&*open, Some(tx) if tx.owner == TransactionScope::current()) {
            return Err(StorageError::TransactionState {
                reason: "commit without an open transaction".to_string(),
            });
        }
        // On failure the transaction stays open so the caller can roll back.
        self.run("COMMIT").await?;
        *open = None;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.ensure_ready()?;
        let mut open = self.open.lock().await;
        if !matches!(&*open, Some(tx) if tx.owner == TransactionScope::current()) {
            return Err(StorageError::TransactionState {
                reason: "rollback without an open transaction".to_string(),
            });
        }
        let result = self.run("ROLLBACK").await;
        *open = None;
        result.map(|_| ())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if self.open.lock().await.take().is_some() {
            tracing::warn!(backend = %self.kind(), "closing with an open transaction; rolling back");
            if let Err(e) = self.run("ROLLBACK").await {
                tracing::warn!(error = %e, "rollback on close failed");
            }
        }
        self.channel.close().await?;
        tracing::info!(backend = %self.kind(), "relational adapter closed");
        Ok(())
    }
}
