// src/storage/storage_mod.rs
// Storage contract shared by every backend adapter and every calling service.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A stored row/object: field name -> JSON-serializable value.
pub type Record = Map<String, Value>;

/// Backend-assigned integer identifier.
pub type RecordId = i64;

/// Reserved key carrying the backend-assigned identifier.
pub const ID_FIELD: &str = "id";

/// Storage errors with detailed context
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Storage not initialized: {backend}")]
    NotInitialized { backend: String },

    #[error("Unsupported operation on {backend}: {operation}")]
    UnsupportedOperation { backend: String, operation: String },

    #[error("Constraint violation on {backend}: {error}")]
    ConstraintViolation { backend: String, error: String },

    #[error("Transaction state error: {reason}")]
    TransactionState { reason: String },

    #[error("Invalid query: {reason}")]
    InvalidQuery { reason: String },

    #[error("Invalid record: {reason}")]
    InvalidRecord { reason: String },

    #[error("Table not found: {table}")]
    TableNotFound { table: String },

    #[error("Environment mismatch for {backend}: {reason}")]
    EnvironmentMismatch { backend: String, reason: String },

    #[error("Database unavailable: {reason}")]
    DatabaseUnavailable { reason: String },

    #[error("Backend error: {backend} - {error}")]
    BackendError { backend: String, error: String },

    #[error("Serialization error: {error}")]
    SerializationError { error: String },

    #[error("Migration failed: {version} - {error}")]
    MigrationFailed { version: u32, error: String },
}

impl StorageError {
    /// True for the typed signal raised by backends without a SQL engine.
    pub fn is_unsupported_operation(&self) -> bool {
        matches!(self, StorageError::UnsupportedOperation { .. })
    }

    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::ConstraintViolation { .. })
    }
}

/// Which concrete engine sits behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Relational engine owned by the privileged host, reached over the IPC bridge.
    DesktopSql,
    /// Relational engine reached through the native plugin bridge.
    MobileSql,
    /// In-process key-value object store.
    ObjectStore,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::DesktopSql => "desktop-sqlite",
            BackendKind::MobileSql => "mobile-sqlite",
            BackendKind::ObjectStore => "object-store",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What an adapter can and cannot guarantee. Callers query this instead of
/// probing for failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// `query` and `execute_script` are available.
    pub sql: bool,
    /// `begin_transaction`/`commit`/`rollback` give all-or-nothing writes.
    pub atomic_transactions: bool,
    /// Foreign keys declared in the schema are enforced.
    pub foreign_keys: bool,
}

impl Capabilities {
    pub const RELATIONAL: Capabilities = Capabilities {
        sql: true,
        atomic_transactions: true,
        foreign_keys: true,
    };

    pub const OBJECT_STORE: Capabilities = Capabilities {
        sql: false,
        atomic_transactions: false,
        foreign_keys: false,
    };
}

/// Returned by `initialize()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendInfo {
    pub kind: BackendKind,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    Between,
    In,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl QueryFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Equals, value)
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    pub fn greater_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::GreaterThan, value)
    }

    pub fn less_than(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::LessThan, value)
    }

    pub fn between(field: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::new(field, FilterOperator::Between, Value::Array(vec![low.into(), high.into()]))
    }

    pub fn one_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        Self::new(field, FilterOperator::In, Value::Array(values))
    }

    /// `between` carries a two-element array, `in` an array, everything else a scalar.
    pub fn validate(&self) -> Result<(), StorageError> {
        let invalid = |reason: &str| StorageError::InvalidQuery {
            reason: format!("filter on '{}': {}", self.field, reason),
        };
        match (&self.operator, &self.value) {
            (FilterOperator::Between, Value::Array(bounds)) if bounds.len() == 2 => Ok(()),
            (FilterOperator::Between, _) => Err(invalid("between expects [low, high]")),
            (FilterOperator::In, Value::Array(_)) => Ok(()),
            (FilterOperator::In, _) => Err(invalid("in expects an array")),
            (_, Value::Array(_)) | (_, Value::Object(_)) => Err(invalid("expected a scalar value")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortCriteria {
    pub field: String,
    pub direction: SortDirection,
}

/// Filters are ANDed; ordering is applied in listed priority; offset and
/// limit apply after filtering and ordering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub filters: Vec<QueryFilter>,
    #[serde(default)]
    pub order_by: Vec<SortCriteria>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: QueryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(SortCriteria {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Storage adapter trait. One implementation per engine; callers only ever
/// hold an `Arc<dyn StorageAdapter>`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn capabilities(&self) -> Capabilities;

    fn backend_info(&self) -> BackendInfo {
        BackendInfo {
            kind: self.kind(),
            capabilities: self.capabilities(),
        }
    }

    /// Open the backend. Every other operation fails with `NotInitialized`
    /// until this succeeds.
    async fn initialize(&self) -> Result<BackendInfo, StorageError>;

    /// Insert a record and return the assigned id. The record must not carry `id`.
    async fn insert(&self, table: &str, record: Record) -> Result<RecordId, StorageError>;

    /// Insert many records. All-or-nothing where the backend supports it.
    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> Result<Vec<RecordId>, StorageError>;

    /// Merge `partial` into the record. `Ok(false)` when no such record exists.
    async fn update(&self, table: &str, id: RecordId, partial: Record) -> Result<bool, StorageError>;

    /// `Ok(false)` when no such record exists.
    async fn delete(&self, table: &str, id: RecordId) -> Result<bool, StorageError>;

    async fn find_by_id(&self, table: &str, id: RecordId) -> Result<Option<Record>, StorageError>;

    async fn find_all(&self, table: &str, options: &QueryOptions) -> Result<Vec<Record>, StorageError>;

    async fn count(&self, table: &str, filters: &[QueryFilter]) -> Result<u64, StorageError>;

    /// Raw parameterized SQL. Relational backends only.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StorageError>;

    /// Multi-statement SQL script. Relational backends only.
    async fn execute_script(&self, script: &str) -> Result<(), StorageError>;

    /// Open a transaction owned by the caller's `TransactionScope`. Callers
    /// outside every `storage::transaction` share the `UNSCOPED` owner, so
    /// prefer `storage::transaction` when other tasks use the adapter.
    async fn begin_transaction(&self) -> Result<(), StorageError>;

    async fn commit(&self) -> Result<(), StorageError>;

    async fn rollback(&self) -> Result<(), StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// Identifies the caller that owns an open transaction. Adapter calls made
/// while polling a `storage::transaction` callback carry that call's scope;
/// every other caller is `UNSCOPED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionScope(u64);

static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    static CURRENT_SCOPE: TransactionScope;
}

impl TransactionScope {
    pub const UNSCOPED: TransactionScope = TransactionScope(0);

    fn fresh() -> Self {
        TransactionScope(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }

    /// Scope of the code currently running.
    pub fn current() -> Self {
        CURRENT_SCOPE.try_with(|scope| *scope).unwrap_or(Self::UNSCOPED)
    }

    pub fn is_scoped(&self) -> bool {
        *self != Self::UNSCOPED
    }

    /// Run `fut` under a scope of its own.
    pub async fn isolate<F: Future>(fut: F) -> F::Output {
        CURRENT_SCOPE.scope(Self::fresh(), fut).await
    }
}

/// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// The callback runs under its own `TransactionScope`. On the relational
/// adapters, calls from that scope (through any handle to the adapter) run
/// inside the transaction; calls from anywhere else wait until it ends.
///
/// On backends whose capabilities report `atomic_transactions == false`
/// the begin/commit/rollback calls are no-ops, so `f` runs with no
/// atomicity and writes made before a failure stay visible.
pub async fn transaction<T, F, Fut>(adapter: &Arc<dyn StorageAdapter>, f: F) -> Result<T, StorageError>
where
    F: FnOnce(Arc<dyn StorageAdapter>) -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    if !adapter.capabilities().atomic_transactions {
        tracing::debug!(backend = %adapter.kind(), "transaction() running without atomicity");
    }

    let run = run_transaction(adapter.clone(), f);
    // Nested calls keep the outer scope, so `begin_transaction` reports
    // the open transaction instead of waiting on it.
    if TransactionScope::current().is_scoped() {
        run.await
    } else {
        TransactionScope::isolate(run).await
    }
}

async fn run_transaction<T, F, Fut>(adapter: Arc<dyn StorageAdapter>, f: F) -> Result<T, StorageError>
where
    F: FnOnce(Arc<dyn StorageAdapter>) -> Fut,
    Fut: Future<Output = Result<T, StorageError>>,
{
    adapter.begin_transaction().await?;
    match f(adapter.clone()).await {
        Ok(value) => {
            adapter.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = adapter.rollback().await {
                tracing::error!(backend = %adapter.kind(), error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/// Reject records that try to choose their own identifier.
pub(crate) fn ensure_no_id(record: &Record, operation: &str) -> Result<(), StorageError> {
    if record.contains_key(ID_FIELD) {
        return Err(StorageError::InvalidRecord {
            reason: format!("{} must not specify '{}'", operation, ID_FIELD),
        });
    }
    Ok(())
}

/// Read the identifier of a stored record.
pub fn record_id(record: &Record) -> Option<RecordId> {
    record.get(ID_FIELD).and_then(Value::as_i64)
}
