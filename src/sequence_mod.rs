// src/sequence_mod.rs
// Human-readable document numbers: PREFIX-YYYY-NNNNN and PREFIX-NNNNN.

use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::storage::{
    self, QueryFilter, QueryOptions, Record, RecordId, SortDirection, StorageAdapter, StorageError, TransactionScope,
};

/// Width of the zero-padded numeric suffix.
pub const SUFFIX_WIDTH: usize = 5;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Partition a number is issued in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberScope {
    /// `PREFIX-YYYY-NNNNN`
    Year(i32),
    /// `PREFIX-NNNNN`, for entity codes.
    Unscoped,
}

impl NumberScope {
    pub fn current_year() -> Self {
        NumberScope::Year(Utc::now().year())
    }

    /// Everything before the numeric suffix, including the trailing dash.
    pub fn stem(&self, prefix: &str) -> String {
        match self {
            NumberScope::Year(year) => format!("{}-{:04}-", prefix, year),
            NumberScope::Unscoped => format!("{}-", prefix),
        }
    }
}

pub fn format_number(prefix: &str, scope: NumberScope, sequence: u64) -> String {
    format!("{}{:0width$}", scope.stem(prefix), sequence, width = SUFFIX_WIDTH)
}

/// Numeric suffix of `value` when it belongs to `stem`'s partition.
pub fn parse_suffix(stem: &str, value: &str) -> Option<u64> {
    let suffix = value.strip_prefix(stem)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

/// Issues sequence numbers by reading the highest one already stored.
///
/// `next_number` and friends are plain read-then-compute: two writers that
/// call them concurrently can compute the same value. `insert_numbered`
/// serializes issuance within the process and retries on a unique-constraint
/// conflict, which covers writers in other processes as long as the number
/// field carries a unique index.
pub struct DocumentNumberGenerator {
    adapter: Arc<dyn StorageAdapter>,
    issue_lock: Mutex<()>,
    max_retries: u32,
}

impl DocumentNumberGenerator {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_max_retries(adapter, DEFAULT_MAX_RETRIES)
    }

    pub fn with_max_retries(adapter: Arc<dyn StorageAdapter>, max_retries: u32) -> Self {
        Self {
            adapter,
            issue_lock: Mutex::new(()),
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Next `PREFIX-YYYY-NNNNN` for the current year.
    pub async fn next_number(&self, prefix: &str, table: &str, field: &str) -> Result<String, StorageError> {
        self.next_in_scope(prefix, table, field, NumberScope::current_year()).await
    }

    pub async fn next_number_for_year(
        &self,
        prefix: &str,
        table: &str,
        field: &str,
        year: i32,
    ) -> Result<String, StorageError> {
        self.next_in_scope(prefix, table, field, NumberScope::Year(year)).await
    }

    /// Next `PREFIX-NNNNN`.
    pub async fn next_code(&self, prefix: &str, table: &str, field: &str) -> Result<String, StorageError> {
        self.next_in_scope(prefix, table, field, NumberScope::Unscoped).await
    }

    pub async fn next_in_scope(
        &self,
        prefix: &str,
        table: &str,
        field: &str,
        scope: NumberScope,
    ) -> Result<String, StorageError> {
        let stem = scope.stem(prefix);
        let options = QueryOptions::new()
            .filter(QueryFilter::contains(field, stem.clone()))
            .order_by(field, SortDirection::Desc);
        let rows = self.adapter.find_all(table, &options).await?;

        // `contains` also matches longer prefixes ending in ours, so the
        // partition check happens here.
        let last = rows
            .iter()
            .filter_map(|row| row.get(field).and_then(Value::as_str))
            .filter_map(|value| parse_suffix(&stem, value))
            .max()
            .unwrap_or(0);

        let next = last.checked_add(1).ok_or_else(|| StorageError::InvalidRecord {
            reason: format!("document numbers under '{}' in {}.{} are exhausted", stem, table, field),
        })?;
        let number = format_number(prefix, scope, next);
        tracing::debug!(table, field, number = %number, "issued document number");
        Ok(number)
    }

    /// Number `record` under `field` for the current year and insert it.
    pub async fn insert_numbered(
        &self,
        prefix: &str,
        table: &str,
        field: &str,
        record: Record,
    ) -> Result<(String, RecordId), StorageError> {
        self.insert_numbered_in_scope(prefix, table, field, NumberScope::current_year(), record)
            .await
    }

    /// Issue-and-insert with optimistic retry: on a constraint violation the
    /// number is recomputed and the insert tried again, up to `max_retries`
    /// extra attempts.
    ///
    /// Outside a `storage::transaction` the read and the insert get a
    /// transaction of their own, taken before the issue lock.
    pub async fn insert_numbered_in_scope(
        &self,
        prefix: &str,
        table: &str,
        field: &str,
        scope: NumberScope,
        record: Record,
    ) -> Result<(String, RecordId), StorageError> {
        if TransactionScope::current().is_scoped() {
            return self.issue_and_insert(prefix, table, field, scope, record).await;
        }
        storage::transaction(&self.adapter, |_| self.issue_and_insert(prefix, table, field, scope, record)).await
    }

    async fn issue_and_insert(
        &self,
        prefix: &str,
        table: &str,
        field: &str,
        scope: NumberScope,
        mut record: Record,
    ) -> Result<(String, RecordId), StorageError> {
        let _guard = self.issue_lock.lock().await;
        let mut attempt = 0;
        loop {
            let number = self.next_in_scope(prefix, table, field, scope).await?;
            record.insert(field.to_string(), Value::String(number.clone()));
            match self.adapter.insert(table, record.clone()).await {
                Ok(id) => return Ok((number, id)),
                Err(e) if e.is_constraint_violation() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(table, number = %number, attempt, "document number taken; retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}
