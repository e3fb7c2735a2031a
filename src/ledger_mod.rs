// src/ledger_mod.rs
// Journal posting under the double-entry rule: total debits equal total credits.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::sequence_mod::{DocumentNumberGenerator, NumberScope};
use crate::storage::{self, QueryFilter, QueryOptions, Record, RecordId, SortDirection, StorageAdapter, StorageError};

pub const JOURNAL_PREFIX: &str = "JE";
pub const ENTRIES_TABLE: &str = "journal_entries";
pub const LINES_TABLE: &str = "journal_entry_lines";
pub const ENTRY_NUMBER_FIELD: &str = "entry_number";

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Entry is unbalanced: debits {debits} != credits {credits}")]
    Unbalanced { debits: Decimal, credits: Decimal },

    #[error("Entry needs at least two lines, got {count}")]
    TooFewLines { count: usize },

    #[error("Invalid line {line}: {reason}")]
    InvalidLine { line: usize, reason: String },

    #[error("Entry not found: {id}")]
    EntryNotFound { id: RecordId },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalLine {
    pub account_id: RecordId,
    #[serde(default)]
    pub debit: Decimal,
    #[serde(default)]
    pub credit: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

impl JournalLine {
    pub fn debit(account_id: RecordId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Decimal::ZERO,
            description: None,
        }
    }

    pub fn credit(account_id: RecordId, amount: Decimal) -> Self {
        Self {
            account_id,
            debit: Decimal::ZERO,
            credit: amount,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewJournalEntry {
    pub entry_date: NaiveDate,
    #[serde(default)]
    pub memo: Option<String>,
    pub lines: Vec<JournalLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostedEntry {
    pub id: RecordId,
    pub entry_number: String,
    pub total_debit: Decimal,
    pub total_credit: Decimal,
    pub line_ids: Vec<RecordId>,
}

/// Sums of a stored entry's lines next to the totals on its header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryTotals {
    pub line_debits: Decimal,
    pub line_credits: Decimal,
    pub header_debit: Option<Decimal>,
    pub header_credit: Option<Decimal>,
}

impl EntryTotals {
    pub fn is_consistent(&self) -> bool {
        self.line_debits == self.line_credits
            && self.header_debit.map_or(true, |d| d == self.line_debits)
            && self.header_credit.map_or(true, |c| c == self.line_credits)
    }
}

/// Posts journal entries. Entries are immutable once posted; this service
/// exposes no update or delete.
pub struct LedgerService {
    adapter: Arc<dyn StorageAdapter>,
    numbers: Arc<DocumentNumberGenerator>,
    write_lock: Mutex<()>,
}

impl LedgerService {
    pub fn new(adapter: Arc<dyn StorageAdapter>, numbers: Arc<DocumentNumberGenerator>) -> Self {
        Self {
            adapter,
            numbers,
            write_lock: Mutex::new(()),
        }
    }

    /// Check the double-entry rule and return `(debits, credits)`.
    pub fn validate_balanced(lines: &[JournalLine]) -> Result<(Decimal, Decimal), LedgerError> {
        if lines.len() < 2 {
            return Err(LedgerError::TooFewLines { count: lines.len() });
        }

        let mut debits = Decimal::ZERO;
        let mut credits = Decimal::ZERO;
        for (index, line) in lines.iter().enumerate() {
            let line_no = index + 1;
            if line.debit.is_sign_negative() || line.credit.is_sign_negative() {
                return Err(LedgerError::InvalidLine {
                    line: line_no,
                    reason: "amounts must not be negative".to_string(),
                });
            }
            if line.debit.is_zero() == line.credit.is_zero() {
                return Err(LedgerError::InvalidLine {
                    line: line_no,
                    reason: "exactly one of debit or credit must be non-zero".to_string(),
                });
            }
            debits += line.debit;
            credits += line.credit;
        }

        if debits != credits {
            return Err(LedgerError::Unbalanced { debits, credits });
        }
        Ok((debits, credits))
    }

    /// Validate, number and write header plus lines in one storage transaction.
    ///
    /// Posting is serialized within the process. On a backend without atomic
    /// transactions a failure part-way leaves the rows written so far.
    pub async fn post_entry(&self, entry: NewJournalEntry) -> Result<PostedEntry, LedgerError> {
        let (total_debit, total_credit) = Self::validate_balanced(&entry.lines)?;

        let _guard = self.write_lock.lock().await;
        if !self.adapter.capabilities().atomic_transactions {
            tracing::warn!(
                backend = %self.adapter.kind(),
                "posting journal entry without atomic transactions; a failure may leave partial rows"
            );
        }

        let numbers = self.numbers.clone();
        let posted = storage::transaction(&self.adapter, move |adapter| async move {
            let header = to_record(json!({
                "entry_date": entry.entry_date.to_string(),
                "memo": entry.memo,
                "status": "posted",
                "total_debit": total_debit.to_string(),
                "total_credit": total_credit.to_string(),
                "created_at": Utc::now().to_rfc3339(),
            }));
            let scope = NumberScope::Year(entry.entry_date.year());
            let (entry_number, id) = numbers
                .insert_numbered_in_scope(JOURNAL_PREFIX, ENTRIES_TABLE, ENTRY_NUMBER_FIELD, scope, header)
                .await?;

            let mut line_ids = Vec::with_capacity(entry.lines.len());
            for (index, line) in entry.lines.iter().enumerate() {
                let row = to_record(json!({
                    "journal_entry_id": id,
                    "account_id": line.account_id,
                    "line_number": index + 1,
                    "debit": line.debit.to_string(),
                    "credit": line.credit.to_string(),
                    "description": line.description,
                }));
                line_ids.push(adapter.insert(LINES_TABLE, row).await?);
            }

            Ok(PostedEntry {
                id,
                entry_number,
                total_debit,
                total_credit,
                line_ids,
            })
        })
        .await?;

        tracing::info!(
            entry_number = %posted.entry_number,
            lines = posted.line_ids.len(),
            total = %posted.total_debit,
            "journal entry posted"
        );
        Ok(posted)
    }

    pub async fn entry_lines(&self, id: RecordId) -> Result<Vec<Record>, LedgerError> {
        let options = QueryOptions::new()
            .filter(QueryFilter::equals("journal_entry_id", id))
            .order_by("line_number", SortDirection::Asc);
        Ok(self.adapter.find_all(LINES_TABLE, &options).await?)
    }

    /// Recompute an entry's totals from storage.
    pub async fn entry_totals(&self, id: RecordId) -> Result<EntryTotals, LedgerError> {
        let header = self
            .adapter
            .find_by_id(ENTRIES_TABLE, id)
            .await?
            .ok_or(LedgerError::EntryNotFound { id })?;

        let mut line_debits = Decimal::ZERO;
        let mut line_credits = Decimal::ZERO;
        for line in self.entry_lines(id).await? {
            line_debits += decimal_field(&line, "debit")?.unwrap_or_default();
            line_credits += decimal_field(&line, "credit")?.unwrap_or_default();
        }

        Ok(EntryTotals {
            line_debits,
            line_credits,
            header_debit: decimal_field(&header, "total_debit")?,
            header_credit: decimal_field(&header, "total_credit")?,
        })
    }

    /// True when the stored entry still satisfies the double-entry rule.
    pub async fn verify_entry(&self, id: RecordId) -> Result<bool, LedgerError> {
        Ok(self.entry_totals(id).await?.is_consistent())
    }
}

fn to_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Record::new(),
    }
}

/// Amounts are stored as decimal strings; numeric values are accepted too.
fn decimal_field(record: &Record, field: &str) -> Result<Option<Decimal>, StorageError> {
    let parsed = match record.get(field) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) => Decimal::from_str(text),
        Some(Value::Number(number)) => Decimal::from_str(&number.to_string()),
        Some(other) => {
            return Err(StorageError::SerializationError {
                error: format!("field '{}' is not an amount: {}", field, other),
            })
        }
    };
    parsed.map(Some).map_err(|e| StorageError::SerializationError {
        error: format!("field '{}': {}", field, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn balanced_entry_returns_totals() {
        let lines = vec![
            JournalLine::debit(1, dec!(150.25)),
            JournalLine::credit(2, dec!(100.00)),
            JournalLine::credit(3, dec!(50.25)),
        ];
        let (debits, credits) = LedgerService::validate_balanced(&lines).unwrap();
        assert_eq!(debits, dec!(150.25));
        assert_eq!(credits, dec!(150.25));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let lines = vec![JournalLine::debit(1, dec!(100)), JournalLine::credit(2, dec!(99.99))];
        match LedgerService::validate_balanced(&lines) {
            Err(LedgerError::Unbalanced { debits, credits }) => {
                assert_eq!(debits, dec!(100));
                assert_eq!(credits, dec!(99.99));
            }
            other => panic!("expected Unbalanced, got {:?}", other),
        }
    }

    #[test]
    fn single_line_is_rejected() {
        let lines = vec![JournalLine::debit(1, dec!(10))];
        assert!(matches!(
            LedgerService::validate_balanced(&lines),
            Err(LedgerError::TooFewLines { count: 1 })
        ));
    }

    #[test]
    fn line_with_both_sides_or_neither_is_rejected() {
        let both = JournalLine {
            account_id: 1,
            debit: dec!(5),
            credit: dec!(5),
            description: None,
        };
        let lines = vec![both, JournalLine::credit(2, dec!(0))];
        assert!(matches!(
            LedgerService::validate_balanced(&lines),
            Err(LedgerError::InvalidLine { line: 1, .. })
        ));

        let lines = vec![JournalLine::debit(1, dec!(5)), JournalLine::credit(2, dec!(0))];
        assert!(matches!(
            LedgerService::validate_balanced(&lines),
            Err(LedgerError::InvalidLine { line: 2, .. })
        ));
    }

    #[test]
    fn negative_amount_is_rejected() {
        let lines = vec![JournalLine::debit(1, dec!(-5)), JournalLine::credit(2, dec!(-5))];
        assert!(matches!(
            LedgerService::validate_balanced(&lines),
            Err(LedgerError::InvalidLine { line: 1, .. })
        ));
    }

    #[test]
    fn decimal_field_reads_strings_and_numbers() {
        let record = to_record(json!({ "debit": "12.50", "credit": 3, "memo": null }));
        assert_eq!(decimal_field(&record, "debit").unwrap(), Some(dec!(12.50)));
        assert_eq!(decimal_field(&record, "credit").unwrap(), Some(dec!(3)));
        assert_eq!(decimal_field(&record, "memo").unwrap(), None);
        assert!(!record.contains_key("memo"));
    }
}
