mod common;

use std::sync::Arc;

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use common::all_backends;
use ledgerbook::ledger_mod::{JournalLine, LedgerError, LedgerService, NewJournalEntry};
use ledgerbook::sequence_mod::DocumentNumberGenerator;
use ledgerbook::storage::{QueryFilter, QueryOptions, RecordId, StorageAdapter};

fn ledger_for(adapter: &Arc<dyn StorageAdapter>) -> LedgerService {
    let numbers = Arc::new(DocumentNumberGenerator::new(adapter.clone()));
    LedgerService::new(adapter.clone(), numbers)
}

async fn account_id(adapter: &Arc<dyn StorageAdapter>, code: &str) -> RecordId {
    let options = QueryOptions::new().filter(QueryFilter::equals("code", code));
    let rows = adapter.find_all("accounts", &options).await.unwrap();
    rows[0].get("id").and_then(Value::as_i64).expect("seeded account")
}

fn sale(cash: RecordId, revenue: RecordId, amount: rust_decimal::Decimal) -> NewJournalEntry {
    NewJournalEntry {
        entry_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        memo: Some("Cash sale".to_string()),
        lines: vec![
            JournalLine::debit(cash, amount).with_description("Cash received"),
            JournalLine::credit(revenue, amount),
        ],
    }
}

#[tokio::test]
async fn balanced_entries_post_with_sequential_numbers() {
    for adapter in all_backends().await {
        let backend = adapter.kind();
        let ledger = ledger_for(&adapter);
        let cash = account_id(&adapter, "1000").await;
        let revenue = account_id(&adapter, "4000").await;

        let first = ledger.post_entry(sale(cash, revenue, dec!(250.75))).await.unwrap();
        assert_eq!(first.entry_number, "JE-2024-00001", "{}", backend);
        assert_eq!(first.total_debit, dec!(250.75));
        assert_eq!(first.line_ids.len(), 2);

        let second = ledger.post_entry(sale(cash, revenue, dec!(10))).await.unwrap();
        assert_eq!(second.entry_number, "JE-2024-00002", "{}", backend);

        let lines = ledger.entry_lines(first.id).await.unwrap();
        assert_eq!(lines.len(), 2, "{}", backend);
        assert_eq!(lines[0].get("debit"), Some(&json!("250.75")), "{}", backend);
        assert_eq!(lines[0].get("credit"), Some(&json!("0")), "{}", backend);
        assert_eq!(lines[1].get("line_number"), Some(&json!(2)), "{}", backend);

        let totals = ledger.entry_totals(first.id).await.unwrap();
        assert_eq!(totals.line_debits, dec!(250.75));
        assert_eq!(totals.line_credits, dec!(250.75));
        assert!(ledger.verify_entry(first.id).await.unwrap(), "{}", backend);
    }
}

#[tokio::test]
async fn unbalanced_entry_writes_nothing() {
    for adapter in all_backends().await {
        let ledger = ledger_for(&adapter);
        let cash = account_id(&adapter, "1000").await;
        let revenue = account_id(&adapter, "4000").await;

        let mut entry = sale(cash, revenue, dec!(100));
        entry.lines[1].credit = dec!(99.99);

        let err = ledger.post_entry(entry).await.unwrap_err();
        assert!(matches!(err, LedgerError::Unbalanced { .. }), "{:?}", err);
        assert_eq!(adapter.count("journal_entries", &[]).await.unwrap(), 0, "{}", adapter.kind());
        assert_eq!(adapter.count("journal_entry_lines", &[]).await.unwrap(), 0, "{}", adapter.kind());
    }
}

#[tokio::test]
async fn failure_mid_posting_rolls_back_on_relational_backends() {
    for adapter in common::relational_backends().await {
        let ledger = ledger_for(&adapter);
        let cash = account_id(&adapter, "1000").await;

        // The second line points at an account that does not exist.
        let entry = sale(cash, 9_999, dec!(40));
        let err = ledger.post_entry(entry).await.unwrap_err();
        match err {
            LedgerError::Storage(storage_err) => assert!(storage_err.is_constraint_violation()),
            other => panic!("expected a storage error, got {:?}", other),
        }

        assert_eq!(adapter.count("journal_entries", &[]).await.unwrap(), 0, "{}", adapter.kind());
        assert_eq!(adapter.count("journal_entry_lines", &[]).await.unwrap(), 0, "{}", adapter.kind());

        // The number was not consumed.
        let revenue = account_id(&adapter, "4000").await;
        let posted = ledger.post_entry(sale(cash, revenue, dec!(40))).await.unwrap();
        assert_eq!(posted.entry_number, "JE-2024-00001", "{}", adapter.kind());
    }
}

#[tokio::test]
async fn tampered_entry_fails_verification() {
    for adapter in all_backends().await {
        let ledger = ledger_for(&adapter);
        let cash = account_id(&adapter, "1000").await;
        let revenue = account_id(&adapter, "4000").await;
        let posted = ledger.post_entry(sale(cash, revenue, dec!(75))).await.unwrap();

        let mut partial = serde_json::Map::new();
        partial.insert("credit".to_string(), json!("70"));
        adapter
            .update("journal_entry_lines", posted.line_ids[1], partial)
            .await
            .unwrap();

        assert!(!ledger.verify_entry(posted.id).await.unwrap(), "{}", adapter.kind());
    }
}

#[tokio::test]
async fn totals_for_a_missing_entry_is_an_error() {
    let adapter = common::migrated(common::object_store().await).await;
    let ledger = ledger_for(&adapter);
    assert!(matches!(
        ledger.entry_totals(404).await,
        Err(LedgerError::EntryNotFound { id: 404 })
    ));
}
