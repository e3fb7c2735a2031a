mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use common::{all_backends, record};
use ledgerbook::sequence_mod::{DocumentNumberGenerator, NumberScope};
use ledgerbook::storage::{
    BackendInfo, BackendKind, Capabilities, QueryFilter, QueryOptions, Record, RecordId, StorageAdapter,
    StorageError,
};

fn journal_entry(number: &str) -> Record {
    record(json!({ "entry_number": number, "entry_date": "2024-06-30", "status": "posted" }))
}

#[tokio::test]
async fn je_2024_numbers_start_at_one_and_increment() {
    for adapter in all_backends().await {
        let numbers = DocumentNumberGenerator::new(adapter.clone());

        let first = numbers
            .next_number_for_year("JE", "journal_entries", "entry_number", 2024)
            .await
            .unwrap();
        assert_eq!(first, "JE-2024-00001", "{}", adapter.kind());

        adapter.insert("journal_entries", journal_entry(&first)).await.unwrap();

        let second = numbers
            .next_number_for_year("JE", "journal_entries", "entry_number", 2024)
            .await
            .unwrap();
        assert_eq!(second, "JE-2024-00002", "{}", adapter.kind());
    }
}

#[tokio::test]
async fn serial_issuance_has_no_gaps_or_repeats() {
    for adapter in all_backends().await {
        let numbers = DocumentNumberGenerator::new(adapter.clone());
        let mut issued = Vec::new();
        for _ in 0..12 {
            let (number, _) = numbers
                .insert_numbered_in_scope(
                    "INV",
                    "invoices",
                    "invoice_number",
                    NumberScope::Year(2024),
                    record(json!({ "status": "draft" })),
                )
                .await
                .unwrap();
            issued.push(number);
        }

        let expected: Vec<String> = (1..=12).map(|n| format!("INV-2024-{:05}", n)).collect();
        assert_eq!(issued, expected, "{}", adapter.kind());
    }
}

#[tokio::test]
async fn numbering_is_partitioned_by_prefix_and_year() {
    for adapter in all_backends().await {
        for number in ["JE-2023-00007", "XJE-2024-00050", "JE-2024-00003"] {
            adapter.insert("journal_entries", journal_entry(number)).await.unwrap();
        }
        let numbers = DocumentNumberGenerator::new(adapter.clone());

        let next_2024 = numbers
            .next_number_for_year("JE", "journal_entries", "entry_number", 2024)
            .await
            .unwrap();
        assert_eq!(next_2024, "JE-2024-00004", "{}", adapter.kind());

        let next_2023 = numbers
            .next_number_for_year("JE", "journal_entries", "entry_number", 2023)
            .await
            .unwrap();
        assert_eq!(next_2023, "JE-2023-00008", "{}", adapter.kind());

        let next_2025 = numbers
            .next_number_for_year("JE", "journal_entries", "entry_number", 2025)
            .await
            .unwrap();
        assert_eq!(next_2025, "JE-2025-00001", "{}", adapter.kind());
    }
}

#[tokio::test]
async fn entity_codes_have_no_year() {
    for adapter in all_backends().await {
        let numbers = DocumentNumberGenerator::new(adapter.clone());
        let code = numbers.next_code("CUST", "customers", "customer_code").await.unwrap();
        assert_eq!(code, "CUST-00001", "{}", adapter.kind());

        adapter
            .insert("customers", record(json!({ "customer_code": code, "display_name": "Acme" })))
            .await
            .unwrap();
        let code = numbers.next_code("CUST", "customers", "customer_code").await.unwrap();
        assert_eq!(code, "CUST-00002", "{}", adapter.kind());
    }
}

#[tokio::test]
async fn plain_next_number_does_not_reserve() {
    let adapter = common::migrated(common::desktop().await).await;
    let numbers = DocumentNumberGenerator::new(adapter);

    let a = numbers.next_number_for_year("PO", "purchase_orders", "po_number", 2024).await.unwrap();
    let b = numbers.next_number_for_year("PO", "purchase_orders", "po_number", 2024).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn concurrent_insert_numbered_issues_unique_numbers() {
    for adapter in all_backends().await {
        let numbers = Arc::new(DocumentNumberGenerator::new(adapter.clone()));
        let tasks = (0..8).map(|i| {
            let numbers = numbers.clone();
            async move {
                numbers
                    .insert_numbered_in_scope(
                        "BILL",
                        "bills",
                        "bill_number",
                        NumberScope::Year(2024),
                        record(json!({ "status": format!("draft-{}", i) })),
                    )
                    .await
            }
        });

        let mut issued: Vec<String> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|result| result.unwrap().0)
            .collect();
        issued.sort();
        let expected: Vec<String> = (1..=8).map(|n| format!("BILL-2024-{:05}", n)).collect();
        assert_eq!(issued, expected, "{}", adapter.kind());
    }
}

/// Delegating adapter that lets a competing writer take the number of the
/// first journal entry inserted through it.
struct RacingAdapter {
    inner: Arc<dyn StorageAdapter>,
    raced: AtomicBool,
}

#[async_trait]
impl StorageAdapter for RacingAdapter {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn initialize(&self) -> Result<BackendInfo, StorageError> {
        self.inner.initialize().await
    }

    async fn insert(&self, table: &str, record: Record) -> Result<RecordId, StorageError> {
        if table == "journal_entries" && !self.raced.swap(true, Ordering::SeqCst) {
            let mut competitor = record.clone();
            competitor.insert("memo".to_string(), Value::from("other writer"));
            self.inner.insert(table, competitor).await?;
        }
        self.inner.insert(table, record).await
    }

    async fn bulk_insert(&self, table: &str, records: Vec<Record>) -> Result<Vec<RecordId>, StorageError> {
        self.inner.bulk_insert(table, records).await
    }

    async fn update(&self, table: &str, id: RecordId, partial: Record) -> Result<bool, StorageError> {
        self.inner.update(table, id, partial).await
    }

    async fn delete(&self, table: &str, id: RecordId) -> Result<bool, StorageError> {
        self.inner.delete(table, id).await
    }

    async fn find_by_id(&self, table: &str, id: RecordId) -> Result<Option<Record>, StorageError> {
        self.inner.find_by_id(table, id).await
    }

    async fn find_all(&self, table: &str, options: &QueryOptions) -> Result<Vec<Record>, StorageError> {
        self.inner.find_all(table, options).await
    }

    async fn count(&self, table: &str, filters: &[QueryFilter]) -> Result<u64, StorageError> {
        self.inner.count(table, filters).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>, StorageError> {
        self.inner.query(sql, params).await
    }

    async fn execute_script(&self, script: &str) -> Result<(), StorageError> {
        self.inner.execute_script(script).await
    }

    async fn begin_transaction(&self) -> Result<(), StorageError> {
        self.inner.begin_transaction().await
    }

    async fn commit(&self) -> Result<(), StorageError> {
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), StorageError> {
        self.inner.rollback().await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

#[tokio::test]
async fn insert_numbered_retries_when_another_writer_wins() {
    for inner in all_backends().await {
        let backend = inner.kind();
        let adapter: Arc<dyn StorageAdapter> = Arc::new(RacingAdapter {
            inner: inner.clone(),
            raced: AtomicBool::new(false),
        });
        let numbers = DocumentNumberGenerator::new(adapter);

        let (number, id) = numbers
            .insert_numbered_in_scope(
                "JE",
                "journal_entries",
                "entry_number",
                NumberScope::Year(2024),
                journal_entry("placeholder"),
            )
            .await
            .unwrap();
        assert_eq!(number, "JE-2024-00002", "{}", backend);

        let stored = inner.find_by_id("journal_entries", id).await.unwrap().unwrap();
        assert_eq!(stored.get("entry_number"), Some(&json!("JE-2024-00002")), "{}", backend);

        let taken = inner
            .find_all(
                "journal_entries",
                &QueryOptions::new().filter(QueryFilter::equals("entry_number", "JE-2024-00001")),
            )
            .await
            .unwrap();
        assert_eq!(taken.len(), 1, "{}", backend);
        assert_eq!(taken[0].get("memo"), Some(&json!("other writer")), "{}", backend);
    }
}

#[tokio::test]
async fn insert_numbered_gives_up_after_max_retries() {
    let inner = common::migrated(common::object_store().await).await;
    let adapter: Arc<dyn StorageAdapter> = Arc::new(RacingAdapter {
        inner,
        raced: AtomicBool::new(false),
    });
    let numbers = DocumentNumberGenerator::with_max_retries(adapter, 0);

    let err = numbers
        .insert_numbered_in_scope(
            "JE",
            "journal_entries",
            "entry_number",
            NumberScope::Year(2024),
            journal_entry("placeholder"),
        )
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation(), "{:?}", err);
}

#[tokio::test]
async fn exhausted_sequence_is_an_error() {
    for adapter in all_backends().await {
        let last = format!("CUST-{}", u64::MAX);
        adapter
            .insert("customers", record(json!({ "customer_code": last, "display_name": "Last" })))
            .await
            .unwrap();

        let numbers = DocumentNumberGenerator::new(adapter.clone());
        let err = numbers.next_code("CUST", "customers", "customer_code").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidRecord { .. }), "{}: {:?}", adapter.kind(), err);
    }
}
