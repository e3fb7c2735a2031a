// src/commands.rs
// Storage and ledger commands for the desktop shell.

// Command functions must not depend on any UI framework so the engine stays
// framework-agnostic. The shell registers thin wrappers that call these.

use serde_json::{json, Value};

use crate::ledger_mod::NewJournalEntry;
use crate::storage::{QueryFilter, QueryOptions, Record, RecordId};

pub use crate::state_mod::AppStateType;

/// Tables whose name starts with `_` belong to the engine itself.
fn ensure_public_table(table: &str) -> Result<(), String> {
    if table.starts_with('_') {
        return Err(format!("Table '{}' is reserved", table));
    }
    Ok(())
}

fn into_record(value: Value) -> Result<Record, String> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("Expected a JSON object, got {}", other)),
    }
}

/// Backend, capabilities and migration state.
pub async fn system_status(state: AppStateType) -> Result<Value, String> {
    let app_state = state.read().await;
    let status = app_state.system_status();

    serde_json::to_value(status).map_err(|e| e.to_string())
}

pub async fn insert_record(state: AppStateType, table: String, record: Value) -> Result<Value, String> {
    ensure_public_table(&table)?;
    let record = into_record(record)?;
    let storage = state.read().await.storage.clone();

    let id = storage.insert(&table, record).await.map_err(|e| e.to_string())?;
    Ok(json!({ "id": id }))
}

pub async fn update_record(state: AppStateType, table: String, id: RecordId, partial: Value) -> Result<Value, String> {
    ensure_public_table(&table)?;
    let partial = into_record(partial)?;
    let storage = state.read().await.storage.clone();

    let updated = storage.update(&table, id, partial).await.map_err(|e| e.to_string())?;
    Ok(json!({ "updated": updated }))
}

pub async fn delete_record(state: AppStateType, table: String, id: RecordId) -> Result<Value, String> {
    ensure_public_table(&table)?;
    let storage = state.read().await.storage.clone();

    let deleted = storage.delete(&table, id).await.map_err(|e| e.to_string())?;
    Ok(json!({ "deleted": deleted }))
}

/// The record, or `null` when there is none.
pub async fn get_record(state: AppStateType, table: String, id: RecordId) -> Result<Value, String> {
    let storage = state.read().await.storage.clone();

    match storage.find_by_id(&table, id).await {
        Ok(Some(record)) => Ok(Value::Object(record)),
        Ok(None) => Ok(Value::Null),
        Err(e) => Err(e.to_string()),
    }
}

/// `options` is a serialized `QueryOptions`; `null` lists everything.
pub async fn list_records(state: AppStateType, table: String, options: Value) -> Result<Value, String> {
    let options: QueryOptions = if options.is_null() {
        QueryOptions::default()
    } else {
        serde_json::from_value(options).map_err(|e| format!("Invalid query options: {}", e))?
    };
    let storage = state.read().await.storage.clone();

    let records = storage.find_all(&table, &options).await.map_err(|e| e.to_string())?;
    Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
}

pub async fn count_records(state: AppStateType, table: String, filters: Value) -> Result<Value, String> {
    let filters: Vec<QueryFilter> = if filters.is_null() {
        Vec::new()
    } else {
        serde_json::from_value(filters).map_err(|e| format!("Invalid filters: {}", e))?
    };
    let storage = state.read().await.storage.clone();

    let count = storage.count(&table, &filters).await.map_err(|e| e.to_string())?;
    Ok(json!({ "count": count }))
}

/// Preview of the next number. Two callers can see the same value; writers
/// that need a guaranteed-unique number go through the ledger or
/// `DocumentNumberGenerator::insert_numbered`.
pub async fn next_document_number(
    state: AppStateType,
    prefix: String,
    table: String,
    field: String,
) -> Result<Value, String> {
    let numbers = state.read().await.numbers.clone();

    let number = numbers.next_number(&prefix, &table, &field).await.map_err(|e| e.to_string())?;
    Ok(json!({ "number": number }))
}

pub async fn post_journal_entry(state: AppStateType, entry: Value) -> Result<Value, String> {
    let entry: NewJournalEntry =
        serde_json::from_value(entry).map_err(|e| format!("Invalid journal entry: {}", e))?;
    let ledger = state.read().await.ledger.clone();

    let posted = ledger.post_entry(entry).await.map_err(|e| e.to_string())?;
    serde_json::to_value(posted).map_err(|e| e.to_string())
}
