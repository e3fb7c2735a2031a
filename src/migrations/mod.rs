// src/migrations/mod.rs
// Ordered schema migrations, applied once per database by `MigrationRunner`.

pub mod runner;

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;

use crate::storage::{Record, StorageAdapter, StorageError};

pub use runner::{MigrationReport, MigrationRunner};

/// A data migration expressed as contract calls, so it runs on every backend.
pub type MigrationFn = fn(Arc<dyn StorageAdapter>) -> BoxFuture<'static, Result<(), StorageError>>;

#[derive(Clone, Copy)]
pub enum MigrationStep {
    /// SQL script. Backends without SQL satisfy it through their declared schema.
    Script(&'static str),
    Function(MigrationFn),
}

impl std::fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationStep::Script(script) => write!(f, "Script({} bytes)", script.len()),
            MigrationStep::Function(_) => f.write_str("Function"),
        }
    }
}

/// One migration. `version` is its position in the total order.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub step: MigrationStep,
}

impl Migration {
    pub const fn script(version: u32, name: &'static str, script: &'static str) -> Self {
        Self {
            version,
            name,
            step: MigrationStep::Script(script),
        }
    }

    pub const fn function(version: u32, name: &'static str, function: MigrationFn) -> Self {
        Self {
            version,
            name,
            step: MigrationStep::Function(function),
        }
    }
}

/// Every migration the application ships, in order.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        Migration::script(1, "baseline_schema", include_str!("../core-migrations/001_baseline.sql")),
        Migration::function(2, "seed_chart_of_accounts", seed_chart_of_accounts),
        Migration::script(3, "status_indexes", include_str!("../core-migrations/003_status_indexes.sql")),
    ]
}

const DEFAULT_ACCOUNTS: &[(&str, &str, &str)] = &[
    ("1000", "Cash", "asset"),
    ("1100", "Accounts Receivable", "asset"),
    ("1200", "Inventory", "asset"),
    ("2000", "Accounts Payable", "liability"),
    ("2100", "Sales Tax Payable", "liability"),
    ("3000", "Owner's Equity", "equity"),
    ("3100", "Retained Earnings", "equity"),
    ("4000", "Sales Revenue", "revenue"),
    ("5000", "Cost of Goods Sold", "expense"),
    ("6000", "Operating Expenses", "expense"),
    ("6100", "Rent Expense", "expense"),
    ("6200", "Utilities Expense", "expense"),
];

fn seed_chart_of_accounts(adapter: Arc<dyn StorageAdapter>) -> BoxFuture<'static, Result<(), StorageError>> {
    Box::pin(async move {
        if adapter.count("accounts", &[]).await? > 0 {
            tracing::info!("chart of accounts already present; skipping seed");
            return Ok(());
        }

        let created_at = Utc::now().to_rfc3339();
        let records: Vec<Record> = DEFAULT_ACCOUNTS
            .iter()
            .filter_map(|(code, name, account_type)| {
                json!({
                    "code": code,
                    "name": name,
                    "account_type": account_type,
                    "is_active": 1,
                    "created_at": created_at,
                })
                .as_object()
                .cloned()
            })
            .collect();

        let ids = adapter.bulk_insert("accounts", records).await?;
        tracing::info!(count = ids.len(), "seeded chart of accounts");
        Ok(())
    })
}
