// src/migrations/runner.rs
// Applies pending migrations in order and records each in `_migrations`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use super::{all_migrations, Migration, MigrationStep};
use crate::storage::{QueryOptions, Record, SortDirection, StorageAdapter, StorageError, MIGRATIONS_TABLE};

const CREATE_BOOKKEEPING_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    executed_at TEXT NOT NULL
)";

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Versions already recorded before this run.
    pub previously_applied: Vec<u32>,
    /// Versions executed and recorded by this run.
    pub applied: Vec<u32>,
    /// Script versions recorded without running because the backend has no
    /// SQL engine and declares its schema natively.
    pub satisfied_natively: Vec<u32>,
}

impl MigrationReport {
    pub fn newly_recorded(&self) -> usize {
        self.applied.len() + self.satisfied_natively.len()
    }
}

pub struct MigrationRunner {
    adapter: Arc<dyn StorageAdapter>,
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self::with_migrations(adapter, all_migrations())
    }

    pub fn with_migrations(adapter: Arc<dyn StorageAdapter>, mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { adapter, migrations }
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    /// Bring the database to the latest version. Stops at the first failing
    /// migration, which stays unrecorded and is retried on the next run.
    pub async fn run(&self) -> Result<MigrationReport, StorageError> {
        self.ensure_bookkeeping().await?;
        let applied = self.applied_versions().await?;
        self.check_prefix(&applied)?;

        let mut report = MigrationReport {
            previously_applied: applied.iter().copied().collect(),
            ..MigrationReport::default()
        };

        for migration in self.migrations.iter().filter(|m| !applied.contains(&m.version)) {
            tracing::info!(version = migration.version, name = migration.name, "applying migration");
            match self.apply(migration).await {
                Ok(()) => report.applied.push(migration.version),
                Err(e) if e.is_unsupported_operation() && matches!(migration.step, MigrationStep::Script(_)) => {
                    tracing::info!(
                        version = migration.version,
                        backend = %self.adapter.kind(),
                        "script migration satisfied by native schema declaration"
                    );
                    report.satisfied_natively.push(migration.version);
                }
                Err(e) => {
                    tracing::error!(version = migration.version, name = migration.name, error = %e, "migration failed");
                    return Err(StorageError::MigrationFailed {
                        version: migration.version,
                        error: e.to_string(),
                    });
                }
            }
            self.record(migration).await?;
        }

        tracing::info!(
            applied = report.applied.len(),
            satisfied_natively = report.satisfied_natively.len(),
            previously_applied = report.previously_applied.len(),
            "migrations complete"
        );
        Ok(report)
    }

    /// Recorded migration rows, oldest first.
    pub async fn history(&self) -> Result<Vec<Record>, StorageError> {
        self.ensure_bookkeeping().await?;
        let options = QueryOptions::new().order_by("version", SortDirection::Asc);
        self.adapter.find_all(MIGRATIONS_TABLE, &options).await
    }

    /// SQL backends create the table on first run; the object store
    /// declares it when it opens.
    async fn ensure_bookkeeping(&self) -> Result<(), StorageError> {
        if self.adapter.capabilities().sql {
            self.adapter.execute_script(CREATE_BOOKKEEPING_TABLE).await?;
        }
        Ok(())
    }

    async fn applied_versions(&self) -> Result<BTreeSet<u32>, StorageError> {
        let rows = self.adapter.find_all(MIGRATIONS_TABLE, &QueryOptions::new()).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("version").and_then(Value::as_u64))
            .filter_map(|v| u32::try_from(v).ok())
            .collect())
    }

    /// Applied versions must be exactly the first N known migrations.
    fn check_prefix(&self, applied: &BTreeSet<u32>) -> Result<(), StorageError> {
        let known: BTreeSet<u32> = self.migrations.iter().map(|m| m.version).collect();
        if let Some(unknown) = applied.iter().find(|v| !known.contains(v)) {
            return Err(StorageError::MigrationFailed {
                version: *unknown,
                error: "database records a migration this build does not know".to_string(),
            });
        }
        let prefix = self.migrations.iter().take(applied.len());
        if let Some(gap) = prefix.map(|m| m.version).find(|v| !applied.contains(v)) {
            return Err(StorageError::MigrationFailed {
                version: gap,
                error: "applied migrations are not a prefix of the migration list".to_string(),
            });
        }
        Ok(())
    }

    async fn apply(&self, migration: &Migration) -> Result<(), StorageError> {
        match migration.step {
            MigrationStep::Script(script) => self.adapter.execute_script(script).await,
            MigrationStep::Function(function) => function(self.adapter.clone()).await,
        }
    }

    async fn record(&self, migration: &Migration) -> Result<(), StorageError> {
        let row = json!({
            "version": migration.version,
            "name": migration.name,
            "executed_at": Utc::now().to_rfc3339(),
        });
        let row = row.as_object().cloned().unwrap_or_default();
        self.adapter.insert(MIGRATIONS_TABLE, row).await?;
        Ok(())
    }
}
