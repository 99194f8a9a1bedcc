//! Reading the ledger and tracking applied migrations.
//!
//! The ledger rows themselves are written by the synthesized up/down
//! queues; this module only reads them back. [`MigrationHistory`] keeps the
//! names of recorded `build` runs in a separate table.

use chrono::{DateTime, Utc};
use oxide_sync_core::ledger::{Ledger, LedgerKind, LedgerRow};
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::catalog::fetch;
use crate::connection::Connection;
use crate::error::{Result, SyncError};

/// Default name of the applied-migrations table.
pub const DEFAULT_MIGRATIONS_TABLE: &str = "oxide_migrations";

/// Reads every ledger row from `table`. Rows of unknown kind are skipped.
pub async fn list_records<C: Connection>(connection: &C, table: &str) -> Result<Vec<LedgerRow>> {
    let query = Ledger::new(table, connection.dialect()).select();
    let rows = fetch(connection, &query.query, &query.parameters).await?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let kind_text = row.text("type").unwrap_or_default();
        let Some(kind) = LedgerKind::parse(&kind_text) else {
            debug!(kind = %kind_text, "Skipping ledger row of unknown kind");
            continue;
        };
        let Some(name) = row.text("name") else {
            continue;
        };
        records.push(LedgerRow {
            kind,
            schema: row.text("schema"),
            name,
            value: row.text("value").unwrap_or_default(),
        });
    }
    Ok(records)
}

/// A recorded `build` run.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    /// Unique ID in the migrations table.
    pub id: i64,
    /// Migration name.
    pub name: String,
    /// When the migration was applied.
    pub applied_at: DateTime<Utc>,
}

/// Manages the applied-migrations table.
pub struct MigrationHistory {
    pool: SqlitePool,
    table: String,
}

impl MigrationHistory {
    /// Creates a history manager over `table`.
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }

    fn table(&self) -> String {
        format!("\"{}\"", self.table.replace('"', "\"\""))
    }

    /// Ensures the migrations table exists.
    pub async fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
)",
            self.table()
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Records a migration as applied.
    pub async fn record_applied(&self, name: &str) -> Result<()> {
        let sql = format!("INSERT INTO {} (name) VALUES (?)", self.table());
        sqlx::query(&sql).bind(name).execute(&self.pool).await?;
        Ok(())
    }

    /// Removes a migration record.
    pub async fn record_unapplied(&self, name: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE name = ?", self.table());
        let result = sqlx::query(&sql).bind(name).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::MigrationNotFound {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Checks if a migration has been applied.
    pub async fn is_applied(&self, name: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE name = ?", self.table());
        let row: Option<(i64,)> = sqlx::query_as(&sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Gets all applied migrations, oldest first.
    pub async fn get_applied(&self) -> Result<Vec<AppliedMigration>> {
        let sql = format!("SELECT id, name, applied_at FROM {} ORDER BY id", self.table());
        let rows: Vec<(i64, String, String)> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|(id, name, value)| match parse_timestamp(&value) {
                Ok(applied_at) => Ok(AppliedMigration {
                    id,
                    name,
                    applied_at,
                }),
                Err(source) => Err(SyncError::InvalidTimestamp { name, value, source }),
            })
            .collect()
    }
}

fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // SQLite datetime('now') format
            chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S").map(|dt| dt.and_utc())
        })
}
