//! Database connections.
//!
//! Catalog reads and statement execution go through the [`Connection`]
//! trait, so the reader and the runner work against any driver that can
//! return rows as loosely typed [`CatalogRow`]s. [`SqliteConnection`] is the
//! sqlx-backed implementation shipped with the crate.

use std::collections::BTreeMap;
use std::future::Future;
use std::str::FromStr;

use oxide_sync_core::dialect::{MigrationDialect, SqliteDialect};
use oxide_sync_core::sql::SqlValue;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::debug;

static NULL: SqlValue = SqlValue::Null;

/// A result row keyed by lowercased column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogRow {
    values: BTreeMap<String, SqlValue>,
}

impl CatalogRow {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    #[must_use]
    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    /// Sets a value.
    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.values.insert(column.to_lowercase(), value);
    }

    /// Value of `column`, NULL when absent.
    #[must_use]
    pub fn get(&self, column: &str) -> &SqlValue {
        self.values.get(&column.to_lowercase()).unwrap_or(&NULL)
    }

    /// Value of `column` as text. Numbers are formatted; NULL is `None`.
    #[must_use]
    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column) {
            SqlValue::Null => None,
            SqlValue::Text(text) => Some(text.clone()),
            SqlValue::Integer(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Bool(b) => Some(b.to_string()),
        }
    }

    /// Value of `column` as an integer.
    #[must_use]
    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).as_i64()
    }

    /// Value of `column` as an unsigned 32-bit number.
    #[must_use]
    pub fn uint(&self, column: &str) -> Option<u32> {
        self.int(column).and_then(|i| u32::try_from(i).ok())
    }

    /// Value of `column` as a flag (`YES`, `t`, `1`, ...).
    #[must_use]
    pub fn flag(&self, column: &str) -> bool {
        self.get(column).as_bool()
    }
}

/// A database the synchronizer can read from and write to.
///
/// Calls are issued strictly one after another; a run never overlaps two
/// calls on the same connection. Implementations must route every call of
/// a run to the same underlying session so that transaction statements
/// apply to the statements between them.
pub trait Connection: Send + Sync {
    /// The dialect of the connected database.
    fn dialect(&self) -> &dyn MigrationDialect;

    /// Runs a statement that returns rows.
    fn query(
        &self,
        sql: &str,
        parameters: &[SqlValue],
    ) -> impl Future<Output = Result<Vec<CatalogRow>, sqlx::Error>> + Send;

    /// Runs a statement and returns the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        parameters: &[SqlValue],
    ) -> impl Future<Output = Result<u64, sqlx::Error>> + Send;
}

// ============================================================================
// SQLite
// ============================================================================

/// SQLite connection over a single-connection sqlx pool.
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: SqlitePool,
    dialect: SqliteDialect,
}

impl SqliteConnection {
    /// Wraps an existing pool. The pool should hold at most one
    /// connection: `BEGIN` and `COMMIT` are sent as plain statements.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            dialect: SqliteDialect::new(),
        }
    }

    /// Opens `url`, creating the database file if needed.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// Returns the underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl Connection for SqliteConnection {
    fn dialect(&self) -> &dyn MigrationDialect {
        &self.dialect
    }

    async fn query(&self, sql: &str, parameters: &[SqlValue]) -> Result<Vec<CatalogRow>, sqlx::Error> {
        let rows = bind(sql, parameters).fetch_all(&self.pool).await?;
        debug!(rows = rows.len(), "Fetched rows");
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, parameters: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let result = bind(sql, parameters).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn bind<'q>(sql: &'q str, parameters: &[SqlValue]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    parameters
        .iter()
        .fold(sqlx::query(sql), |query, value| match value {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(b) => query.bind(*b),
            SqlValue::Integer(i) => query.bind(*i),
            SqlValue::Real(f) => query.bind(*f),
            SqlValue::Text(text) => query.bind(text.clone()),
        })
}

/// Decodes a row by the storage class of each value.
fn decode_row(row: &SqliteRow) -> Result<CatalogRow, sqlx::Error> {
    let mut decoded = CatalogRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        let value = if raw.is_null() {
            SqlValue::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => SqlValue::Integer(row.try_get_unchecked::<i64, _>(index)?),
                "REAL" | "NUMERIC" => SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?),
                "BLOB" => {
                    let bytes = row.try_get_unchecked::<Vec<u8>, _>(index)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
            }
        };
        decoded.insert(column.name(), value);
    }
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_connection() -> SqliteConnection {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("Failed to create in-memory SQLite pool");
        SqliteConnection::new(pool)
    }

    #[test]
    fn test_catalog_row_lookup_ignores_case() {
        let row = CatalogRow::new()
            .with("TABLE_NAME", "users")
            .with("character_maximum_length", 255_i64)
            .with("IS_NULLABLE", "YES");

        assert_eq!(row.text("table_name").as_deref(), Some("users"));
        assert_eq!(row.uint("CHARACTER_MAXIMUM_LENGTH"), Some(255));
        assert_eq!(row.text("character_maximum_length").as_deref(), Some("255"));
        assert!(row.flag("is_nullable"));
        assert!(row.get("missing").is_null());
        assert_eq!(row.text("missing"), None);
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let conn = create_test_connection().await;
        conn.execute("CREATE TABLE t (id INTEGER, name TEXT, score REAL)", &[])
            .await
            .unwrap();
        let inserted = conn
            .execute(
                "INSERT INTO t VALUES (?, ?, ?)",
                &[SqlValue::Integer(1), SqlValue::from("a"), SqlValue::Real(1.5)],
            )
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        conn.execute(
            "INSERT INTO t VALUES (?, ?, ?)",
            &[SqlValue::Integer(2), SqlValue::Null, SqlValue::Null],
        )
        .await
        .unwrap();

        let rows = conn
            .query("SELECT id, name, score FROM t ORDER BY id", &[])
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].int("id"), Some(1));
        assert_eq!(rows[0].text("name").as_deref(), Some("a"));
        assert_eq!(rows[0].get("score"), &SqlValue::Real(1.5));
        assert!(rows[1].get("name").is_null());
    }

    #[tokio::test]
    async fn test_dialect_is_sqlite() {
        let conn = create_test_connection().await;
        assert_eq!(conn.dialect().name(), "sqlite");
    }
}
