//! Catalog readers.
//!
//! A reader turns what a live database reports about itself into a
//! [`SchemaModel`] the differ can compare against the declared one. Values
//! are taken as the catalog spells them; defaults, expressions and type
//! aliases are reconciled by the differ's normalization, not here.
//!
//! Views and generated column expressions are only as good as the ledger:
//! a view is part of the snapshot when the ledger records it, and its
//! expression is the recorded text.

mod mysql;
mod postgres;
mod sqlite;

use std::collections::{BTreeSet, HashMap};

use oxide_sync_core::dialect::{DialectKind, MigrationDialect};
use oxide_sync_core::ledger::{LedgerKind, LedgerRow, DEFAULT_LEDGER_TABLE};
use oxide_sync_core::projector::referenced_relations;
use oxide_sync_core::schema::{qualify, SchemaModel, Table, View};
use oxide_sync_core::sql::SqlValue;
use tracing::{debug, info, warn};

use crate::connection::{CatalogRow, Connection};
use crate::error::{Result, SyncError};
use crate::ledger::{list_records, DEFAULT_MIGRATIONS_TABLE};

/// What part of the database a snapshot covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogFilter {
    /// Schemas (databases on MySQL) to read. Empty means the connection's
    /// current schema.
    pub schemas: Vec<String>,
    /// Ledger table, excluded from the snapshot.
    pub ledger_table: String,
    /// Applied-migrations table, excluded from the snapshot.
    pub migrations_table: String,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            schemas: Vec::new(),
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
        }
    }
}

impl CatalogFilter {
    /// Creates the default filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a schema to read.
    #[must_use]
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schemas.push(schema.into());
        self
    }

    /// Sets the ledger table name.
    #[must_use]
    pub fn ledger_table(mut self, name: impl Into<String>) -> Self {
        self.ledger_table = name.into();
        self
    }

    /// Sets the applied-migrations table name.
    #[must_use]
    pub fn migrations_table(mut self, name: impl Into<String>) -> Self {
        self.migrations_table = name.into();
        self
    }

    /// Whether `table` is bookkeeping rather than user schema.
    #[must_use]
    pub fn is_excluded(&self, table: &str) -> bool {
        table == self.ledger_table || table == self.migrations_table
    }
}

/// Reads the schema of the connected database.
pub async fn read<C: Connection>(connection: &C, filter: &CatalogFilter) -> Result<SchemaModel> {
    let dialect = connection.dialect();
    let model = match dialect.kind() {
        DialectKind::Postgres => postgres::read(connection, filter).await?,
        DialectKind::Mysql => mysql::read(connection, filter).await?,
        DialectKind::Sqlite => sqlite::read(connection, filter).await?,
    };
    info!(
        dialect = dialect.name(),
        tables = model.tables.len(),
        views = model.views.len(),
        enum_types = model.enum_types.len(),
        ledger = model.ledger_present,
        "Read catalog"
    );
    Ok(model)
}

/// Runs a catalog query, mapping failures to [`SyncError::Introspection`].
pub(crate) async fn fetch<C: Connection>(
    connection: &C,
    sql: &str,
    parameters: &[SqlValue],
) -> Result<Vec<CatalogRow>> {
    debug!(sql = %sql, "Reading catalog");
    connection
        .query(sql, parameters)
        .await
        .map_err(|source| SyncError::introspection(sql, source))
}

/// Ledger rows, or none when the ledger table does not exist yet.
async fn ledger_records<C: Connection>(
    connection: &C,
    filter: &CatalogFilter,
    present: bool,
) -> Result<Vec<LedgerRow>> {
    if present {
        list_records(connection, &filter.ledger_table).await
    } else {
        Ok(Vec::new())
    }
}

/// Comma separated placeholders for `count` parameters after `offset`.
fn placeholders(dialect: &dyn MigrationDialect, offset: usize, count: usize) -> String {
    (offset + 1..=offset + count)
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Tables in catalog order with lookup by key.
#[derive(Debug, Default)]
struct TableSet {
    tables: Vec<Table>,
    positions: HashMap<String, usize>,
}

impl TableSet {
    fn insert(&mut self, table: Table) {
        self.positions.insert(table.key(), self.tables.len());
        self.tables.push(table);
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut Table> {
        let position = *self.positions.get(key)?;
        self.tables.get_mut(position)
    }

    fn get(&self, key: &str) -> Option<&Table> {
        self.positions.get(key).and_then(|&p| self.tables.get(p))
    }

    fn keys(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }

    fn into_tables(self) -> Vec<Table> {
        self.tables
    }
}

/// Recorded generated column expressions keyed by `schema.table.column`.
fn generated_expressions(records: &[LedgerRow]) -> HashMap<String, String> {
    records
        .iter()
        .filter(|r| r.kind == LedgerKind::GeneratedColumn)
        .map(|r| (qualify(r.schema.as_deref(), &r.name), r.value.clone()))
        .collect()
}

fn generated_key(schema: Option<&str>, table: &str, column: &str) -> String {
    qualify(schema, &format!("{table}.{column}"))
}

/// Builds the views that exist in the catalog and have a ledger row.
///
/// `catalog_views` maps view keys to their materialized flag. Dependencies
/// are the relation names in the recorded expression that resolve to a
/// table or a tracked view; `default_schema` is dropped from qualified
/// references so they match unqualified keys.
fn tracked_views(
    records: &[LedgerRow],
    catalog_views: &HashMap<String, bool>,
    table_keys: &BTreeSet<String>,
    default_schema: Option<&str>,
) -> Vec<View> {
    let mut views: Vec<View> = Vec::new();
    for record in records {
        let materialized = match record.kind {
            LedgerKind::View => false,
            LedgerKind::MaterializedView => true,
            _ => continue,
        };
        let key = qualify(record.schema.as_deref(), &record.name);
        match catalog_views.get(&key) {
            Some(&is_materialized) if is_materialized == materialized => {}
            _ => {
                debug!(view = %key, "Ledger records a view the catalog does not have");
                continue;
            }
        }
        let mut view = View::new(record.name.clone(), record.value.clone());
        view.schema = record.schema.clone();
        view.materialized = materialized;
        views.push(view);
    }

    for key in catalog_views.keys() {
        if !views.iter().any(|v| &v.key() == key) {
            warn!(view = %key, "Ignoring view without a ledger record");
        }
    }

    let mut relations = table_keys.clone();
    relations.extend(views.iter().map(View::key));
    for view in &mut views {
        let own = view.key();
        view.dependencies = referenced_relations(&view.expression)
            .into_iter()
            .filter_map(|name| resolve_relation(&name, &relations, default_schema))
            .filter(|key| key != &own)
            .collect();
    }
    views
}

fn resolve_relation(
    name: &str,
    relations: &BTreeSet<String>,
    default_schema: Option<&str>,
) -> Option<String> {
    let unqualified = match (default_schema, name.split_once('.')) {
        (Some(schema), Some((prefix, rest))) if prefix.eq_ignore_ascii_case(schema) => rest,
        _ => name,
    };
    if relations.contains(unqualified) {
        return Some(unqualified.to_string());
    }
    relations
        .iter()
        .find(|key| key.eq_ignore_ascii_case(unqualified))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_sync_core::dialect::PostgresDialect;

    fn record(kind: LedgerKind, name: &str, value: &str) -> LedgerRow {
        LedgerRow {
            kind,
            schema: None,
            name: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_filter_excludes_bookkeeping_tables() {
        let filter = CatalogFilter::new().ledger_table("meta");
        assert!(filter.is_excluded("meta"));
        assert!(filter.is_excluded(DEFAULT_MIGRATIONS_TABLE));
        assert!(!filter.is_excluded(DEFAULT_LEDGER_TABLE));
        assert!(!filter.is_excluded("users"));
    }

    #[test]
    fn test_placeholders() {
        let dialect = PostgresDialect::new();
        assert_eq!(placeholders(&dialect, 0, 2), "$1, $2");
        assert_eq!(placeholders(&dialect, 2, 1), "$3");
    }

    #[test]
    fn test_tracked_views_need_ledger_and_catalog() {
        let records = vec![
            record(LedgerKind::View, "a", "SELECT * FROM public.\"T\""),
            record(LedgerKind::View, "b", "SELECT * FROM a JOIN t ON true"),
            record(LedgerKind::View, "gone", "SELECT 1"),
            record(LedgerKind::EnumType, "status", "[\"A\"]"),
        ];
        let catalog: HashMap<String, bool> = [("a", false), ("b", false), ("untracked", false)]
            .into_iter()
            .map(|(k, m)| (k.to_string(), m))
            .collect();
        let tables: BTreeSet<String> = ["t".to_string()].into_iter().collect();

        let views = tracked_views(&records, &catalog, &tables, Some("public"));
        let names: Vec<&str> = views.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(views[0].dependencies, ["t".to_string()].into_iter().collect());
        assert_eq!(
            views[1].dependencies,
            ["a".to_string(), "t".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_materialized_flag_must_match() {
        let records = vec![record(LedgerKind::MaterializedView, "m", "SELECT 1")];
        let catalog: HashMap<String, bool> = [("m".to_string(), false)].into_iter().collect();
        assert!(tracked_views(&records, &catalog, &BTreeSet::new(), None).is_empty());
    }

    #[test]
    fn test_generated_expressions_keys() {
        let mut row = record(LedgerKind::GeneratedColumn, "users.full_name", "first || last");
        row.schema = Some("app".into());
        let expressions = generated_expressions(&[row]);
        assert_eq!(
            expressions.get(&generated_key(Some("app"), "users", "full_name")),
            Some(&"first || last".to_string())
        );
    }
}
