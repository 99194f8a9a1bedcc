//! PostgreSQL catalog reader.
//!
//! Tables in the connection's current schema are reported without a
//! schema qualifier, matching how unqualified entities are projected.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use oxide_sync_core::ledger::{LedgerKind, LedgerRow};
use oxide_sync_core::normalize::is_character_type;
use oxide_sync_core::schema::{
    CheckConstraint, Column, Deferrable, ForeignKey, ForeignKeyAction, GeneratedKind, Generation,
    IdentityPolicy, Index, NamedEnumType, SchemaModel, Table, UniqueConstraint,
};
use oxide_sync_core::sql::SqlValue;

use super::{
    fetch, generated_expressions, generated_key, ledger_records, placeholders, tracked_views,
    CatalogFilter, TableSet,
};
use crate::connection::{CatalogRow, Connection};
use crate::error::Result;

const CURRENT_SCHEMA_SQL: &str = "SELECT current_schema() AS schema_name";

fn tables_sql(list: &str) -> String {
    format!(
        "SELECT table_schema, table_name, table_type FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE' AND table_schema IN ({list})"
    )
}

fn views_sql(list: &str) -> String {
    format!(
        "SELECT schemaname AS schema_name, viewname AS view_name, false AS materialized \
         FROM pg_views WHERE schemaname IN ({list}) \
         UNION ALL \
         SELECT schemaname, matviewname, true FROM pg_matviews WHERE schemaname IN ({list})"
    )
}

fn columns_sql(list: &str) -> String {
    format!(
        "SELECT c.table_schema, c.table_name, c.column_name, c.data_type, c.udt_schema, \
         c.udt_name, c.is_nullable, c.column_default, c.character_maximum_length, \
         c.numeric_precision, c.numeric_scale, c.is_identity, c.identity_generation, \
         c.is_generated, c.generation_expression, c.collation_name, \
         col_description(format('%I.%I', c.table_schema, c.table_name)::regclass, c.ordinal_position) AS comment \
         FROM information_schema.columns c \
         JOIN information_schema.tables t ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
         WHERE t.table_type = 'BASE TABLE' AND c.table_schema IN ({list}) \
         ORDER BY c.table_schema, c.table_name, c.ordinal_position"
    )
}

fn enums_sql(list: &str) -> String {
    format!(
        "SELECT n.nspname AS schema_name, t.typname AS type_name, e.enumlabel AS label \
         FROM pg_type t \
         JOIN pg_enum e ON e.enumtypid = t.oid \
         JOIN pg_namespace n ON n.oid = t.typnamespace \
         WHERE n.nspname IN ({list}) \
         ORDER BY n.nspname, t.typname, e.enumsortorder"
    )
}

fn keys_sql(list: &str) -> String {
    format!(
        "SELECT n.nspname AS table_schema, cl.relname AS table_name, c.conname AS constraint_name, \
         c.contype::text AS constraint_type, a.attname AS column_name \
         FROM pg_constraint c \
         JOIN pg_class cl ON cl.oid = c.conrelid \
         JOIN pg_namespace n ON n.oid = cl.relnamespace \
         CROSS JOIN LATERAL unnest(c.conkey) WITH ORDINALITY AS k(attnum, position) \
         JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
         WHERE c.contype IN ('p', 'u') AND n.nspname IN ({list}) \
         ORDER BY n.nspname, cl.relname, c.conname, k.position"
    )
}

fn checks_sql(list: &str) -> String {
    format!(
        "SELECT n.nspname AS table_schema, cl.relname AS table_name, c.conname AS constraint_name, \
         pg_get_constraintdef(c.oid) AS definition \
         FROM pg_constraint c \
         JOIN pg_class cl ON cl.oid = c.conrelid \
         JOIN pg_namespace n ON n.oid = cl.relnamespace \
         WHERE c.contype = 'c' AND n.nspname IN ({list})"
    )
}

fn foreign_keys_sql(list: &str) -> String {
    format!(
        "SELECT n.nspname AS table_schema, cl.relname AS table_name, c.conname AS constraint_name, \
         a.attname AS column_name, fn.nspname AS referenced_schema, fcl.relname AS referenced_table, \
         fa.attname AS referenced_column, c.confupdtype::text AS on_update, \
         c.confdeltype::text AS on_delete, c.condeferrable AS is_deferrable, \
         c.condeferred AS is_deferred \
         FROM pg_constraint c \
         JOIN pg_class cl ON cl.oid = c.conrelid \
         JOIN pg_namespace n ON n.oid = cl.relnamespace \
         JOIN pg_class fcl ON fcl.oid = c.confrelid \
         JOIN pg_namespace fn ON fn.oid = fcl.relnamespace \
         CROSS JOIN LATERAL unnest(c.conkey, c.confkey) WITH ORDINALITY AS k(attnum, fattnum, position) \
         JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = k.attnum \
         JOIN pg_attribute fa ON fa.attrelid = c.confrelid AND fa.attnum = k.fattnum \
         WHERE c.contype = 'f' AND n.nspname IN ({list}) \
         ORDER BY n.nspname, cl.relname, c.conname, k.position"
    )
}

fn indices_sql(list: &str) -> String {
    format!(
        "SELECT n.nspname AS table_schema, t.relname AS table_name, i.relname AS index_name, \
         ix.indisunique AS is_unique, am.amname AS method, \
         pg_get_expr(ix.indpred, ix.indrelid) AS condition, \
         pg_get_expr(ix.indexprs, ix.indrelid) AS expression, \
         array_to_string(ARRAY( \
             SELECT a.attname FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, position) \
             JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = k.attnum \
             ORDER BY k.position), ',') AS column_names \
         FROM pg_index ix \
         JOIN pg_class t ON t.oid = ix.indrelid \
         JOIN pg_class i ON i.oid = ix.indexrelid \
         JOIN pg_namespace n ON n.oid = t.relnamespace \
         JOIN pg_am am ON am.oid = i.relam \
         WHERE NOT ix.indisprimary AND t.relkind = 'r' AND n.nspname IN ({list}) \
         AND NOT EXISTS (SELECT 1 FROM pg_constraint c WHERE c.conindid = ix.indexrelid \
         AND c.contype IN ('p', 'u', 'x'))"
    )
}

/// Schema names as the reader reports them.
struct Schemas {
    current: String,
    names: Vec<String>,
}

impl Schemas {
    /// `None` for the current schema.
    fn qualifier(&self, schema: &str) -> Option<String> {
        (schema != self.current).then(|| schema.to_string())
    }

    fn key(&self, row: &CatalogRow, schema_column: &str, name_column: &str) -> String {
        let schema = row.text(schema_column).unwrap_or_default();
        let name = row.text(name_column).unwrap_or_default();
        oxide_sync_core::schema::qualify(self.qualifier(&schema).as_deref(), &name)
    }
}

pub(super) async fn read<C: Connection>(connection: &C, filter: &CatalogFilter) -> Result<SchemaModel> {
    let dialect = connection.dialect();
    let current = fetch(connection, CURRENT_SCHEMA_SQL, &[])
        .await?
        .first()
        .and_then(|r| r.text("schema_name"))
        .unwrap_or_else(|| "public".to_string());
    let schemas = Schemas {
        names: if filter.schemas.is_empty() {
            vec![current.clone()]
        } else {
            filter.schemas.clone()
        },
        current,
    };
    let list = placeholders(dialect, 0, schemas.names.len());
    let parameters: Vec<SqlValue> = schemas.names.iter().map(|s| SqlValue::from(s.as_str())).collect();

    let mut tables = TableSet::default();
    let mut ledger_present = false;
    for row in fetch(connection, &tables_sql(&list), &parameters).await? {
        let name = row.text("table_name").unwrap_or_default();
        let schema = schemas.qualifier(&row.text("table_schema").unwrap_or_default());
        if schema.is_none() && name == filter.ledger_table {
            ledger_present = true;
        }
        if filter.is_excluded(&name) {
            continue;
        }
        let mut table = Table::new(name);
        table.schema = schema;
        tables.insert(table);
    }

    let records = ledger_records(connection, filter, ledger_present).await?;
    let generated = generated_expressions(&records);

    let mut labels: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for row in fetch(connection, &enums_sql(&list), &parameters).await? {
        let key = (
            row.text("schema_name").unwrap_or_default(),
            row.text("type_name").unwrap_or_default(),
        );
        labels
            .entry(key)
            .or_default()
            .extend(row.text("label"));
    }

    let mut used_enums: BTreeSet<(String, String)> = BTreeSet::new();
    for row in fetch(connection, &columns_sql(&list), &parameters).await? {
        let key = schemas.key(&row, "table_schema", "table_name");
        let Some(table) = tables.get_mut(&key) else {
            continue;
        };
        let column = column(&row, table, &labels, &generated, &mut used_enums);
        table.columns.push(column);
    }

    read_keys(connection, &schemas, &list, &parameters, &mut tables).await?;
    read_checks(connection, &schemas, &list, &parameters, &mut tables).await?;
    read_foreign_keys(connection, &schemas, &list, &parameters, &mut tables).await?;
    read_indices(connection, &schemas, &list, &parameters, &mut tables).await?;

    let enum_types = enum_types(&schemas, labels, &used_enums, &records);

    let mut catalog_views: HashMap<String, bool> = HashMap::new();
    for row in fetch(connection, &views_sql(&list), &parameters).await? {
        catalog_views.insert(
            schemas.key(&row, "schema_name", "view_name"),
            row.flag("materialized"),
        );
    }
    let views = tracked_views(
        &records,
        &catalog_views,
        &tables.keys(),
        Some(schemas.current.as_str()),
    );

    Ok(SchemaModel {
        tables: tables.into_tables(),
        views,
        enum_types,
        ledger_present,
        default_collations: BTreeMap::new(),
    })
}

fn column(
    row: &CatalogRow,
    table: &Table,
    labels: &BTreeMap<(String, String), Vec<String>>,
    generated: &HashMap<String, String>,
    used_enums: &mut BTreeSet<(String, String)>,
) -> Column {
    let name = row.text("column_name").unwrap_or_default();
    let data_type = row.text("data_type").unwrap_or_default().to_lowercase();
    let udt_schema = row.text("udt_schema").unwrap_or_default();
    let udt_name = row.text("udt_name").unwrap_or_default();

    let mut column = Column::new(name, data_type.clone());
    let element = match data_type.as_str() {
        "array" => {
            column.is_array = true;
            udt_name.trim_start_matches('_').to_string()
        }
        "user-defined" => udt_name.clone(),
        _ => String::new(),
    };
    if !element.is_empty() {
        let enum_key = (udt_schema, element.clone());
        if let Some(values) = labels.get(&enum_key) {
            column.data_type = "enum".to_string();
            column.enum_name = Some(element);
            column.enum_values = values.clone();
            used_enums.insert(enum_key);
        } else {
            column.data_type = element;
        }
    }

    if is_character_type(&column.data_type) {
        column.length = row.uint("character_maximum_length");
    }
    if column.data_type == "numeric" {
        column.precision = row.uint("numeric_precision");
        column.scale = row.uint("numeric_scale");
    }
    column.nullable = row.text("is_nullable").as_deref() == Some("YES");
    column.collation = row.text("collation_name");
    column.comment = row.text("comment");

    match row.text("column_default") {
        Some(default) if default.starts_with("nextval(") => {
            column.generation = Some(Generation::Increment);
        }
        Some(default)
            if matches!(
                default.trim().to_lowercase().as_str(),
                "gen_random_uuid()" | "uuid_generate_v4()"
            ) =>
        {
            column.generation = Some(Generation::Uuid);
        }
        other => column.default = other,
    }

    if row.text("is_identity").as_deref() == Some("YES") {
        let policy = match row.text("identity_generation").as_deref() {
            Some("ALWAYS") => IdentityPolicy::Always,
            _ => IdentityPolicy::ByDefault,
        };
        column.generation = Some(Generation::Identity(policy));
    }
    if row.text("is_generated").as_deref() == Some("ALWAYS") {
        let key = generated_key(table.schema.as_deref(), &table.name, &column.name);
        let expression = generated
            .get(&key)
            .cloned()
            .or_else(|| row.text("generation_expression"))
            .unwrap_or_default();
        column.default = None;
        column = column.generated_as(expression, GeneratedKind::Stored);
    }
    column
}

async fn read_keys<C: Connection>(
    connection: &C,
    schemas: &Schemas,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<()> {
    let mut uniques: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
    for row in fetch(connection, &keys_sql(list), parameters).await? {
        let key = schemas.key(&row, "table_schema", "table_name");
        let column = row.text("column_name").unwrap_or_default();
        if row.text("constraint_type").as_deref() == Some("p") {
            let Some(table) = tables.get_mut(&key) else {
                continue;
            };
            table.primary_key_name = row.text("constraint_name");
            if let Some(target) = table.columns.iter_mut().find(|c| c.name == column) {
                target.primary = true;
            }
        } else {
            uniques
                .entry((key, row.text("constraint_name").unwrap_or_default()))
                .or_default()
                .push(column);
        }
    }
    for ((key, name), columns) in uniques {
        if let Some(table) = tables.get_mut(&key) {
            table.uniques.push(UniqueConstraint { name, columns });
        }
    }
    Ok(())
}

async fn read_checks<C: Connection>(
    connection: &C,
    schemas: &Schemas,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<()> {
    for row in fetch(connection, &checks_sql(list), parameters).await? {
        let key = schemas.key(&row, "table_schema", "table_name");
        let Some(table) = tables.get_mut(&key) else {
            continue;
        };
        let definition = row.text("definition").unwrap_or_default();
        table.checks.push(CheckConstraint {
            name: row.text("constraint_name").unwrap_or_default(),
            expression: check_expression(&definition),
        });
    }
    Ok(())
}

/// `CHECK ((a > 0)) NOT VALID` to `(a > 0)`.
fn check_expression(definition: &str) -> String {
    let mut text = definition.trim();
    for suffix in ["NOT VALID", "NO INHERIT"] {
        text = text.strip_suffix(suffix).unwrap_or(text).trim_end();
    }
    text.strip_prefix("CHECK").unwrap_or(text).trim().to_string()
}

async fn read_foreign_keys<C: Connection>(
    connection: &C,
    schemas: &Schemas,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<()> {
    let mut foreign_keys: BTreeMap<(String, String), ForeignKey> = BTreeMap::new();
    for row in fetch(connection, &foreign_keys_sql(list), parameters).await? {
        let key = schemas.key(&row, "table_schema", "table_name");
        let name = row.text("constraint_name").unwrap_or_default();
        let fk = foreign_keys.entry((key, name.clone())).or_insert_with(|| {
            let deferrable = if !row.flag("is_deferrable") {
                None
            } else if row.flag("is_deferred") {
                Some(Deferrable::InitiallyDeferred)
            } else {
                Some(Deferrable::InitiallyImmediate)
            };
            ForeignKey {
                name,
                columns: Vec::new(),
                referenced_schema: schemas
                    .qualifier(&row.text("referenced_schema").unwrap_or_default()),
                referenced_table: row.text("referenced_table").unwrap_or_default(),
                referenced_columns: Vec::new(),
                on_delete: action(row.text("on_delete").as_deref()),
                on_update: action(row.text("on_update").as_deref()),
                deferrable,
            }
        });
        fk.columns.extend(row.text("column_name"));
        fk.referenced_columns.extend(row.text("referenced_column"));
    }
    for ((key, _), fk) in foreign_keys {
        if let Some(table) = tables.get_mut(&key) {
            table.foreign_keys.push(fk);
        }
    }
    Ok(())
}

/// Decodes `pg_constraint.confdeltype` / `confupdtype`.
fn action(code: Option<&str>) -> ForeignKeyAction {
    match code {
        Some("r") => ForeignKeyAction::Restrict,
        Some("c") => ForeignKeyAction::Cascade,
        Some("n") => ForeignKeyAction::SetNull,
        Some("d") => ForeignKeyAction::SetDefault,
        _ => ForeignKeyAction::NoAction,
    }
}

async fn read_indices<C: Connection>(
    connection: &C,
    schemas: &Schemas,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<()> {
    for row in fetch(connection, &indices_sql(list), parameters).await? {
        let key = schemas.key(&row, "table_schema", "table_name");
        let Some(table) = tables.get_mut(&key) else {
            continue;
        };
        let columns: Vec<String> = row
            .text("column_names")
            .unwrap_or_default()
            .split(',')
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        let expression = row.text("expression");
        let mut index = Index::new(
            row.text("index_name").unwrap_or_default(),
            if expression.is_some() { Vec::new() } else { columns },
        );
        index.unique = row.flag("is_unique");
        index.spatial = row.text("method").as_deref() == Some("gist");
        index.where_clause = row.text("condition");
        index.expression = expression;
        table.indices.push(index);
    }
    Ok(())
}

/// Enum types used by a column or recorded in the ledger.
fn enum_types(
    schemas: &Schemas,
    labels: BTreeMap<(String, String), Vec<String>>,
    used: &BTreeSet<(String, String)>,
    records: &[LedgerRow],
) -> Vec<NamedEnumType> {
    labels
        .into_iter()
        .filter_map(|((schema, name), labels)| {
            let qualifier = schemas.qualifier(&schema);
            let recorded = records.iter().any(|r| {
                r.kind == LedgerKind::EnumType && r.name == name && r.schema == qualifier
            });
            (recorded || used.contains(&(schema, name.clone()))).then(|| NamedEnumType {
                name,
                schema: qualifier,
                labels,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expression() {
        assert_eq!(check_expression("CHECK ((age > 18))"), "((age > 18))");
        assert_eq!(check_expression("CHECK ((age > 18)) NOT VALID"), "((age > 18))");
    }

    #[test]
    fn test_action_codes() {
        assert_eq!(action(Some("c")), ForeignKeyAction::Cascade);
        assert_eq!(action(Some("n")), ForeignKeyAction::SetNull);
        assert_eq!(action(Some("a")), ForeignKeyAction::NoAction);
        assert_eq!(action(None), ForeignKeyAction::NoAction);
    }

    #[test]
    fn test_current_schema_is_unqualified() {
        let schemas = Schemas {
            current: "public".into(),
            names: vec!["public".into(), "audit".into()],
        };
        assert_eq!(schemas.qualifier("public"), None);
        assert_eq!(schemas.qualifier("audit").as_deref(), Some("audit"));
        let row = CatalogRow::new()
            .with("table_schema", "audit")
            .with("table_name", "events");
        assert_eq!(schemas.key(&row, "table_schema", "table_name"), "audit.events");
    }
}
