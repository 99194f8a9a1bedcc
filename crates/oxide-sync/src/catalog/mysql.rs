//! MySQL / MariaDB catalog reader.
//!
//! Everything is read from `information_schema`. MySQL has no schemas
//! inside a database, so tables are always reported unqualified.

use std::collections::{BTreeMap, HashMap, HashSet};

use oxide_sync_core::dialect::MigrationDialect;
use oxide_sync_core::normalize::{is_character_type, is_numeric_type};
use oxide_sync_core::schema::{
    CheckConstraint, Column, ForeignKey, ForeignKeyAction, GeneratedKind, Generation, Index,
    SchemaModel, Table,
};
use oxide_sync_core::sql::SqlValue;

use super::{
    fetch, generated_expressions, generated_key, ledger_records, placeholders, tracked_views,
    CatalogFilter, TableSet,
};
use crate::connection::{CatalogRow, Connection};
use crate::error::Result;

const CURRENT_DATABASE_SQL: &str = "SELECT DATABASE() AS schema_name";
const DEFAULT_COLLATIONS_SQL: &str = "SELECT CHARACTER_SET_NAME AS charset, COLLATION_NAME AS collation \
     FROM information_schema.COLLATIONS WHERE IS_DEFAULT = 'Yes'";

fn tables_sql(list: &str) -> String {
    format!(
        "SELECT TABLE_NAME AS table_name, TABLE_TYPE AS table_type, \
         TABLE_COLLATION AS table_collation FROM information_schema.TABLES \
         WHERE TABLE_SCHEMA IN ({list}) AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')"
    )
}

fn columns_sql(list: &str) -> String {
    format!(
        "SELECT TABLE_NAME AS table_name, COLUMN_NAME AS column_name, COLUMN_TYPE AS column_type, \
         DATA_TYPE AS data_type, IS_NULLABLE AS is_nullable, COLUMN_DEFAULT AS column_default, \
         CHARACTER_MAXIMUM_LENGTH AS character_maximum_length, \
         NUMERIC_PRECISION AS numeric_precision, NUMERIC_SCALE AS numeric_scale, \
         CHARACTER_SET_NAME AS character_set_name, COLLATION_NAME AS collation_name, \
         COLUMN_KEY AS column_key, EXTRA AS extra, COLUMN_COMMENT AS column_comment, \
         GENERATION_EXPRESSION AS generation_expression \
         FROM information_schema.COLUMNS WHERE TABLE_SCHEMA IN ({list}) \
         ORDER BY TABLE_NAME, ORDINAL_POSITION"
    )
}

fn indices_sql(list: &str) -> String {
    format!(
        "SELECT TABLE_NAME AS table_name, INDEX_NAME AS index_name, COLUMN_NAME AS column_name, \
         NON_UNIQUE AS non_unique, INDEX_TYPE AS index_type \
         FROM information_schema.STATISTICS \
         WHERE TABLE_SCHEMA IN ({list}) AND INDEX_NAME <> 'PRIMARY' \
         ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX"
    )
}

fn foreign_keys_sql(list: &str) -> String {
    format!(
        "SELECT k.TABLE_NAME AS table_name, k.CONSTRAINT_NAME AS constraint_name, \
         k.COLUMN_NAME AS column_name, k.REFERENCED_TABLE_NAME AS referenced_table, \
         k.REFERENCED_COLUMN_NAME AS referenced_column, r.UPDATE_RULE AS on_update, \
         r.DELETE_RULE AS on_delete \
         FROM information_schema.KEY_COLUMN_USAGE k \
         JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
         ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
         AND r.TABLE_NAME = k.TABLE_NAME \
         WHERE k.TABLE_SCHEMA IN ({list}) AND k.REFERENCED_TABLE_NAME IS NOT NULL \
         ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION"
    )
}

fn checks_sql(list: &str) -> String {
    format!(
        "SELECT t.TABLE_NAME AS table_name, t.CONSTRAINT_NAME AS constraint_name, \
         c.CHECK_CLAUSE AS check_clause \
         FROM information_schema.TABLE_CONSTRAINTS t \
         JOIN information_schema.CHECK_CONSTRAINTS c \
         ON c.CONSTRAINT_SCHEMA = t.CONSTRAINT_SCHEMA AND c.CONSTRAINT_NAME = t.CONSTRAINT_NAME \
         WHERE t.TABLE_SCHEMA IN ({list}) AND t.CONSTRAINT_TYPE = 'CHECK'"
    )
}

pub(super) async fn read<C: Connection>(connection: &C, filter: &CatalogFilter) -> Result<SchemaModel> {
    let dialect = connection.dialect();
    let databases = if filter.schemas.is_empty() {
        fetch(connection, CURRENT_DATABASE_SQL, &[])
            .await?
            .first()
            .and_then(|r| r.text("schema_name"))
            .into_iter()
            .collect()
    } else {
        filter.schemas.clone()
    };
    let list = placeholders(dialect, 0, databases.len().max(1));
    let parameters: Vec<SqlValue> = if databases.is_empty() {
        vec![SqlValue::Null]
    } else {
        databases.iter().map(|d| SqlValue::from(d.as_str())).collect()
    };

    let mut tables = TableSet::default();
    let mut catalog_views: HashMap<String, bool> = HashMap::new();
    let mut ledger_present = false;
    for row in fetch(connection, &tables_sql(&list), &parameters).await? {
        let name = row.text("table_name").unwrap_or_default();
        if row.text("table_type").as_deref() == Some("VIEW") {
            catalog_views.insert(name, false);
            continue;
        }
        if name == filter.ledger_table {
            ledger_present = true;
        }
        if !filter.is_excluded(&name) {
            let mut table = Table::new(name);
            table.collation = row.text("table_collation");
            tables.insert(table);
        }
    }

    let records = ledger_records(connection, filter, ledger_present).await?;
    let generated = generated_expressions(&records);

    for row in fetch(connection, &columns_sql(&list), &parameters).await? {
        let key = row.text("table_name").unwrap_or_default();
        let Some(table) = tables.get_mut(&key) else {
            continue;
        };
        let column = column(dialect, &row, &table.name, &generated);
        table.columns.push(column);
    }
    for table in &mut tables.tables {
        if table.columns.iter().any(|c| c.primary) {
            table.primary_key_name = Some("PRIMARY".to_string());
        }
    }

    let default_collations = fetch(connection, DEFAULT_COLLATIONS_SQL, &[])
        .await?
        .into_iter()
        .filter_map(|row| Some((row.text("charset")?, row.text("collation")?)))
        .collect();

    let foreign_key_names = read_foreign_keys(connection, &list, &parameters, &mut tables).await?;
    read_indices(connection, &list, &parameters, &foreign_key_names, &mut tables).await?;
    read_checks(connection, &list, &parameters, &mut tables).await?;

    let views = tracked_views(&records, &catalog_views, &tables.keys(), None);

    Ok(SchemaModel {
        tables: tables.into_tables(),
        views,
        enum_types: Vec::new(),
        ledger_present,
        default_collations,
    })
}

fn column(
    dialect: &dyn MigrationDialect,
    row: &CatalogRow,
    table: &str,
    generated: &HashMap<String, String>,
) -> Column {
    let name = row.text("column_name").unwrap_or_default();
    let data_type = row.text("data_type").unwrap_or_default().to_lowercase();
    let column_type = row.text("column_type").unwrap_or_default();
    let extra = row.text("extra").unwrap_or_default().to_lowercase();

    let mut column = Column::new(name, data_type.clone());
    if data_type == "enum" || data_type == "set" {
        column.enum_values = enum_labels(&column_type);
    }
    if data_type == "bit" {
        column.length = row.uint("numeric_precision");
    } else if is_character_type(&data_type) {
        column.length = row.uint("character_maximum_length");
    }
    if matches!(data_type.as_str(), "decimal" | "numeric") {
        column.precision = row.uint("numeric_precision");
        column.scale = row.uint("numeric_scale");
    }
    column.nullable = row.text("is_nullable").as_deref() == Some("YES");
    column.primary = row.text("column_key").as_deref() == Some("PRI");
    column.charset = row.text("character_set_name");
    column.collation = row.text("collation_name");
    column.comment = row.text("column_comment").filter(|c| !c.is_empty());

    if extra.contains("auto_increment") {
        column.generation = Some(Generation::Increment);
    }
    if let Some(position) = extra.find("on update ") {
        let raw = row.text("extra").unwrap_or_default();
        column.on_update = raw
            .get(position + "on update ".len()..)
            .map(|s| s.trim().to_string());
    }

    let kind = if extra.contains("virtual generated") {
        Some(GeneratedKind::Virtual)
    } else if extra.contains("stored generated") {
        Some(GeneratedKind::Stored)
    } else {
        None
    };
    if let Some(kind) = kind {
        let expression = generated
            .get(&generated_key(None, table, &column.name))
            .cloned()
            .or_else(|| row.text("generation_expression"))
            .unwrap_or_default();
        return column.generated_as(expression, kind);
    }

    column.default = row
        .text("column_default")
        .map(|raw| default_expression(dialect, &raw, &data_type, &extra));
    column
}

/// Turns `COLUMN_DEFAULT` into an SQL expression.
///
/// MySQL 8 reports string literals unquoted and marks expressions with
/// `DEFAULT_GENERATED`; MariaDB quotes literals itself.
fn default_expression(dialect: &dyn MigrationDialect, raw: &str, data_type: &str, extra: &str) -> String {
    let upper = raw.trim().to_uppercase();
    let is_expression = raw.starts_with('\'')
        || extra.contains("default_generated")
        || is_numeric_type(data_type)
        || upper == "NULL"
        || upper.starts_with("CURRENT_TIMESTAMP")
        || (raw.ends_with(')') && raw.contains('('));
    if is_expression {
        raw.to_string()
    } else {
        dialect.quote_literal(raw)
    }
}

/// Labels of `enum('a','b')` / `set('a','b')`.
fn enum_labels(column_type: &str) -> Vec<String> {
    let Some(start) = column_type.find('(') else {
        return Vec::new();
    };
    let inner = column_type[start + 1..].trim_end().trim_end_matches(')');
    let chars: Vec<char> = inner.chars().collect();
    let mut labels = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '\'' {
            i += 1;
            continue;
        }
        i += 1;
        let mut label = String::new();
        while i < chars.len() {
            match chars[i] {
                '\'' if chars.get(i + 1) == Some(&'\'') => {
                    label.push('\'');
                    i += 2;
                }
                '\'' => {
                    i += 1;
                    break;
                }
                '\\' if i + 1 < chars.len() => {
                    label.push(chars[i + 1]);
                    i += 2;
                }
                c => {
                    label.push(c);
                    i += 1;
                }
            }
        }
        labels.push(label);
    }
    labels
}

/// Reads foreign keys and returns their names.
async fn read_foreign_keys<C: Connection>(
    connection: &C,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<HashSet<String>> {
    let mut foreign_keys: BTreeMap<(String, String), ForeignKey> = BTreeMap::new();
    for row in fetch(connection, &foreign_keys_sql(list), parameters).await? {
        let table = row.text("table_name").unwrap_or_default();
        let name = row.text("constraint_name").unwrap_or_default();
        let fk = foreign_keys
            .entry((table, name.clone()))
            .or_insert_with(|| ForeignKey {
                name,
                columns: Vec::new(),
                referenced_schema: None,
                referenced_table: row.text("referenced_table").unwrap_or_default(),
                referenced_columns: Vec::new(),
                on_delete: ForeignKeyAction::from_sql(&row.text("on_delete").unwrap_or_default()),
                on_update: ForeignKeyAction::from_sql(&row.text("on_update").unwrap_or_default()),
                deferrable: None,
            });
        fk.columns.extend(row.text("column_name"));
        fk.referenced_columns.extend(row.text("referenced_column"));
    }

    let mut names = HashSet::new();
    for ((table, _), fk) in foreign_keys {
        names.insert(fk.name.clone());
        if let Some(table) = tables.get_mut(&table) {
            table.foreign_keys.push(fk);
        }
    }
    Ok(names)
}

/// Reads indices. Indices MySQL created to back a foreign key carry the
/// constraint's name and are skipped.
async fn read_indices<C: Connection>(
    connection: &C,
    list: &str,
    parameters: &[SqlValue],
    foreign_key_names: &HashSet<String>,
    tables: &mut TableSet,
) -> Result<()> {
    let mut indices: BTreeMap<(String, String), Index> = BTreeMap::new();
    for row in fetch(connection, &indices_sql(list), parameters).await? {
        let table = row.text("table_name").unwrap_or_default();
        let name = row.text("index_name").unwrap_or_default();
        if foreign_key_names.contains(&name) {
            continue;
        }
        let index = indices.entry((table, name.clone())).or_insert_with(|| {
            let mut index = Index::new(name, Vec::new());
            let index_type = row.text("index_type").unwrap_or_default().to_uppercase();
            index.unique = !row.flag("non_unique");
            index.spatial = index_type == "SPATIAL";
            index.fulltext = index_type == "FULLTEXT";
            index
        });
        index.columns.extend(row.text("column_name"));
    }
    for ((table, _), index) in indices {
        if let Some(table) = tables.get_mut(&table) {
            table.indices.push(index);
        }
    }
    Ok(())
}

async fn read_checks<C: Connection>(
    connection: &C,
    list: &str,
    parameters: &[SqlValue],
    tables: &mut TableSet,
) -> Result<()> {
    for row in fetch(connection, &checks_sql(list), parameters).await? {
        let key = row.text("table_name").unwrap_or_default();
        if let Some(table) = tables.get_mut(&key) {
            table.checks.push(CheckConstraint {
                name: row.text("constraint_name").unwrap_or_default(),
                expression: row.text("check_clause").unwrap_or_default(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxide_sync_core::dialect::MysqlDialect;

    #[test]
    fn test_enum_labels() {
        assert_eq!(enum_labels("enum('a','b c','it''s')"), vec!["a", "b c", "it's"]);
        assert!(enum_labels("varchar(255)").is_empty());
    }

    #[test]
    fn test_default_expression_quotes_mysql8_literals() {
        let dialect = MysqlDialect::new();
        assert_eq!(default_expression(&dialect, "draft", "varchar", ""), "'draft'");
        assert_eq!(default_expression(&dialect, "'draft'", "varchar", ""), "'draft'");
        assert_eq!(default_expression(&dialect, "0", "int", ""), "0");
        assert_eq!(
            default_expression(&dialect, "CURRENT_TIMESTAMP", "timestamp", "default_generated"),
            "CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn test_column_from_catalog_row() {
        let dialect = MysqlDialect::new();
        let row = CatalogRow::new()
            .with("column_name", "updated_at")
            .with("data_type", "timestamp")
            .with("column_type", "timestamp")
            .with("is_nullable", "NO")
            .with("column_default", "CURRENT_TIMESTAMP")
            .with("extra", "DEFAULT_GENERATED on update CURRENT_TIMESTAMP")
            .with("column_comment", "");
        let column = column(&dialect, &row, "posts", &HashMap::new());
        assert!(!column.nullable);
        assert_eq!(column.on_update.as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(column.default.as_deref(), Some("CURRENT_TIMESTAMP"));
        assert_eq!(column.comment, None);
    }

    #[test]
    fn test_generated_column_prefers_ledger_expression() {
        let dialect = MysqlDialect::new();
        let row = CatalogRow::new()
            .with("column_name", "total")
            .with("data_type", "int")
            .with("is_nullable", "YES")
            .with("extra", "STORED GENERATED")
            .with("generation_expression", "(`a` + `b`)");
        let generated: HashMap<String, String> =
            [(generated_key(None, "items", "total"), "a + b".to_string())]
                .into_iter()
                .collect();
        let column = column(&dialect, &row, "items", &generated);
        let computed = column.generated_as.expect("generated");
        assert_eq!(computed.expression, "a + b");
        assert_eq!(computed.kind, GeneratedKind::Stored);
    }
}
