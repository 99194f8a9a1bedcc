//! SQLite catalog reader.
//!
//! Pragmas give columns, indices and foreign keys but not constraint names,
//! AUTOINCREMENT, CHECK lists or generated column expressions. Those are
//! recovered from the `CREATE TABLE` text kept in `sqlite_master`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use oxide_sync_core::naming;
use oxide_sync_core::normalize::{is_character_type, split_type};
use oxide_sync_core::schema::{
    CheckConstraint, Column, Deferrable, ForeignKey, ForeignKeyAction, GeneratedKind, Generation,
    Index, SchemaModel, Table, UniqueConstraint,
};
use oxide_sync_core::sql::SqlValue;

use super::{fetch, ledger_records, tracked_views, CatalogFilter, TableSet};
use crate::connection::{CatalogRow, Connection};
use crate::error::Result;

const MASTER_SQL: &str = "SELECT type, name, tbl_name, sql FROM sqlite_master \
     WHERE type IN ('table', 'view', 'index') AND name NOT LIKE 'sqlite_%'";
const COLUMNS_SQL: &str = "SELECT * FROM pragma_table_xinfo(?)";
const INDEX_LIST_SQL: &str = "SELECT * FROM pragma_index_list(?)";
const INDEX_INFO_SQL: &str = "SELECT * FROM pragma_index_info(?) ORDER BY seqno";
const FOREIGN_KEYS_SQL: &str = "SELECT * FROM pragma_foreign_key_list(?) ORDER BY id, seq";

pub(super) async fn read<C: Connection>(connection: &C, filter: &CatalogFilter) -> Result<SchemaModel> {
    let master = fetch(connection, MASTER_SQL, &[]).await?;

    let mut definitions: Vec<(String, String)> = Vec::new();
    let mut index_sql: HashMap<String, String> = HashMap::new();
    let mut catalog_views: HashMap<String, bool> = HashMap::new();
    let mut ledger_present = false;
    for row in &master {
        let (Some(kind), Some(name)) = (row.text("type"), row.text("name")) else {
            continue;
        };
        match kind.as_str() {
            "table" if name == filter.ledger_table => ledger_present = true,
            "table" if filter.is_excluded(&name) => {}
            "table" => definitions.push((name, row.text("sql").unwrap_or_default())),
            "view" => {
                catalog_views.insert(name, false);
            }
            "index" => {
                if let Some(sql) = row.text("sql") {
                    index_sql.insert(name, sql);
                }
            }
            _ => {}
        }
    }

    let mut tables = TableSet::default();
    for (name, sql) in &definitions {
        let table = read_table(connection, name, sql, &index_sql).await?;
        tables.insert(table);
    }
    fill_implicit_references(&mut tables);

    let records = ledger_records(connection, filter, ledger_present).await?;
    let views = tracked_views(&records, &catalog_views, &tables.keys(), None);

    Ok(SchemaModel {
        tables: tables.into_tables(),
        views,
        enum_types: Vec::new(),
        ledger_present,
        default_collations: BTreeMap::new(),
    })
}

async fn read_table<C: Connection>(
    connection: &C,
    name: &str,
    sql: &str,
    index_sql: &HashMap<String, String>,
) -> Result<Table> {
    let parsed = TableSql::parse(sql);
    let parameter = [SqlValue::from(name)];
    let mut table = Table::new(name);
    table.primary_key_name.clone_from(&parsed.primary_key);

    for row in fetch(connection, COLUMNS_SQL, &parameter).await? {
        if let Some(column) = column(&row, &parsed) {
            table.columns.push(column);
        }
    }

    for row in fetch(connection, INDEX_LIST_SQL, &parameter).await? {
        let Some(index_name) = row.text("name") else {
            continue;
        };
        let origin = row.text("origin").unwrap_or_default();
        if origin == "pk" {
            continue;
        }
        let info = fetch(connection, INDEX_INFO_SQL, &[SqlValue::from(index_name.as_str())]).await?;
        let columns: Vec<String> = info.iter().filter_map(|r| r.text("name")).collect();
        let has_expression = columns.len() < info.len();

        if origin == "u" {
            let constraint_name = parsed
                .uniques
                .iter()
                .find(|(_, c)| same_set(c, &columns))
                .and_then(|(n, _)| n.clone())
                .unwrap_or_else(|| naming::unique_name(name, &columns));
            table.uniques.push(UniqueConstraint {
                name: constraint_name,
                columns,
            });
            continue;
        }

        let definition = index_sql.get(&index_name).map(String::as_str).unwrap_or_default();
        let mut index = Index::new(index_name.clone(), if has_expression { Vec::new() } else { columns });
        index.unique = row.flag("unique");
        index.where_clause = where_clause(definition);
        if has_expression {
            index.expression = index_expression(definition);
        }
        table.indices.push(index);
    }

    let mut groups: BTreeMap<i64, Vec<CatalogRow>> = BTreeMap::new();
    for row in fetch(connection, FOREIGN_KEYS_SQL, &parameter).await? {
        groups.entry(row.int("id").unwrap_or_default()).or_default().push(row);
    }
    for rows in groups.values() {
        table.foreign_keys.push(foreign_key(name, rows, &parsed));
    }

    for (check_name, expression) in &parsed.checks {
        table.checks.push(CheckConstraint {
            name: check_name
                .clone()
                .unwrap_or_else(|| naming::check_name(name, expression)),
            expression: expression.clone(),
        });
    }
    Ok(table)
}

fn column(row: &CatalogRow, parsed: &TableSql) -> Option<Column> {
    let name = row.text("name")?;
    let hidden = row.int("hidden").unwrap_or_default();
    if hidden == 1 {
        return None;
    }
    let definition = parsed
        .columns
        .iter()
        .find(|(column, _)| column.eq_ignore_ascii_case(&name))
        .map_or("", |(_, text)| text.as_str());

    let (data_type, first, second) = split_type(&row.text("type").unwrap_or_default());
    let mut column = Column::new(name, data_type.clone());
    if is_character_type(&data_type) {
        column.length = first;
    } else if matches!(data_type.as_str(), "decimal" | "numeric") {
        column.precision = first;
        column.scale = second;
    }
    let pk = row.int("pk").unwrap_or_default();
    column.primary = pk > 0;
    column.nullable = !row.flag("notnull") && !column.primary;
    column.default = row.text("dflt_value");

    let upper = definition.to_ascii_uppercase();
    if column.primary && upper.contains("AUTOINCREMENT") {
        column.generation = Some(Generation::Increment);
    }
    if let Some(labels) = enum_labels(definition) {
        column.data_type = "enum".to_string();
        column.length = None;
        column.enum_values = labels;
    }
    if hidden == 2 || hidden == 3 {
        let kind = if hidden == 3 {
            GeneratedKind::Stored
        } else {
            GeneratedKind::Virtual
        };
        let expression = generated_expression(definition).unwrap_or_default();
        column = column.generated_as(expression, kind);
    }
    column.collation = keyword_argument(definition, "COLLATE");
    Some(column)
}

fn foreign_key(table: &str, rows: &[CatalogRow], parsed: &TableSql) -> ForeignKey {
    let columns: Vec<String> = rows.iter().filter_map(|r| r.text("from")).collect();
    let referenced_columns: Vec<String> = rows.iter().filter_map(|r| r.text("to")).collect();
    let referenced_table = rows
        .first()
        .and_then(|r| r.text("table"))
        .unwrap_or_default();
    let first = rows.first();
    let action = |column: &str| {
        first
            .and_then(|r| r.text(column))
            .map_or(ForeignKeyAction::NoAction, |a| ForeignKeyAction::from_sql(&a))
    };

    let declared = parsed.foreign_keys.iter().find(|(_, c, _)| c == &columns);
    let name = declared
        .and_then(|(n, _, _)| n.clone())
        .unwrap_or_else(|| {
            naming::foreign_key_name(table, &columns, &referenced_table, &referenced_columns)
        });
    let deferrable = declared.and_then(|(_, _, text)| deferral(text));

    ForeignKey {
        name,
        columns,
        referenced_schema: None,
        referenced_table,
        referenced_columns,
        on_delete: action("on_delete"),
        on_update: action("on_update"),
        deferrable,
    }
}

/// `REFERENCES t` without a column list points at the primary key of `t`.
fn fill_implicit_references(tables: &mut TableSet) {
    let mut missing: Vec<(String, usize, Vec<String>)> = Vec::new();
    for table in &tables.tables {
        for (position, fk) in table.foreign_keys.iter().enumerate() {
            if fk.referenced_columns.len() < fk.columns.len() {
                let primary = tables
                    .get(&fk.referenced_key())
                    .map(Table::primary_key)
                    .unwrap_or_default();
                missing.push((table.key(), position, primary));
            }
        }
    }
    for (key, position, primary) in missing {
        if let Some(fk) = tables
            .get_mut(&key)
            .and_then(|t| t.foreign_keys.get_mut(position))
        {
            fk.referenced_columns = primary;
        }
    }
}

fn same_set(a: &[String], b: &[String]) -> bool {
    let a: BTreeSet<&String> = a.iter().collect();
    let b: BTreeSet<&String> = b.iter().collect();
    a == b
}

fn deferral(text: &str) -> Option<Deferrable> {
    let upper = text.to_ascii_uppercase();
    if upper.contains("NOT DEFERRABLE") || !upper.contains("DEFERRABLE") {
        None
    } else if upper.contains("INITIALLY DEFERRED") {
        Some(Deferrable::InitiallyDeferred)
    } else {
        Some(Deferrable::InitiallyImmediate)
    }
}

// ============================================================================
// CREATE TABLE text
// ============================================================================

/// The parts of a stored `CREATE TABLE` statement the pragmas omit.
#[derive(Debug, Default)]
struct TableSql {
    /// Column name and the definition text after it.
    columns: Vec<(String, String)>,
    /// Name of a `CONSTRAINT .. PRIMARY KEY` clause.
    primary_key: Option<String>,
    uniques: Vec<(Option<String>, Vec<String>)>,
    checks: Vec<(Option<String>, String)>,
    /// Name, columns and the full clause text.
    foreign_keys: Vec<(Option<String>, Vec<String>, String)>,
}

impl TableSql {
    fn parse(sql: &str) -> Self {
        let mut parsed = Self::default();
        let Some((body, _)) = parenthesized(sql) else {
            return parsed;
        };
        for item in split_top_level(body) {
            let item = item.trim();
            let Some((first, rest)) = identifier(item) else {
                continue;
            };
            let keyword = if item.starts_with(['"', '`', '[']) {
                String::new()
            } else {
                first.to_ascii_uppercase()
            };
            match keyword.as_str() {
                "CONSTRAINT" => {
                    let Some((name, clause)) = identifier(rest) else {
                        continue;
                    };
                    parsed.constraint(Some(name), clause.trim());
                }
                "PRIMARY" | "UNIQUE" | "CHECK" | "FOREIGN" => parsed.constraint(None, item),
                _ => parsed.columns.push((first, rest.trim().to_string())),
            }
        }
        parsed
    }

    fn constraint(&mut self, name: Option<String>, clause: &str) {
        let upper = clause.to_ascii_uppercase();
        if upper.starts_with("PRIMARY") {
            self.primary_key = name;
        } else if upper.starts_with("UNIQUE") {
            if let Some((inner, _)) = parenthesized(clause) {
                self.uniques.push((name, column_names(inner)));
            }
        } else if upper.starts_with("CHECK") {
            if let Some((inner, _)) = parenthesized(clause) {
                self.checks.push((name, inner.trim().to_string()));
            }
        } else if upper.starts_with("FOREIGN") {
            if let Some((inner, _)) = parenthesized(clause) {
                self.foreign_keys
                    .push((name, column_names(inner), clause.to_string()));
            }
        }
    }
}

/// Reads one identifier, quoted or bare, and returns it with the rest.
fn identifier(text: &str) -> Option<(String, &str)> {
    let text = text.trim_start();
    let mut chars = text.char_indices();
    let (_, first) = chars.next()?;
    let close = match first {
        '"' => Some('"'),
        '`' => Some('`'),
        '[' => Some(']'),
        _ => None,
    };
    match close {
        Some(close) => {
            let mut name = String::new();
            let mut iter = text[1..].char_indices().peekable();
            while let Some((idx, c)) = iter.next() {
                if c == close {
                    if close != ']' && iter.peek().is_some_and(|&(_, next)| next == close) {
                        name.push(c);
                        iter.next();
                        continue;
                    }
                    return Some((name, &text[idx + 2..]));
                }
                name.push(c);
            }
            None
        }
        None => {
            let end = text
                .find(|c: char| c.is_whitespace() || c == '(' || c == ',')
                .unwrap_or(text.len());
            (end > 0).then(|| (text[..end].to_string(), &text[end..]))
        }
    }
}

/// Finds the first parenthesized group and returns its contents and the
/// text after the closing parenthesis.
fn parenthesized(text: &str) -> Option<(&str, &str)> {
    let open = text.find('(')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, c) in text[open..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    let end = open + idx;
                    return Some((&text[open + 1..end], &text[end + 1..]));
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits on commas outside parentheses and quotes.
fn split_top_level(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, c) in body.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&body[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&body[start..]);
    parts
}

fn column_names(list: &str) -> Vec<String> {
    split_top_level(list)
        .into_iter()
        .filter_map(|part| identifier(part).map(|(name, _)| name))
        .collect()
}

/// Position of `keyword` in `text` as a whole word, ignoring case.
fn find_keyword(text: &str, keyword: &str) -> Option<usize> {
    let upper = text.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let mut from = 0;
    while let Some(found) = upper[from..].find(keyword) {
        let start = from + found;
        let end = start + keyword.len();
        let before = start == 0 || !is_word_byte(bytes[start - 1]);
        let after = end >= bytes.len() || !is_word_byte(bytes[end]);
        if before && after {
            return Some(start);
        }
        from = end;
    }
    None
}

const fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Labels of a `CHECK( "c" IN ('A','B') )` column constraint.
fn enum_labels(definition: &str) -> Option<Vec<String>> {
    let start = find_keyword(definition, "CHECK")?;
    let (inner, _) = parenthesized(&definition[start..])?;
    let position = find_keyword(inner, "IN")?;
    let (list, _) = parenthesized(&inner[position..])?;
    let labels = string_literals(list);
    (!labels.is_empty()).then_some(labels)
}

fn string_literals(text: &str) -> Vec<String> {
    let mut labels = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut label = String::new();
        while let Some(ch) = chars.next() {
            if ch == '\'' {
                if chars.peek() == Some(&'\'') {
                    label.push('\'');
                    chars.next();
                    continue;
                }
                break;
            }
            label.push(ch);
        }
        labels.push(label);
    }
    labels
}

fn generated_expression(definition: &str) -> Option<String> {
    let start = find_keyword(definition, "AS")?;
    parenthesized(&definition[start..]).map(|(inner, _)| inner.trim().to_string())
}

fn keyword_argument(definition: &str, keyword: &str) -> Option<String> {
    let start = find_keyword(definition, keyword)?;
    identifier(&definition[start + keyword.len()..]).map(|(name, _)| name)
}

fn where_clause(index_sql: &str) -> Option<String> {
    let start = find_keyword(index_sql, "WHERE")?;
    let condition = index_sql[start + "WHERE".len()..].trim();
    (!condition.is_empty()).then(|| condition.to_string())
}

fn index_expression(index_sql: &str) -> Option<String> {
    let start = find_keyword(index_sql, "ON")?;
    parenthesized(&index_sql[start..]).map(|(inner, _)| inner.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const USERS: &str = "CREATE TABLE \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL, \
        \"status\" varchar CHECK( \"status\" IN ('A','B''s') ) NOT NULL DEFAULT 'A', \
        \"full\" varchar GENERATED ALWAYS AS (first || ' ' || last) VIRTUAL, \
        \"email\" varchar(255) NOT NULL COLLATE NOCASE, \
        CONSTRAINT \"UQ_users_email\" UNIQUE (\"email\"), \
        CONSTRAINT \"CHK_age\" CHECK (age > 18), \
        CHECK (length(\"email\") > 3), \
        CONSTRAINT \"FK_team\" FOREIGN KEY (\"team_id\") REFERENCES \"teams\" (\"id\") \
        ON DELETE CASCADE ON UPDATE NO ACTION DEFERRABLE INITIALLY DEFERRED)";

    #[test]
    fn test_parse_create_table() {
        let parsed = TableSql::parse(USERS);
        let names: Vec<&str> = parsed.columns.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "status", "full", "email"]);
        assert_eq!(parsed.primary_key, None);
        assert_eq!(
            parsed.uniques,
            vec![(Some("UQ_users_email".to_string()), vec!["email".to_string()])]
        );
        assert_eq!(parsed.checks.len(), 2);
        assert_eq!(parsed.checks[0], (Some("CHK_age".to_string()), "age > 18".to_string()));
        assert_eq!(parsed.checks[1].0, None);
        assert_eq!(parsed.foreign_keys[0].1, vec!["team_id".to_string()]);
        assert_eq!(deferral(&parsed.foreign_keys[0].2), Some(Deferrable::InitiallyDeferred));
    }

    #[test]
    fn test_parse_named_primary_key() {
        let parsed = TableSql::parse(
            "CREATE TABLE \"memberships\" (\"user_id\" integer NOT NULL, \"team_id\" integer NOT NULL, \
             CONSTRAINT \"PK_memberships\" PRIMARY KEY (\"user_id\", \"team_id\"))",
        );
        assert_eq!(parsed.columns.len(), 2);
        assert_eq!(parsed.primary_key.as_deref(), Some("PK_memberships"));
    }

    #[test]
    fn test_column_clauses() {
        let parsed = TableSql::parse(USERS);
        let definition = |name: &str| {
            parsed
                .columns
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, d)| d.clone())
                .unwrap()
        };
        assert_eq!(
            enum_labels(&definition("status")),
            Some(vec!["A".to_string(), "B's".to_string()])
        );
        assert_eq!(enum_labels(&definition("email")), None);
        assert_eq!(
            generated_expression(&definition("full")).as_deref(),
            Some("first || ' ' || last")
        );
        assert_eq!(keyword_argument(&definition("email"), "COLLATE").as_deref(), Some("NOCASE"));
        assert_eq!(keyword_argument(&definition("id"), "COLLATE"), None);
    }

    #[test]
    fn test_index_clauses() {
        let sql = "CREATE UNIQUE INDEX \"IDX_x\" ON \"users\" (lower(\"email\")) WHERE deleted_at IS NULL";
        assert_eq!(index_expression(sql).as_deref(), Some("lower(\"email\")"));
        assert_eq!(where_clause(sql).as_deref(), Some("deleted_at IS NULL"));
        assert_eq!(where_clause("CREATE INDEX \"i\" ON \"t\" (\"a\")"), None);
    }

    #[test]
    fn test_identifier_forms() {
        assert_eq!(identifier("\"a\"\"b\" rest"), Some(("a\"b".to_string(), " rest")));
        assert_eq!(identifier("`x` int"), Some(("x".to_string(), " int")));
        assert_eq!(identifier("plain(1)"), Some(("plain".to_string(), "(1)")));
        assert_eq!(identifier("   "), None);
    }
}
