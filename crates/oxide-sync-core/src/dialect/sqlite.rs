//! SQLite dialect for migrations.
//!
//! SQLite has limited ALTER TABLE support, so most column and constraint
//! changes use the "table recreation" strategy: create a new table, copy
//! data, drop the old table, rename the new table.

use super::{with_modifiers, DialectCapabilities, DialectKind, MigrationDialect};
use crate::normalize::mentions_column;
use crate::operations::{ColumnChanges, SchemaChange, TableName};
use crate::schema::{Column, GeneratedKind, Generation, Table};

/// SQLite migration dialect.
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    /// Creates a new SQLite dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn column_sql(&self, column: &Column, inline_primary: bool) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.column_type(None, column),
        ];
        if inline_primary {
            parts.push("PRIMARY KEY AUTOINCREMENT".to_string());
        }
        if column.is_enum() && !column.enum_values.is_empty() {
            let labels: Vec<String> = column
                .enum_values
                .iter()
                .map(|l| self.quote_literal(l))
                .collect();
            parts.push(format!(
                "CHECK( {} IN ({}) )",
                self.quote_identifier(&column.name),
                labels.join(",")
            ));
        }
        if let Some(generated) = &column.generated_as {
            parts.push(format!(
                "GENERATED ALWAYS AS ({}) {}",
                generated.expression,
                generated.kind.to_sql()
            ));
        }
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = self.column_default(column) {
            if is_literal(&default) {
                parts.push(format!("DEFAULT {default}"));
            } else {
                parts.push(format!("DEFAULT ({default})"));
            }
        }
        if let Some(collation) = &column.collation {
            parts.push(format!("COLLATE {collation}"));
        }
        parts.join(" ")
    }

    /// Whether a column appears in any constraint of `table` other than
    /// plain indices.
    fn is_constrained(table: &Table, column: &Column) -> bool {
        let name = column.name.as_str();
        column.primary
            || column.unique
            || table.uniques.iter().any(|u| u.columns.iter().any(|c| c == name))
            || table
                .foreign_keys
                .iter()
                .any(|fk| fk.columns.iter().any(|c| c == name))
            || table
                .checks
                .iter()
                .any(|check| mentions_column(&check.expression, name))
    }
}

/// Whether a default may be written without parentheses.
fn is_literal(default: &str) -> bool {
    let text = default.trim();
    (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
        || text.parse::<f64>().is_ok()
        || matches!(
            text.to_ascii_uppercase().as_str(),
            "NULL" | "TRUE" | "FALSE" | "CURRENT_TIMESTAMP" | "CURRENT_DATE" | "CURRENT_TIME"
        )
}

impl MigrationDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            max_identifier_length: None,
            transactional_ddl: true,
            named_enum_types: false,
            check_constraints: true,
            unique_constraints: true,
            alter_column: false,
            alter_constraints: false,
            materialized_views: false,
            identity_columns: false,
            schemas: false,
            comments: false,
            database_uuid: false,
            deferrable_constraints: true,
        }
    }

    fn normalize_type(&self, data_type: &str) -> String {
        let lowered = data_type.trim().to_lowercase();
        let normalized = match lowered.as_str() {
            "int" | "int4" | "serial" => "integer",
            "string" | "character varying" | "uuid" => "varchar",
            "character" => "char",
            "bool" => "boolean",
            "double precision" | "float8" => "double",
            "simple-enum" => "enum",
            other => other,
        };
        normalized.to_string()
    }

    fn tracks_generated_columns(&self) -> bool {
        false
    }

    fn column_type(&self, _schema: Option<&str>, column: &Column) -> String {
        if column.is_enum() {
            return "varchar".to_string();
        }
        with_modifiers(&self.normalize_type(&column.data_type), column)
    }

    fn column_definition(&self, _schema: Option<&str>, column: &Column) -> String {
        self.column_sql(column, false)
    }

    fn create_table(&self, table: &Table) -> Vec<String> {
        let primary_key = table.primary_key();
        let inline = primary_key.len() == 1
            && table.columns.iter().any(|c| {
                c.primary
                    && matches!(
                        c.generation,
                        Some(Generation::Increment | Generation::Identity(_))
                    )
            });

        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_sql(c, inline && c.primary))
            .collect();
        if !primary_key.is_empty() && !inline {
            defs.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                self.constraint_name(&table.primary_key_constraint()),
                self.column_list(&primary_key)
            ));
        }
        for unique in &table.uniques {
            defs.push(format!(
                "CONSTRAINT {} UNIQUE ({})",
                self.constraint_name(&unique.name),
                self.column_list(&unique.columns)
            ));
        }
        for check in &table.checks {
            defs.push(format!(
                "CONSTRAINT {} CHECK ({})",
                self.constraint_name(&check.name),
                check.expression
            ));
        }
        for fk in &table.foreign_keys {
            defs.push(format!(
                "CONSTRAINT {} {}",
                self.constraint_name(&fk.name),
                self.foreign_key_clause(fk)
            ));
        }

        let name = TableName::from(table);
        let mut statements = vec![format!(
            "CREATE TABLE {} ({})",
            self.table_name(&name),
            defs.join(", ")
        )];
        statements.extend(table.indices.iter().map(|i| self.create_index(&name, i)));
        statements
    }

    fn change_column(
        &self,
        table: &TableName,
        from: &Column,
        to: &Column,
        _changes: &ColumnChanges,
    ) -> Vec<String> {
        let mut statements = self.drop_column(table, from);
        statements.extend(self.add_column(table, to));
        statements
    }

    fn requires_column_recreate(&self, _changes: &ColumnChanges) -> bool {
        true
    }

    fn alters_in_place(&self, change: &SchemaChange, table: &Table) -> bool {
        match change {
            SchemaChange::CreateTable { .. }
            | SchemaChange::DropTable { .. }
            | SchemaChange::RenameColumn { .. }
            | SchemaChange::CreateIndex { .. }
            | SchemaChange::DropIndex { .. }
            | SchemaChange::CreateView { .. }
            | SchemaChange::DropView { .. }
            | SchemaChange::RecreateTable { .. } => true,
            SchemaChange::AddColumn { column, .. } => {
                let constant_default = column.default.as_deref().is_some_and(|d| {
                    is_literal(d) && !d.trim().to_ascii_uppercase().starts_with("CURRENT_")
                });
                !column.primary
                    && !column.unique
                    && column
                        .generated_as
                        .as_ref()
                        .map_or(true, |g| g.kind == GeneratedKind::Virtual)
                    && (column.nullable || constant_default)
            }
            SchemaChange::DropColumn { column, .. } => !Self::is_constrained(table, column),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ForeignKey, Index};

    fn dialect() -> SqliteDialect {
        SqliteDialect::new()
    }

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("name", "varchar").not_null())
    }

    #[test]
    fn test_create_table_inline_autoincrement() {
        let sql = dialect().create_table(&users());
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"users\" (\"id\" integer PRIMARY KEY AUTOINCREMENT NOT NULL, \"name\" varchar NOT NULL)"
            ]
        );
    }

    #[test]
    fn test_enum_as_check() {
        let status = Column::new("status", "enum")
            .not_null()
            .enumeration(None, ["A", "B"])
            .default("'A'");
        assert_eq!(
            dialect().column_definition(None, &status),
            "\"status\" varchar CHECK( \"status\" IN ('A','B') ) NOT NULL DEFAULT 'A'"
        );
    }

    #[test]
    fn test_expression_default_parenthesized() {
        let col = Column::new("at", "datetime").default("datetime('now')");
        assert_eq!(
            dialect().column_definition(None, &col),
            "\"at\" datetime DEFAULT (datetime('now'))"
        );
    }

    #[test]
    fn test_add_column_in_place_rules() {
        let d = dialect();
        let table = users();
        let name = TableName::new("users");

        let nullable = SchemaChange::AddColumn {
            table: name.clone(),
            column: Column::new("bio", "text"),
        };
        assert!(d.alters_in_place(&nullable, &table));

        let required = SchemaChange::AddColumn {
            table: name.clone(),
            column: Column::new("age", "integer").not_null(),
        };
        assert!(!d.alters_in_place(&required, &table));

        let with_default = SchemaChange::AddColumn {
            table: name,
            column: Column::new("age", "integer").not_null().default("0"),
        };
        assert!(d.alters_in_place(&with_default, &table));
    }

    #[test]
    fn test_drop_constrained_column_needs_recreate() {
        let d = dialect();
        let table = users()
            .column(Column::new("org_id", "integer"))
            .foreign_key(ForeignKey::new("FK_org", vec!["org_id".into()], "orgs", vec!["id".into()]))
            .index(Index::new("IDX_name", vec!["name".into()]));
        let name = TableName::new("users");

        let org = SchemaChange::DropColumn {
            table: name.clone(),
            column: Column::new("org_id", "integer"),
        };
        assert!(!d.alters_in_place(&org, &table));

        let indexed = SchemaChange::DropColumn {
            table: name,
            column: Column::new("name", "varchar").not_null(),
        };
        assert!(d.alters_in_place(&indexed, &table));
    }

    #[test]
    fn test_recreate_table() {
        let d = dialect();
        let from = users();
        let to = users()
            .column(Column::new("age", "integer").not_null().default("0"))
            .index(Index::new("IDX_age", vec!["age".into()]));
        let sql = d.recreate_table(&from, &to);
        assert!(sql[0].starts_with("CREATE TABLE \"temporary_users\""));
        assert_eq!(
            sql[1],
            "INSERT INTO \"temporary_users\" (\"id\", \"name\") SELECT \"id\", \"name\" FROM \"users\""
        );
        assert_eq!(sql[2], "DROP TABLE \"users\"");
        assert_eq!(sql[3], "ALTER TABLE \"temporary_users\" RENAME TO \"users\"");
        assert_eq!(sql[4], "CREATE INDEX \"IDX_age\" ON \"users\" (\"age\")");
    }
}
