//! Database dialect implementations.
//!
//! Each dialect describes what its database can do through
//! [`DialectCapabilities`] and renders DDL for schema changes. The differ
//! and synthesizer branch on capabilities, never on the dialect name.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MysqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use serde::{Deserialize, Serialize};

use crate::declaration::DefaultValue;
use crate::naming;
use crate::normalize::is_character_type;
use crate::operations::{ColumnChanges, EnumColumn, PrimaryKey, SchemaChange, TableName};
use crate::schema::{
    CheckConstraint, Column, ForeignKey, ForeignKeyAction, Generation, Index, NamedEnumType,
    Table, UniqueConstraint, View,
};

/// Supported database families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    /// PostgreSQL.
    Postgres,
    /// MySQL / MariaDB.
    Mysql,
    /// SQLite.
    Sqlite,
}

impl DialectKind {
    /// Returns the dialect implementation for this kind.
    #[must_use]
    pub fn dialect(self) -> Box<dyn MigrationDialect> {
        match self {
            Self::Postgres => Box::new(PostgresDialect::new()),
            Self::Mysql => Box::new(MysqlDialect::new()),
            Self::Sqlite => Box::new(SqliteDialect::new()),
        }
    }

    /// Guesses the dialect from a connection URL scheme.
    #[must_use]
    pub fn from_url(url: &str) -> Option<Self> {
        let scheme = url.split(':').next()?.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::Mysql),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// What a dialect can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct DialectCapabilities {
    /// Maximum identifier length, if bounded.
    pub max_identifier_length: Option<usize>,
    /// DDL statements can run inside a transaction.
    pub transactional_ddl: bool,
    /// Enum columns are backed by named types.
    pub named_enum_types: bool,
    /// CHECK constraints are enforced.
    pub check_constraints: bool,
    /// Unique constraints exist apart from unique indices.
    pub unique_constraints: bool,
    /// Columns can be altered in place.
    pub alter_column: bool,
    /// Constraints can be added and dropped on existing tables.
    pub alter_constraints: bool,
    /// Materialized views exist.
    pub materialized_views: bool,
    /// SQL standard identity columns exist.
    pub identity_columns: bool,
    /// Tables live in named schemas.
    pub schemas: bool,
    /// Column comments are stored.
    pub comments: bool,
    /// The database can generate UUID values itself.
    pub database_uuid: bool,
    /// Foreign keys can be deferred.
    pub deferrable_constraints: bool,
}

/// Trait for database-specific normalization and SQL generation.
///
/// Statement methods return plain SQL text without a trailing semicolon.
pub trait MigrationDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Returns the dialect family.
    fn kind(&self) -> DialectKind;

    /// Returns the capability flags.
    fn capabilities(&self) -> DialectCapabilities;

    // ========================================================================
    // Normalization
    // ========================================================================

    /// Maps a type name (and its aliases) to the spelling this dialect's
    /// catalog reports.
    fn normalize_type(&self, data_type: &str) -> String;

    /// Length implied by a declared type alias (for example `uuid`
    /// stored as `varchar(36)`).
    fn implied_length(&self, _data_type: &str) -> Option<u32> {
        None
    }

    /// Length the database assumes when a character type omits one.
    fn default_length(&self, _data_type: &str) -> Option<u32> {
        None
    }

    /// Precision and scale the database assumes when a decimal type omits
    /// them.
    fn default_precision(&self, _data_type: &str) -> Option<(u32, u32)> {
        None
    }

    /// Maps foreign key actions the database reports differently.
    fn normalize_fk_action(&self, action: ForeignKeyAction) -> ForeignKeyAction {
        action
    }

    /// Renders a declared default value as SQL, `None` for no default.
    fn render_default(&self, value: &DefaultValue) -> Option<String> {
        match value {
            DefaultValue::Null => None,
            DefaultValue::Bool(b) => Some(b.to_string()),
            DefaultValue::Integer(i) => Some(i.to_string()),
            DefaultValue::Float(f) => Some(f.to_string()),
            DefaultValue::String(s) => Some(self.quote_literal(s)),
            DefaultValue::Expression { expression } => Some(expression.clone()),
        }
    }

    /// Whether computed column expressions are recorded in the ledger.
    /// Catalogs that rewrite the expression text cannot be compared
    /// against the declared expression directly.
    fn tracks_generated_columns(&self) -> bool {
        true
    }

    // ========================================================================
    // Identifiers
    // ========================================================================

    /// Quote an identifier (table name, column name, etc.).
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Renders an optionally schema-qualified name.
    fn qualified_name(&self, schema: Option<&str>, name: &str) -> String {
        match schema {
            Some(schema) if self.capabilities().schemas => {
                format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(name))
            }
            _ => self.quote_identifier(name),
        }
    }

    /// Renders a table name.
    fn table_name(&self, table: &TableName) -> String {
        self.qualified_name(table.schema.as_deref(), &table.name)
    }

    /// Quotes a constraint or index name after fitting it to the
    /// identifier limit.
    fn constraint_name(&self, name: &str) -> String {
        self.quote_identifier(&naming::fit_identifier(
            name,
            self.capabilities().max_identifier_length,
        ))
    }

    /// Positional parameter placeholder, 1-based.
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    /// Renders a comma separated, quoted column list.
    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ========================================================================
    // Columns
    // ========================================================================

    /// Returns the full SQL type of a column. `schema` is the owning
    /// table's schema, used to qualify named enum types.
    fn column_type(&self, schema: Option<&str>, column: &Column) -> String;

    /// Generates column definition SQL.
    fn column_definition(&self, schema: Option<&str>, column: &Column) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.column_type(schema, column),
        ];
        if let Some(collation) = &column.collation {
            parts.push(format!("COLLATE {}", self.quote_identifier(collation)));
        }
        if let Some(generated) = &column.generated_as {
            parts.push(format!(
                "GENERATED ALWAYS AS ({}) {}",
                generated.expression,
                generated.kind.to_sql()
            ));
        }
        if let Some(Generation::Identity(policy)) = column.generation {
            parts.push(format!("GENERATED {} AS IDENTITY", policy.to_sql()));
        }
        if !column.nullable {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = self.column_default(column) {
            parts.push(format!("DEFAULT {default}"));
        }
        parts.join(" ")
    }

    /// Default expression rendered into a column definition.
    fn column_default(&self, column: &Column) -> Option<String> {
        if column.generated_as.is_some() {
            return None;
        }
        column.default.clone()
    }

    // ========================================================================
    // Tables and columns
    // ========================================================================

    /// Generates statements creating a table with its constraints inlined,
    /// followed by its indices.
    fn create_table(&self, table: &Table) -> Vec<String> {
        let schema = table.schema.as_deref();
        let mut defs: Vec<String> = table
            .columns
            .iter()
            .map(|c| self.column_definition(schema, c))
            .collect();

        let primary_key = table.primary_key();
        if !primary_key.is_empty() {
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
        statements.extend(table.columns.iter().filter_map(|c| {
            c.comment
                .as_deref()
                .filter(|comment| !comment.is_empty())
                .and_then(|comment| self.comment_on_column(&name, &c.name, Some(comment)))
        }));
        statements.extend(table.indices.iter().map(|i| self.create_index(&name, i)));
        statements
    }

    /// Generates statements dropping a table.
    fn drop_table(&self, table: &Table) -> Vec<String> {
        vec![format!(
            "DROP TABLE {}",
            self.table_name(&TableName::from(table))
        )]
    }

    /// Generates statements adding a column.
    fn add_column(&self, table: &TableName, column: &Column) -> Vec<String> {
        let mut statements = vec![format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.table_name(table),
            self.column_definition(table.schema.as_deref(), column)
        )];
        if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
            statements.extend(self.comment_on_column(table, &column.name, Some(comment)));
        }
        statements
    }

    /// Separate statement setting a column comment, for dialects that do
    /// not declare comments inline.
    fn comment_on_column(
        &self,
        _table: &TableName,
        _column: &str,
        _comment: Option<&str>,
    ) -> Option<String> {
        None
    }

    /// Generates statements dropping a column.
    fn drop_column(&self, table: &TableName, column: &Column) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.table_name(table),
            self.quote_identifier(&column.name)
        )]
    }

    /// Generates a column rename.
    fn rename_column(&self, table: &TableName, from: &str, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME COLUMN {} TO {}",
            self.table_name(table),
            self.quote_identifier(from),
            self.quote_identifier(to)
        )
    }

    /// Generates in-place statements altering a column from `from` to `to`.
    fn change_column(
        &self,
        table: &TableName,
        from: &Column,
        to: &Column,
        changes: &ColumnChanges,
    ) -> Vec<String>;

    /// Whether a column change must be rendered as drop and re-add.
    fn requires_column_recreate(&self, changes: &ColumnChanges) -> bool {
        changes.generation || changes.computed
    }

    /// Whether `change` on `table` can run as an ALTER statement. Changes
    /// that cannot are folded into a [`SchemaChange::RecreateTable`].
    fn alters_in_place(&self, _change: &SchemaChange, _table: &Table) -> bool {
        true
    }

    /// Rebuilds a table: create a temporary copy with the target shape,
    /// copy the common columns, drop the original, rename the copy and
    /// recreate the indices.
    fn recreate_table(&self, from: &Table, to: &Table) -> Vec<String> {
        let target = TableName::from(to);
        let temporary = Table {
            name: format!("temporary_{}", to.name),
            indices: Vec::new(),
            primary_key_name: Some(to.primary_key_constraint()),
            ..to.clone()
        };
        let common: Vec<String> = to
            .columns
            .iter()
            .filter(|c| c.generated_as.is_none())
            .filter(|c| {
                from.get_column(&c.name)
                    .is_some_and(|old| old.generated_as.is_none())
            })
            .map(|c| c.name.clone())
            .collect();

        let mut statements = self.create_table(&temporary);
        if !common.is_empty() {
            let columns = self.column_list(&common);
            statements.push(format!(
                "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
                self.table_name(&TableName::from(&temporary)),
                self.table_name(&TableName::from(from))
            ));
        }
        statements.extend(self.drop_table(from));
        statements.push(format!(
            "ALTER TABLE {} RENAME TO {}",
            self.table_name(&TableName::from(&temporary)),
            self.quote_identifier(&to.name)
        ));
        statements.extend(to.indices.iter().map(|i| self.create_index(&target, i)));
        statements
    }

    // ========================================================================
    // Indices and constraints
    // ========================================================================

    /// Generates an index creation.
    fn create_index(&self, table: &TableName, index: &Index) -> String {
        let mut sql = String::from("CREATE ");
        if index.unique {
            sql.push_str("UNIQUE ");
        }
        sql.push_str("INDEX ");
        sql.push_str(&self.constraint_name(&index.name));
        sql.push_str(" ON ");
        sql.push_str(&self.table_name(table));
        match &index.expression {
            Some(expression) => sql.push_str(&format!(" ({expression})")),
            None => sql.push_str(&format!(" ({})", self.column_list(&index.columns))),
        }
        if let Some(condition) = &index.where_clause {
            sql.push_str(&format!(" WHERE {condition}"));
        }
        sql
    }

    /// Generates an index drop.
    fn drop_index(&self, table: &TableName, index: &Index) -> String {
        format!(
            "DROP INDEX {}",
            self.qualified_name(table.schema.as_deref(), &naming::fit_identifier(
                &index.name,
                self.capabilities().max_identifier_length,
            ))
        )
    }

    /// Renders `FOREIGN KEY (...) REFERENCES ...` with its actions.
    fn foreign_key_clause(&self, fk: &ForeignKey) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {} ({})",
            self.column_list(&fk.columns),
            self.qualified_name(fk.referenced_schema.as_deref(), &fk.referenced_table),
            self.column_list(&fk.referenced_columns)
        );
        sql.push_str(&format!(
            " ON DELETE {} ON UPDATE {}",
            self.normalize_fk_action(fk.on_delete).to_sql(),
            self.normalize_fk_action(fk.on_update).to_sql()
        ));
        if let Some(deferrable) = fk.deferrable {
            if self.capabilities().deferrable_constraints {
                sql.push(' ');
                sql.push_str(deferrable.to_sql());
            }
        }
        sql
    }

    /// Generates a foreign key addition.
    fn add_foreign_key(&self, table: &TableName, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.table_name(table),
            self.constraint_name(&fk.name),
            self.foreign_key_clause(fk)
        )
    }

    /// Generates a foreign key drop.
    fn drop_foreign_key(&self, table: &TableName, fk: &ForeignKey) -> String {
        self.drop_constraint(table, &fk.name)
    }

    /// Generates a unique constraint addition.
    fn add_unique(&self, table: &TableName, unique: &UniqueConstraint) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({})",
            self.table_name(table),
            self.constraint_name(&unique.name),
            self.column_list(&unique.columns)
        )
    }

    /// Generates a unique constraint drop.
    fn drop_unique(&self, table: &TableName, unique: &UniqueConstraint) -> String {
        self.drop_constraint(table, &unique.name)
    }

    /// Generates a check constraint addition.
    fn add_check(&self, table: &TableName, check: &CheckConstraint) -> String {
        format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({})",
            self.table_name(table),
            self.constraint_name(&check.name),
            check.expression
        )
    }

    /// Generates a check constraint drop.
    fn drop_check(&self, table: &TableName, check: &CheckConstraint) -> String {
        self.drop_constraint(table, &check.name)
    }

    /// `ALTER TABLE ... DROP CONSTRAINT ...`
    fn drop_constraint(&self, table: &TableName, name: &str) -> String {
        format!(
            "ALTER TABLE {} DROP CONSTRAINT {}",
            self.table_name(table),
            self.constraint_name(name)
        )
    }

    /// Generates statements replacing the primary key.
    fn change_primary_key(
        &self,
        table: &TableName,
        from: Option<&PrimaryKey>,
        to: Option<&PrimaryKey>,
    ) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(from) = from {
            statements.push(self.drop_constraint(table, &from.name));
        }
        if let Some(to) = to {
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                self.table_name(table),
                self.constraint_name(&to.name),
                self.column_list(&to.columns)
            ));
        }
        statements
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Generates a view creation.
    fn create_view(&self, view: &View) -> String {
        format!(
            "CREATE {}VIEW {} AS {}",
            if view.materialized { "MATERIALIZED " } else { "" },
            self.qualified_name(view.schema.as_deref(), &view.name),
            view.expression.trim().trim_end_matches(';')
        )
    }

    /// Generates a view drop.
    fn drop_view(&self, view: &View) -> String {
        format!(
            "DROP {}VIEW {}",
            if view.materialized { "MATERIALIZED " } else { "" },
            self.qualified_name(view.schema.as_deref(), &view.name)
        )
    }

    // ========================================================================
    // Named enum types
    // ========================================================================

    /// Generates a named enum type creation.
    fn create_enum_type(&self, enum_type: &NamedEnumType) -> String {
        let labels: Vec<String> = enum_type
            .labels
            .iter()
            .map(|l| self.quote_literal(l))
            .collect();
        format!(
            "CREATE TYPE {} AS ENUM({})",
            self.qualified_name(enum_type.schema.as_deref(), &enum_type.name),
            labels.join(", ")
        )
    }

    /// Generates a named enum type drop.
    fn drop_enum_type(&self, enum_type: &NamedEnumType) -> String {
        format!(
            "DROP TYPE {}",
            self.qualified_name(enum_type.schema.as_deref(), &enum_type.name)
        )
    }

    /// Generates a named enum type rename.
    fn rename_enum_type(&self, schema: Option<&str>, from: &str, to: &str) -> String {
        format!(
            "ALTER TYPE {} RENAME TO {}",
            self.qualified_name(schema, from),
            self.quote_identifier(to)
        )
    }

    /// Generates the statements replacing the labels of a named enum type:
    /// rename the old type aside, create the new one, repoint every column
    /// through a text cast, drop the old type.
    fn alter_enum_type(&self, enum_type: &NamedEnumType, columns: &[EnumColumn]) -> Vec<String> {
        let schema = enum_type.schema.as_deref();
        let old_name = naming::fit_identifier(
            &format!("{}_old", enum_type.name),
            self.capabilities().max_identifier_length,
        );
        let new_type = self.qualified_name(schema, &enum_type.name);

        let mut statements = vec![
            self.rename_enum_type(schema, &enum_type.name, &old_name),
            self.create_enum_type(enum_type),
        ];
        for column in columns {
            let table = self.table_name(&column.table);
            let name = self.quote_identifier(&column.column);
            let suffix = if column.is_array { "[]" } else { "" };
            if column.default.is_some() {
                statements.push(format!("ALTER TABLE {table} ALTER COLUMN {name} DROP DEFAULT"));
            }
            statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {name} TYPE {new_type}{suffix} USING {name}::text{suffix}::{new_type}{suffix}"
            ));
            if let Some(default) = &column.default {
                statements.push(format!(
                    "ALTER TABLE {table} ALTER COLUMN {name} SET DEFAULT {default}"
                ));
            }
        }
        statements.push(format!("DROP TYPE {}", self.qualified_name(schema, &old_name)));
        statements
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Statement opening a transaction.
    fn begin_transaction(&self) -> &'static str {
        "BEGIN TRANSACTION"
    }

    /// Statement committing a transaction.
    fn commit_transaction(&self) -> &'static str {
        "COMMIT"
    }

    /// Statement rolling back a transaction.
    fn rollback_transaction(&self) -> &'static str {
        "ROLLBACK"
    }
}

/// Appends length or precision modifiers to a base type.
pub(crate) fn with_modifiers(data_type: &str, column: &Column) -> String {
    if is_character_type(data_type) {
        if let Some(length) = column.length {
            return format!("{data_type}({length})");
        }
    }
    if matches!(data_type, "decimal" | "numeric") {
        if let Some(precision) = column.precision {
            return match column.scale {
                Some(scale) => format!("{data_type}({precision},{scale})"),
                None => format!("{data_type}({precision})"),
            };
        }
    }
    data_type.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        assert_eq!(DialectKind::from_url("postgres://localhost/db"), Some(DialectKind::Postgres));
        assert_eq!(DialectKind::from_url("mysql://root@localhost"), Some(DialectKind::Mysql));
        assert_eq!(DialectKind::from_url("sqlite:db.sqlite3"), Some(DialectKind::Sqlite));
        assert_eq!(DialectKind::from_url("oracle://x"), None);
    }

    #[test]
    fn test_with_modifiers() {
        assert_eq!(with_modifiers("varchar", &Column::new("a", "varchar").length(50)), "varchar(50)");
        assert_eq!(
            with_modifiers("numeric", &Column::new("a", "numeric").precision(10, Some(2))),
            "numeric(10,2)"
        );
        assert_eq!(with_modifiers("integer", &Column::new("a", "integer").length(4)), "integer");
    }

    #[test]
    fn test_capabilities_differ_per_dialect() {
        let pg = DialectKind::Postgres.dialect().capabilities();
        let mysql = DialectKind::Mysql.dialect().capabilities();
        let sqlite = DialectKind::Sqlite.dialect().capabilities();

        assert!(pg.named_enum_types && !mysql.named_enum_types && !sqlite.named_enum_types);
        assert!(pg.transactional_ddl && !mysql.transactional_ddl && sqlite.transactional_ddl);
        assert!(!sqlite.alter_column && !sqlite.alter_constraints);
        assert_eq!(pg.max_identifier_length, Some(63));
        assert_eq!(mysql.max_identifier_length, Some(64));
    }
}
