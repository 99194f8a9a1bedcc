//! DDL synthesis.
//!
//! Renders a list of [`SchemaChange`]s into an up-queue and a down-queue of
//! [`SqlQuery`]s for one dialect, including the ledger rows that accompany
//! views, named enum types and generated columns.

use tracing::debug;

use crate::dialect::MigrationDialect;
use crate::error::{Result, SchemaError};
use crate::ledger::{Ledger, DEFAULT_LEDGER_TABLE};
use crate::operations::{SchemaChange, TableName};
use crate::schema::{Column, NamedEnumType, Table};
use crate::sql::{SqlInMemory, SqlQuery};

/// Options for [`synthesize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisOptions {
    /// Ledger table name.
    pub ledger_table: String,
    /// Whether the ledger table already exists.
    pub ledger_present: bool,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            ledger_present: false,
        }
    }
}

impl SynthesisOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ledger table name.
    #[must_use]
    pub fn ledger_table(mut self, name: impl Into<String>) -> Self {
        self.ledger_table = name.into();
        self
    }

    /// Marks the ledger table as existing.
    #[must_use]
    pub fn ledger_present(mut self, present: bool) -> Self {
        self.ledger_present = present;
        self
    }
}

/// Renders `changes` into up and down queues.
///
/// The down-queue holds, for each change, the statements of its reverse.
/// Executing it back to front undoes the up-queue.
pub fn synthesize(
    changes: &[SchemaChange],
    dialect: &dyn MigrationDialect,
    options: &SynthesisOptions,
) -> Result<SqlInMemory> {
    let mut synthesizer = Synthesizer {
        dialect,
        ledger: Ledger::new(&options.ledger_table, dialect),
        ledger_used: false,
    };
    let mut sql = SqlInMemory::default();

    for change in changes {
        synthesizer.check(change)?;
        let up = synthesizer.render(change);
        let down = synthesizer.render(&change.reverse());
        debug!(change = %change, up = up.len(), down = down.len(), "Synthesized change");
        sql.up_queries.extend(up);
        sql.down_queries.extend(down.into_iter().rev());
    }

    if synthesizer.ledger_used && !options.ledger_present {
        sql.up_queries.insert(0, synthesizer.ledger.create_table());
    }
    Ok(sql)
}

struct Synthesizer<'a> {
    dialect: &'a dyn MigrationDialect,
    ledger: Ledger<'a>,
    ledger_used: bool,
}

impl Synthesizer<'_> {
    fn unsupported(&self, change: &SchemaChange) -> SchemaError {
        SchemaError::unsupported(self.dialect.name(), change.description())
    }

    /// Rejects changes the dialect cannot express.
    fn check(&self, change: &SchemaChange) -> Result<()> {
        let caps = self.dialect.capabilities();
        let supported = match change {
            SchemaChange::CreateEnumType { .. }
            | SchemaChange::DropEnumType { .. }
            | SchemaChange::RenameEnumType { .. }
            | SchemaChange::AlterEnumType { .. } => caps.named_enum_types,
            SchemaChange::CreateView { view } | SchemaChange::DropView { view } => {
                !view.materialized || caps.materialized_views
            }
            SchemaChange::AddCheckConstraint { .. } | SchemaChange::DropCheckConstraint { .. } => {
                caps.check_constraints && caps.alter_constraints
            }
            SchemaChange::AddForeignKey { .. }
            | SchemaChange::DropForeignKey { .. }
            | SchemaChange::AddUniqueConstraint { .. }
            | SchemaChange::DropUniqueConstraint { .. }
            | SchemaChange::ChangePrimaryKey { .. } => caps.alter_constraints,
            SchemaChange::ChangeColumn { changes, .. } => {
                caps.alter_column || self.dialect.requires_column_recreate(changes)
            }
            SchemaChange::CreateTable { table } | SchemaChange::DropTable { table } => {
                caps.check_constraints || table.checks.is_empty()
            }
            _ => true,
        };
        if supported {
            Ok(())
        } else {
            Err(self.unsupported(change))
        }
    }

    fn render(&mut self, change: &SchemaChange) -> Vec<SqlQuery> {
        let dialect = self.dialect;
        let mut queries = Vec::new();
        match change {
            SchemaChange::CreateTable { table } => {
                queries.extend(ddl(dialect.create_table(table)));
                for column in &table.columns {
                    queries.extend(self.record_generated(&TableName::from(table), column));
                }
            }
            SchemaChange::DropTable { table } => {
                for column in &table.columns {
                    queries.extend(self.remove_generated(&TableName::from(table), column));
                }
                queries.extend(ddl(dialect.drop_table(table)));
            }
            SchemaChange::AddColumn { table, column } => {
                queries.extend(ddl(dialect.add_column(table, column)));
                queries.extend(self.record_generated(table, column));
            }
            SchemaChange::DropColumn { table, column } => {
                queries.extend(self.remove_generated(table, column));
                queries.extend(ddl(dialect.drop_column(table, column)));
            }
            SchemaChange::ChangeColumn {
                table,
                from,
                to,
                changes,
            } => {
                if dialect.requires_column_recreate(changes) {
                    queries.extend(self.remove_generated(table, from));
                    queries.extend(ddl(dialect.drop_column(table, from)));
                    queries.extend(ddl(dialect.add_column(table, to)));
                    queries.extend(self.record_generated(table, to));
                } else {
                    queries.extend(ddl(dialect.change_column(table, from, to, changes)));
                }
            }
            SchemaChange::RenameColumn { table, from, to } => {
                queries.push(SqlQuery::new(dialect.rename_column(table, from, to)));
            }
            SchemaChange::CreateIndex { table, index } => {
                queries.push(SqlQuery::new(dialect.create_index(table, index)));
            }
            SchemaChange::DropIndex { table, index } => {
                queries.push(SqlQuery::new(dialect.drop_index(table, index)));
            }
            SchemaChange::AddForeignKey { table, foreign_key } => {
                queries.push(SqlQuery::new(dialect.add_foreign_key(table, foreign_key)));
            }
            SchemaChange::DropForeignKey { table, foreign_key } => {
                queries.push(SqlQuery::new(dialect.drop_foreign_key(table, foreign_key)));
            }
            SchemaChange::AddUniqueConstraint { table, constraint } => {
                queries.push(SqlQuery::new(dialect.add_unique(table, constraint)));
            }
            SchemaChange::DropUniqueConstraint { table, constraint } => {
                queries.push(SqlQuery::new(dialect.drop_unique(table, constraint)));
            }
            SchemaChange::AddCheckConstraint { table, constraint } => {
                queries.push(SqlQuery::new(dialect.add_check(table, constraint)));
            }
            SchemaChange::DropCheckConstraint { table, constraint } => {
                queries.push(SqlQuery::new(dialect.drop_check(table, constraint)));
            }
            SchemaChange::ChangePrimaryKey { table, from, to } => {
                queries.extend(ddl(dialect.change_primary_key(table, from.as_ref(), to.as_ref())));
            }
            SchemaChange::RecreateTable { from, to } => {
                queries.extend(self.replace_generated(from, to));
                queries.extend(ddl(dialect.recreate_table(from, to)));
            }
            SchemaChange::CreateView { view } => {
                queries.push(SqlQuery::new(dialect.create_view(view)));
                queries.push(self.ledger_row(|l| l.record_view(view)));
            }
            SchemaChange::DropView { view } => {
                queries.push(self.ledger_row(|l| {
                    l.remove_view(view.schema.as_deref(), &view.name, view.materialized)
                }));
                queries.push(SqlQuery::new(dialect.drop_view(view)));
            }
            SchemaChange::CreateEnumType { enum_type } => {
                queries.push(SqlQuery::new(dialect.create_enum_type(enum_type)));
                queries.push(self.ledger_row(|l| l.record_enum_type(enum_type)));
            }
            SchemaChange::DropEnumType { enum_type } => {
                queries.push(self.ledger_row(|l| {
                    l.remove_enum_type(enum_type.schema.as_deref(), &enum_type.name)
                }));
                queries.push(SqlQuery::new(dialect.drop_enum_type(enum_type)));
            }
            SchemaChange::RenameEnumType {
                schema,
                from,
                to,
                labels,
            } => {
                let renamed = NamedEnumType {
                    name: to.clone(),
                    schema: schema.clone(),
                    labels: labels.clone(),
                };
                queries.push(SqlQuery::new(dialect.rename_enum_type(schema.as_deref(), from, to)));
                queries.push(self.ledger_row(|l| l.remove_enum_type(schema.as_deref(), from)));
                queries.push(self.ledger_row(|l| l.record_enum_type(&renamed)));
            }
            SchemaChange::AlterEnumType {
                enum_type, columns, ..
            } => {
                queries.extend(ddl(dialect.alter_enum_type(enum_type, columns)));
                queries.push(self.ledger_row(|l| {
                    l.remove_enum_type(enum_type.schema.as_deref(), &enum_type.name)
                }));
                queries.push(self.ledger_row(|l| l.record_enum_type(enum_type)));
            }
        }
        queries
    }

    fn ledger_row(&mut self, build: impl FnOnce(&Ledger<'_>) -> SqlQuery) -> SqlQuery {
        self.ledger_used = true;
        build(&self.ledger)
    }

    fn record_generated(&mut self, table: &TableName, column: &Column) -> Option<SqlQuery> {
        let generated = column.generated_as.as_ref()?;
        if !self.dialect.tracks_generated_columns() {
            return None;
        }
        Some(self.ledger_row(|l| {
            l.record_generated_column(
                table.schema.as_deref(),
                &table.name,
                &column.name,
                &generated.expression,
            )
        }))
    }

    fn remove_generated(&mut self, table: &TableName, column: &Column) -> Option<SqlQuery> {
        if column.generated_as.is_none() || !self.dialect.tracks_generated_columns() {
            return None;
        }
        Some(self.ledger_row(|l| {
            l.remove_generated_column(table.schema.as_deref(), &table.name, &column.name)
        }))
    }

    fn replace_generated(&mut self, from: &Table, to: &Table) -> Vec<SqlQuery> {
        let old = TableName::from(from);
        let new = TableName::from(to);
        let mut queries: Vec<SqlQuery> = Vec::new();
        for column in &from.columns {
            queries.extend(self.remove_generated(&old, column));
        }
        for column in &to.columns {
            queries.extend(self.record_generated(&new, column));
        }
        queries
    }
}

fn ddl(statements: Vec<String>) -> impl Iterator<Item = SqlQuery> {
    statements.into_iter().map(SqlQuery::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{MysqlDialect, PostgresDialect, SqliteDialect};
    use crate::operations::EnumColumn;
    use crate::schema::{ForeignKey, GeneratedKind, Generation, View};

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("name", "varchar").not_null())
    }

    fn queries(list: &[SqlQuery]) -> Vec<&str> {
        list.iter().map(|q| q.query.as_str()).collect()
    }

    #[test]
    fn test_create_table_down_is_drop() {
        let dialect = SqliteDialect::new();
        let sql = synthesize(
            &[SchemaChange::CreateTable { table: users() }],
            &dialect,
            &SynthesisOptions::new(),
        )
        .unwrap();
        assert_eq!(sql.up_queries.len(), 1);
        assert_eq!(queries(&sql.down_queries), vec!["DROP TABLE \"users\""]);
    }

    #[test]
    fn test_down_queue_undoes_in_reverse() {
        let dialect = PostgresDialect::new();
        let changes = vec![
            SchemaChange::AddColumn {
                table: TableName::new("users"),
                column: Column::new("bio", "text").comment("About"),
            },
            SchemaChange::RenameColumn {
                table: TableName::new("users"),
                from: "name".into(),
                to: "full_name".into(),
            },
        ];
        let sql = synthesize(&changes, &dialect, &SynthesisOptions::new()).unwrap();
        assert_eq!(
            queries(&sql.up_queries),
            vec![
                "ALTER TABLE \"users\" ADD COLUMN \"bio\" text",
                "COMMENT ON COLUMN \"users\".\"bio\" IS 'About'",
                "ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\"",
            ]
        );
        let down: Vec<&str> = sql
            .down_in_execution_order()
            .map(|q| q.query.as_str())
            .collect();
        assert_eq!(
            down,
            vec![
                "ALTER TABLE \"users\" RENAME COLUMN \"full_name\" TO \"name\"",
                "ALTER TABLE \"users\" DROP COLUMN \"bio\"",
            ]
        );
    }

    #[test]
    fn test_view_writes_ledger_and_creates_it_once() {
        let dialect = PostgresDialect::new();
        let changes = vec![
            SchemaChange::CreateView {
                view: View::new("a", "SELECT 1"),
            },
            SchemaChange::CreateView {
                view: View::new("b", "SELECT 2"),
            },
        ];
        let sql = synthesize(&changes, &dialect, &SynthesisOptions::new()).unwrap();
        let up = queries(&sql.up_queries);
        assert!(up[0].starts_with("CREATE TABLE \"oxide_metadata\""));
        assert_eq!(up.iter().filter(|q| q.starts_with("CREATE TABLE")).count(), 1);
        assert_eq!(up[1], "CREATE VIEW \"a\" AS SELECT 1");
        assert!(up[2].starts_with("INSERT INTO \"oxide_metadata\""));
        assert_eq!(sql.down_queries.len(), 4);

        let present = SynthesisOptions::new().ledger_present(true);
        let sql = synthesize(&changes, &dialect, &present).unwrap();
        assert_eq!(sql.up_queries.len(), 4);
    }

    #[test]
    fn test_enum_ops_rejected_without_named_enums() {
        let dialect = MysqlDialect::new();
        let change = SchemaChange::CreateEnumType {
            enum_type: NamedEnumType {
                name: "e".into(),
                schema: None,
                labels: vec!["A".into()],
            },
        };
        let result = synthesize(&[change], &dialect, &SynthesisOptions::new());
        match result {
            Err(SchemaError::UnsupportedOperation { dialect, .. }) => assert_eq!(dialect, "mysql"),
            _ => panic!("Expected UnsupportedOperation"),
        }
    }

    #[test]
    fn test_sqlite_rejects_constraint_alters() {
        let dialect = SqliteDialect::new();
        let change = SchemaChange::AddForeignKey {
            table: TableName::new("posts"),
            foreign_key: ForeignKey::new("FK_a", vec!["a".into()], "users", vec!["id".into()]),
        };
        assert!(synthesize(&[change], &dialect, &SynthesisOptions::new()).is_err());
    }

    #[test]
    fn test_alter_enum_rewrites_ledger_row() {
        let dialect = PostgresDialect::new();
        let change = SchemaChange::AlterEnumType {
            enum_type: NamedEnumType {
                name: "status_enum".into(),
                schema: None,
                labels: vec!["A".into(), "B".into(), "C".into()],
            },
            from_labels: vec!["A".into(), "B".into()],
            columns: vec![EnumColumn {
                table: TableName::new("users"),
                column: "status".into(),
                default: None,
                is_array: false,
            }],
        };
        let sql = synthesize(&[change], &dialect, &SynthesisOptions::new().ledger_present(true))
            .unwrap();
        let up = queries(&sql.up_queries);
        assert_eq!(up[0], "ALTER TYPE \"status_enum\" RENAME TO \"status_enum_old\"");
        assert!(up[up.len() - 1].starts_with("INSERT INTO"));
        let down_create = sql
            .down_queries
            .iter()
            .find(|q| q.query.starts_with("CREATE TYPE"))
            .map(|q| q.query.as_str());
        assert_eq!(down_create, Some("CREATE TYPE \"status_enum\" AS ENUM('A', 'B')"));
    }

    #[test]
    fn test_generated_column_change_is_drop_and_add() {
        let dialect = PostgresDialect::new();
        let from = Column::new("total", "integer").generated_as("a + b", GeneratedKind::Stored);
        let to = Column::new("total", "integer").generated_as("a * b", GeneratedKind::Stored);
        let change = SchemaChange::ChangeColumn {
            table: TableName::new("t"),
            from,
            to,
            changes: crate::operations::ColumnChanges {
                computed: true,
                ..Default::default()
            },
        };
        let sql = synthesize(&[change], &dialect, &SynthesisOptions::new().ledger_present(true))
            .unwrap();
        let up = queries(&sql.up_queries);
        assert!(up[0].starts_with("DELETE FROM \"oxide_metadata\""));
        assert_eq!(up[1], "ALTER TABLE \"t\" DROP COLUMN \"total\"");
        assert!(up[2].starts_with("ALTER TABLE \"t\" ADD COLUMN \"total\" integer GENERATED ALWAYS AS (a * b) STORED"));
        assert_eq!(sql.up_queries[3].parameters[3].as_str(), Some("a * b"));
    }
}
