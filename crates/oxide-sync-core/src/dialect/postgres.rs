//! PostgreSQL dialect.

use super::{with_modifiers, DialectCapabilities, DialectKind, MigrationDialect};
use crate::operations::{ColumnChanges, TableName};
use crate::schema::{Column, Generation, Index};

/// PostgreSQL migration dialect.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Creates a new PostgreSQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Column type without serial shorthands, as accepted by
    /// `ALTER COLUMN ... TYPE`.
    fn plain_type(&self, schema: Option<&str>, column: &Column) -> String {
        let mut plain = column.clone();
        plain.generation = None;
        self.column_type(schema, &plain)
    }
}

impl MigrationDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            max_identifier_length: Some(63),
            transactional_ddl: true,
            named_enum_types: true,
            check_constraints: true,
            unique_constraints: true,
            alter_column: true,
            alter_constraints: true,
            materialized_views: true,
            identity_columns: true,
            schemas: true,
            comments: true,
            database_uuid: true,
            deferrable_constraints: true,
        }
    }

    fn normalize_type(&self, data_type: &str) -> String {
        let lowered = data_type.trim().to_lowercase();
        let normalized = match lowered.as_str() {
            "int" | "int4" | "serial" | "serial4" => "integer",
            "int2" | "smallserial" | "serial2" => "smallint",
            "int8" | "bigserial" | "serial8" => "bigint",
            "float4" => "real",
            "float8" | "float" | "double" => "double precision",
            "decimal" => "numeric",
            "bool" => "boolean",
            "varchar" | "string" => "character varying",
            "char" | "bpchar" => "character",
            "timestamp" => "timestamp without time zone",
            "timestamptz" => "timestamp with time zone",
            "time" => "time without time zone",
            "timetz" => "time with time zone",
            "varbit" => "bit varying",
            "simple-enum" => "enum",
            other => other,
        };
        normalized.to_string()
    }

    fn default_length(&self, data_type: &str) -> Option<u32> {
        matches!(data_type, "character" | "bit").then_some(1)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn column_type(&self, schema: Option<&str>, column: &Column) -> String {
        let base = if column.is_enum() {
            match &column.enum_name {
                Some(name) => self.qualified_name(schema, name),
                None => "character varying".to_string(),
            }
        } else {
            let data_type = self.normalize_type(&column.data_type);
            let serial = match (column.generation, data_type.as_str()) {
                (Some(Generation::Increment), "integer") => Some("serial"),
                (Some(Generation::Increment), "bigint") => Some("bigserial"),
                (Some(Generation::Increment), "smallint") => Some("smallserial"),
                _ => None,
            };
            match (serial, &column.spatial_type) {
                (Some(serial), _) if !column.is_array => serial.to_string(),
                (_, Some(spatial)) => match column.srid {
                    Some(srid) => format!("{data_type}({spatial},{srid})"),
                    None => format!("{data_type}({spatial})"),
                },
                _ => with_modifiers(&data_type, column),
            }
        };
        if column.is_array {
            format!("{base}[]")
        } else {
            base
        }
    }

    fn column_default(&self, column: &Column) -> Option<String> {
        if column.generated_as.is_some() {
            return None;
        }
        match (&column.default, column.generation) {
            (Some(default), _) => Some(default.clone()),
            (None, Some(Generation::Uuid)) => Some("gen_random_uuid()".to_string()),
            _ => None,
        }
    }

    fn comment_on_column(
        &self,
        table: &TableName,
        column: &str,
        comment: Option<&str>,
    ) -> Option<String> {
        Some(format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            self.table_name(table),
            self.quote_identifier(column),
            comment.map_or_else(|| "NULL".to_string(), |c| self.quote_literal(c))
        ))
    }

    fn change_column(
        &self,
        table: &TableName,
        from: &Column,
        to: &Column,
        changes: &ColumnChanges,
    ) -> Vec<String> {
        let name = self.table_name(table);
        let column = self.quote_identifier(&to.name);
        let schema = table.schema.as_deref();
        let mut statements = Vec::new();

        if changes.data_type {
            let target = self.plain_type(schema, to);
            let cast = if from.is_enum() || to.is_enum() {
                format!("{column}::text::{target}")
            } else {
                format!("{column}::{target}")
            };
            if self.column_default(from).is_some() {
                statements.push(format!("ALTER TABLE {name} ALTER COLUMN {column} DROP DEFAULT"));
            }
            statements.push(format!(
                "ALTER TABLE {name} ALTER COLUMN {column} TYPE {target} USING {cast}"
            ));
            if let Some(default) = self.column_default(to) {
                statements.push(format!(
                    "ALTER TABLE {name} ALTER COLUMN {column} SET DEFAULT {default}"
                ));
            }
        }

        if changes.nullable {
            let action = if to.nullable { "DROP" } else { "SET" };
            statements.push(format!("ALTER TABLE {name} ALTER COLUMN {column} {action} NOT NULL"));
        }

        if changes.default && !changes.data_type {
            statements.push(match self.column_default(to) {
                Some(default) => {
                    format!("ALTER TABLE {name} ALTER COLUMN {column} SET DEFAULT {default}")
                }
                None => format!("ALTER TABLE {name} ALTER COLUMN {column} DROP DEFAULT"),
            });
        }

        if changes.comment {
            statements.extend(self.comment_on_column(
                table,
                &to.name,
                to.comment.as_deref().filter(|c| !c.is_empty()),
            ));
        }
        statements
    }

    fn create_index(&self, table: &TableName, index: &Index) -> String {
        let mut sql = format!(
            "CREATE {}INDEX {} ON {}",
            if index.unique { "UNIQUE " } else { "" },
            self.constraint_name(&index.name),
            self.table_name(table)
        );
        if index.spatial {
            sql.push_str(" USING GiST");
        }
        match &index.expression {
            Some(expression) => sql.push_str(&format!(" ({expression})")),
            None => sql.push_str(&format!(" ({})", self.column_list(&index.columns))),
        }
        if let Some(condition) = &index.where_clause {
            sql.push_str(&format!(" WHERE {condition}"));
        }
        sql
    }

    fn begin_transaction(&self) -> &'static str {
        "START TRANSACTION"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::EnumColumn;
    use crate::schema::{ForeignKey, ForeignKeyAction, IdentityPolicy, NamedEnumType, Table};

    fn dialect() -> PostgresDialect {
        PostgresDialect::new()
    }

    #[test]
    fn test_type_aliases() {
        let d = dialect();
        assert_eq!(d.normalize_type("int4"), "integer");
        assert_eq!(d.normalize_type("VARCHAR"), "character varying");
        assert_eq!(d.normalize_type("timestamptz"), "timestamp with time zone");
        assert_eq!(d.normalize_type("jsonb"), "jsonb");
    }

    #[test]
    fn test_column_types() {
        let d = dialect();
        let serial = Column::new("id", "integer").generated(Generation::Increment);
        assert_eq!(d.column_type(None, &serial), "serial");

        let tags = Column::new("tags", "text").array();
        assert_eq!(d.column_type(None, &tags), "text[]");

        let status = Column::new("status", "enum").enumeration(Some("users_status_enum"), ["A"]);
        assert_eq!(d.column_type(Some("app"), &status), "\"app\".\"users_status_enum\"");

        let name = Column::new("name", "varchar").length(100);
        assert_eq!(d.column_type(None, &name), "character varying(100)");
    }

    #[test]
    fn test_column_definition() {
        let d = dialect();
        let id = Column::new("id", "uuid").primary().generated(Generation::Uuid);
        assert_eq!(
            d.column_definition(None, &id),
            "\"id\" uuid NOT NULL DEFAULT gen_random_uuid()"
        );

        let identity = Column::new("n", "bigint")
            .not_null()
            .generated(Generation::Identity(IdentityPolicy::ByDefault));
        assert_eq!(
            d.column_definition(None, &identity),
            "\"n\" bigint GENERATED BY DEFAULT AS IDENTITY NOT NULL"
        );
    }

    #[test]
    fn test_create_table() {
        let d = dialect();
        let table = Table::new("posts")
            .column(Column::new("id", "integer").primary().generated(Generation::Increment))
            .column(Column::new("author_id", "integer").comment("Author"))
            .foreign_key(
                ForeignKey::new("FK_author", vec!["author_id".into()], "users", vec!["id".into()])
                    .on_delete(ForeignKeyAction::Cascade),
            );
        let sql = d.create_table(&table);

        assert!(sql[0].starts_with("CREATE TABLE \"posts\" (\"id\" serial NOT NULL"));
        assert!(sql[0].contains("PRIMARY KEY (\"id\")"));
        assert!(sql[0].contains(
            "CONSTRAINT \"FK_author\" FOREIGN KEY (\"author_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE ON UPDATE NO ACTION"
        ));
        assert_eq!(sql[1], "COMMENT ON COLUMN \"posts\".\"author_id\" IS 'Author'");
    }

    #[test]
    fn test_change_column_type_and_null() {
        let d = dialect();
        let from = Column::new("n", "integer").default("0");
        let to = Column::new("n", "bigint").not_null().default("0");
        let changes = ColumnChanges {
            data_type: true,
            nullable: true,
            ..ColumnChanges::default()
        };
        let sql = d.change_column(&TableName::new("t"), &from, &to, &changes);
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"t\" ALTER COLUMN \"n\" DROP DEFAULT",
                "ALTER TABLE \"t\" ALTER COLUMN \"n\" TYPE bigint USING \"n\"::bigint",
                "ALTER TABLE \"t\" ALTER COLUMN \"n\" SET DEFAULT 0",
                "ALTER TABLE \"t\" ALTER COLUMN \"n\" SET NOT NULL",
            ]
        );
    }

    #[test]
    fn test_alter_enum_type() {
        let d = dialect();
        let enum_type = NamedEnumType {
            name: "users_status_enum".into(),
            schema: None,
            labels: vec!["A".into(), "B".into(), "C".into()],
        };
        let columns = vec![EnumColumn {
            table: TableName::new("users"),
            column: "status".into(),
            default: Some("'A'".into()),
            is_array: false,
        }];
        let sql = d.alter_enum_type(&enum_type, &columns);
        assert_eq!(
            sql,
            vec![
                "ALTER TYPE \"users_status_enum\" RENAME TO \"users_status_enum_old\"",
                "CREATE TYPE \"users_status_enum\" AS ENUM('A', 'B', 'C')",
                "ALTER TABLE \"users\" ALTER COLUMN \"status\" DROP DEFAULT",
                "ALTER TABLE \"users\" ALTER COLUMN \"status\" TYPE \"users_status_enum\" USING \"status\"::text::\"users_status_enum\"",
                "ALTER TABLE \"users\" ALTER COLUMN \"status\" SET DEFAULT 'A'",
                "DROP TYPE \"users_status_enum_old\"",
            ]
        );
    }

    #[test]
    fn test_alter_enum_type_with_long_name() {
        let d = dialect();
        let name = "e".repeat(63);
        let enum_type = NamedEnumType {
            name: name.clone(),
            schema: None,
            labels: vec!["A".into()],
        };
        let sql = d.alter_enum_type(&enum_type, &[]);
        let aside = sql[0].split('"').nth(3).unwrap_or_default();
        assert_eq!(aside.len(), 63);
        assert_ne!(aside, name);
        assert_eq!(sql.last().map(String::as_str), Some(format!("DROP TYPE \"{aside}\"").as_str()));
    }

    #[test]
    fn test_placeholder_and_long_names() {
        let d = dialect();
        assert_eq!(d.placeholder(2), "$2");
        let index = Index::new("IDX_".to_string() + &"x".repeat(70), vec!["a".into()]);
        let sql = d.create_index(&TableName::new("t"), &index);
        let name = sql.split('"').nth(1).unwrap_or_default();
        assert_eq!(name.len(), 63);
    }
}
