//! MySQL dialect.
//!
//! MySQL has no named enum types, no transactional DDL and drops most
//! constraints through dedicated `DROP` forms (`DROP FOREIGN KEY`,
//! `DROP INDEX`, `DROP CHECK`).

use super::{with_modifiers, DialectCapabilities, DialectKind, MigrationDialect};
use crate::declaration::DefaultValue;
use crate::normalize::is_character_type;
use crate::operations::{ColumnChanges, PrimaryKey, TableName};
use crate::schema::{
    CheckConstraint, Column, ForeignKey, ForeignKeyAction, Generation, Index, UniqueConstraint,
};

/// MySQL migration dialect.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    /// Creates a new MySQL dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl MigrationDialect for MysqlDialect {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn kind(&self) -> DialectKind {
        DialectKind::Mysql
    }

    fn capabilities(&self) -> DialectCapabilities {
        DialectCapabilities {
            max_identifier_length: Some(64),
            transactional_ddl: false,
            named_enum_types: false,
            check_constraints: true,
            unique_constraints: false,
            alter_column: true,
            alter_constraints: true,
            materialized_views: false,
            identity_columns: false,
            schemas: false,
            comments: true,
            database_uuid: false,
            deferrable_constraints: false,
        }
    }

    fn normalize_type(&self, data_type: &str) -> String {
        let lowered = data_type.trim().to_lowercase();
        let normalized = match lowered.as_str() {
            "integer" | "int4" => "int",
            "int8" => "bigint",
            "int2" => "smallint",
            "bool" | "boolean" => "tinyint",
            "numeric" | "dec" | "fixed" => "decimal",
            "double precision" | "real" | "float8" => "double",
            "float4" => "float",
            "character varying" | "string" | "uuid" => "varchar",
            "character" => "char",
            "simple-enum" => "enum",
            other => other,
        };
        normalized.to_string()
    }

    fn implied_length(&self, data_type: &str) -> Option<u32> {
        data_type.trim().eq_ignore_ascii_case("uuid").then_some(36)
    }

    fn default_length(&self, data_type: &str) -> Option<u32> {
        match data_type {
            "varchar" => Some(255),
            "char" | "binary" | "bit" => Some(1),
            _ => None,
        }
    }

    fn default_precision(&self, data_type: &str) -> Option<(u32, u32)> {
        matches!(data_type, "decimal" | "numeric").then_some((10, 0))
    }

    fn normalize_fk_action(&self, action: ForeignKeyAction) -> ForeignKeyAction {
        match action {
            ForeignKeyAction::Restrict => ForeignKeyAction::NoAction,
            other => other,
        }
    }

    fn render_default(&self, value: &DefaultValue) -> Option<String> {
        match value {
            DefaultValue::Null => None,
            DefaultValue::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
            DefaultValue::Integer(i) => Some(i.to_string()),
            DefaultValue::Float(f) => Some(f.to_string()),
            DefaultValue::String(s) => Some(self.quote_literal(s)),
            DefaultValue::Expression { expression } => Some(expression.clone()),
        }
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn quote_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn column_type(&self, _schema: Option<&str>, column: &Column) -> String {
        if column.is_enum() {
            let labels: Vec<String> = column
                .enum_values
                .iter()
                .map(|l| self.quote_literal(l))
                .collect();
            return format!("enum({})", labels.join(","));
        }
        let data_type = self.normalize_type(&column.data_type);
        if is_character_type(&data_type) && column.length.is_none() {
            let length = self
                .implied_length(&column.data_type)
                .or_else(|| self.default_length(&data_type));
            if let Some(length) = length {
                return format!("{data_type}({length})");
            }
        }
        let rendered = with_modifiers(&data_type, column);
        match column.srid {
            Some(srid) if column.spatial_type.is_some() => format!("{rendered} SRID {srid}"),
            _ => rendered,
        }
    }

    fn column_definition(&self, schema: Option<&str>, column: &Column) -> String {
        let mut parts = vec![
            self.quote_identifier(&column.name),
            self.column_type(schema, column),
        ];
        if let Some(charset) = &column.charset {
            parts.push(format!("CHARACTER SET {charset}"));
        }
        if let Some(collation) = &column.collation {
            parts.push(format!("COLLATE {collation}"));
        }
        if let Some(generated) = &column.generated_as {
            parts.push(format!(
                "GENERATED ALWAYS AS ({}) {}",
                generated.expression,
                generated.kind.to_sql()
            ));
        }
        if column.nullable {
            if column.generated_as.is_none() {
                parts.push("NULL".to_string());
            }
        } else {
            parts.push("NOT NULL".to_string());
        }
        if let Some(default) = self.column_default(column) {
            parts.push(format!("DEFAULT {default}"));
        }
        if let Some(on_update) = &column.on_update {
            parts.push(format!("ON UPDATE {on_update}"));
        }
        if matches!(
            column.generation,
            Some(Generation::Increment | Generation::Identity(_))
        ) {
            parts.push("AUTO_INCREMENT".to_string());
        }
        if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
            parts.push(format!("COMMENT {}", self.quote_literal(comment)));
        }
        parts.join(" ")
    }

    fn change_column(
        &self,
        table: &TableName,
        from: &Column,
        to: &Column,
        _changes: &ColumnChanges,
    ) -> Vec<String> {
        vec![format!(
            "ALTER TABLE {} CHANGE {} {}",
            self.table_name(table),
            self.quote_identifier(&from.name),
            self.column_definition(table.schema.as_deref(), to)
        )]
    }

    fn requires_column_recreate(&self, changes: &ColumnChanges) -> bool {
        changes.computed
    }

    fn create_index(&self, table: &TableName, index: &Index) -> String {
        let kind = if index.fulltext {
            "FULLTEXT "
        } else if index.spatial {
            "SPATIAL "
        } else if index.unique {
            "UNIQUE "
        } else {
            ""
        };
        let target = match &index.expression {
            Some(expression) => format!("(({expression}))"),
            None => format!("({})", self.column_list(&index.columns)),
        };
        format!(
            "CREATE {kind}INDEX {} ON {} {target}",
            self.constraint_name(&index.name),
            self.table_name(table)
        )
    }

    fn drop_index(&self, table: &TableName, index: &Index) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.constraint_name(&index.name),
            self.table_name(table)
        )
    }

    fn drop_foreign_key(&self, table: &TableName, fk: &ForeignKey) -> String {
        format!(
            "ALTER TABLE {} DROP FOREIGN KEY {}",
            self.table_name(table),
            self.constraint_name(&fk.name)
        )
    }

    fn drop_unique(&self, table: &TableName, unique: &UniqueConstraint) -> String {
        format!(
            "DROP INDEX {} ON {}",
            self.constraint_name(&unique.name),
            self.table_name(table)
        )
    }

    fn drop_check(&self, table: &TableName, check: &CheckConstraint) -> String {
        format!(
            "ALTER TABLE {} DROP CHECK {}",
            self.table_name(table),
            self.constraint_name(&check.name)
        )
    }

    fn change_primary_key(
        &self,
        table: &TableName,
        from: Option<&PrimaryKey>,
        to: Option<&PrimaryKey>,
    ) -> Vec<String> {
        let name = self.table_name(table);
        let mut statements = Vec::new();
        if from.is_some() {
            statements.push(format!("ALTER TABLE {name} DROP PRIMARY KEY"));
        }
        if let Some(to) = to {
            statements.push(format!(
                "ALTER TABLE {name} ADD PRIMARY KEY ({})",
                self.column_list(&to.columns)
            ));
        }
        statements
    }

    fn begin_transaction(&self) -> &'static str {
        "START TRANSACTION"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Table;

    fn dialect() -> MysqlDialect {
        MysqlDialect::new()
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(dialect().quote_identifier("users"), "`users`");
    }

    #[test]
    fn test_enum_column_inline() {
        let d = dialect();
        let status = Column::new("status", "enum")
            .not_null()
            .enumeration(None, ["A", "B"])
            .default("'A'");
        assert_eq!(
            d.column_definition(None, &status),
            "`status` enum('A','B') NOT NULL DEFAULT 'A'"
        );
    }

    #[test]
    fn test_varchar_gets_default_length() {
        let d = dialect();
        assert_eq!(d.column_type(None, &Column::new("name", "varchar")), "varchar(255)");
        assert_eq!(d.column_type(None, &Column::new("id", "uuid")), "varchar(36)");
    }

    #[test]
    fn test_auto_increment() {
        let d = dialect();
        let id = Column::new("id", "int").primary().generated(Generation::Increment);
        assert_eq!(d.column_definition(None, &id), "`id` int NOT NULL AUTO_INCREMENT");
    }

    #[test]
    fn test_drop_forms() {
        let d = dialect();
        let table = TableName::new("posts");
        let fk = ForeignKey::new("FK_a", vec!["a".into()], "users", vec!["id".into()]);
        assert_eq!(d.drop_foreign_key(&table, &fk), "ALTER TABLE `posts` DROP FOREIGN KEY `FK_a`");
        let uq = UniqueConstraint {
            name: "UQ_a".into(),
            columns: vec!["a".into()],
        };
        assert_eq!(d.drop_unique(&table, &uq), "DROP INDEX `UQ_a` ON `posts`");
        let idx = Index::new("IDX_a", vec!["a".into()]);
        assert_eq!(d.drop_index(&table, &idx), "DROP INDEX `IDX_a` ON `posts`");
    }

    #[test]
    fn test_change_column_single_statement() {
        let d = dialect();
        let from = Column::new("n", "int");
        let to = Column::new("n", "bigint").not_null();
        let sql = d.change_column(
            &TableName::new("t"),
            &from,
            &to,
            &ColumnChanges {
                data_type: true,
                nullable: true,
                ..ColumnChanges::default()
            },
        );
        assert_eq!(sql, vec!["ALTER TABLE `t` CHANGE `n` `n` bigint NOT NULL"]);
    }

    #[test]
    fn test_restrict_is_no_action() {
        let d = dialect();
        assert_eq!(
            d.normalize_fk_action(ForeignKeyAction::Restrict),
            ForeignKeyAction::NoAction
        );
        let table = Table::new("t").column(Column::new("id", "int").primary());
        assert!(d.create_table(&table)[0].contains("PRIMARY KEY (`id`)"));
    }

    #[test]
    fn test_boolean_default() {
        assert_eq!(dialect().render_default(&DefaultValue::Bool(true)), Some("1".into()));
    }
}
