//! Ledger rows and the statements that maintain them.
//!
//! The ledger is a plain `{type, schema, name, value}` table that records
//! what the catalog cannot give back faithfully: view definitions, enum
//! label sets and the original text of generated column expressions. Rows
//! are written by the same up/down queues as the DDL they describe.

use serde::{Deserialize, Serialize};

use crate::dialect::MigrationDialect;
use crate::schema::{NamedEnumType, View};
use crate::sql::{SqlQuery, SqlValue};

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "oxide_metadata";

/// What a ledger row records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerKind {
    /// A plain view.
    View,
    /// A materialized view.
    MaterializedView,
    /// A named enum type; the value is a JSON array of labels.
    EnumType,
    /// A generated column; the name is `table.column`.
    GeneratedColumn,
}

impl LedgerKind {
    /// Value stored in the `type` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::View => "VIEW",
            Self::MaterializedView => "MATERIALIZED_VIEW",
            Self::EnumType => "ENUM_TYPE",
            Self::GeneratedColumn => "GENERATED_COLUMN",
        }
    }

    /// Parses a stored `type` value.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "VIEW" => Some(Self::View),
            "MATERIALIZED_VIEW" => Some(Self::MaterializedView),
            "ENUM_TYPE" => Some(Self::EnumType),
            "GENERATED_COLUMN" => Some(Self::GeneratedColumn),
            _ => None,
        }
    }

    fn for_view(materialized: bool) -> Self {
        if materialized {
            Self::MaterializedView
        } else {
            Self::View
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRow {
    /// Row kind.
    pub kind: LedgerKind,
    /// Schema qualifier.
    pub schema: Option<String>,
    /// Object name.
    pub name: String,
    /// Recorded definition.
    pub value: String,
}

impl LedgerRow {
    /// Enum labels stored in an `ENUM_TYPE` row.
    #[must_use]
    pub fn labels(&self) -> Option<Vec<String>> {
        if self.kind != LedgerKind::EnumType {
            return None;
        }
        serde_json::from_str(&self.value).ok()
    }

    /// `(table, column)` of a `GENERATED_COLUMN` row.
    #[must_use]
    pub fn generated_column(&self) -> Option<(&str, &str)> {
        if self.kind != LedgerKind::GeneratedColumn {
            return None;
        }
        self.name.rsplit_once('.')
    }
}

/// Builds ledger statements for one dialect.
pub struct Ledger<'a> {
    table: &'a str,
    dialect: &'a dyn MigrationDialect,
}

impl<'a> Ledger<'a> {
    /// Creates a builder for the ledger table `table`.
    #[must_use]
    pub fn new(table: &'a str, dialect: &'a dyn MigrationDialect) -> Self {
        Self { table, dialect }
    }

    fn name(&self) -> String {
        self.dialect.quote_identifier(self.table)
    }

    fn columns(&self) -> [String; 4] {
        ["type", "schema", "name", "value"].map(|c| self.dialect.quote_identifier(c))
    }

    /// `CREATE TABLE` for the ledger.
    #[must_use]
    pub fn create_table(&self) -> SqlQuery {
        let [kind, schema, name, value] = self.columns();
        SqlQuery::new(format!(
            "CREATE TABLE {} ({kind} varchar(255) NOT NULL, {schema} varchar(255), {name} varchar(255), {value} text)",
            self.name()
        ))
    }

    /// Selects every row.
    #[must_use]
    pub fn select(&self) -> SqlQuery {
        SqlQuery::new(format!(
            "SELECT {} FROM {}",
            self.columns().join(", "),
            self.name()
        ))
    }

    fn insert(&self, kind: LedgerKind, schema: Option<&str>, name: &str, value: String) -> SqlQuery {
        let placeholders: Vec<String> = (1..=4).map(|i| self.dialect.placeholder(i)).collect();
        SqlQuery::with_parameters(
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.name(),
                self.columns().join(", "),
                placeholders.join(", ")
            ),
            vec![
                SqlValue::from(kind.as_str()),
                SqlValue::from(schema),
                SqlValue::from(name),
                SqlValue::from(value),
            ],
        )
    }

    fn delete(&self, kind: LedgerKind, schema: Option<&str>, name: &str) -> SqlQuery {
        let [kind_column, schema_column, name_column, _] = self.columns();
        let mut parameters = vec![SqlValue::from(kind.as_str()), SqlValue::from(name)];
        let schema_clause = match schema {
            Some(schema) => {
                parameters.push(SqlValue::from(schema));
                format!("{schema_column} = {}", self.dialect.placeholder(3))
            }
            None => format!("{schema_column} IS NULL"),
        };
        SqlQuery::with_parameters(
            format!(
                "DELETE FROM {} WHERE {kind_column} = {} AND {name_column} = {} AND {schema_clause}",
                self.name(),
                self.dialect.placeholder(1),
                self.dialect.placeholder(2)
            ),
            parameters,
        )
    }

    /// Records a view definition.
    #[must_use]
    pub fn record_view(&self, view: &View) -> SqlQuery {
        self.insert(
            LedgerKind::for_view(view.materialized),
            view.schema.as_deref(),
            &view.name,
            view.expression.clone(),
        )
    }

    /// Removes a view definition.
    #[must_use]
    pub fn remove_view(&self, schema: Option<&str>, name: &str, materialized: bool) -> SqlQuery {
        self.delete(LedgerKind::for_view(materialized), schema, name)
    }

    /// Records the label set of a named enum type.
    #[must_use]
    pub fn record_enum_type(&self, enum_type: &NamedEnumType) -> SqlQuery {
        let labels = serde_json::Value::from(enum_type.labels.clone()).to_string();
        self.insert(
            LedgerKind::EnumType,
            enum_type.schema.as_deref(),
            &enum_type.name,
            labels,
        )
    }

    /// Removes the row of a named enum type.
    #[must_use]
    pub fn remove_enum_type(&self, schema: Option<&str>, name: &str) -> SqlQuery {
        self.delete(LedgerKind::EnumType, schema, name)
    }

    /// Records the declared expression of a generated column.
    #[must_use]
    pub fn record_generated_column(
        &self,
        schema: Option<&str>,
        table: &str,
        column: &str,
        expression: &str,
    ) -> SqlQuery {
        self.insert(
            LedgerKind::GeneratedColumn,
            schema,
            &format!("{table}.{column}"),
            expression.to_string(),
        )
    }

    /// Removes the row of a generated column.
    #[must_use]
    pub fn remove_generated_column(&self, schema: Option<&str>, table: &str, column: &str) -> SqlQuery {
        self.delete(LedgerKind::GeneratedColumn, schema, &format!("{table}.{column}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{PostgresDialect, SqliteDialect};

    #[test]
    fn test_record_view() {
        let dialect = SqliteDialect::new();
        let ledger = Ledger::new(DEFAULT_LEDGER_TABLE, &dialect);
        let query = ledger.record_view(&View::new("active", "SELECT 1"));
        assert_eq!(
            query.query,
            "INSERT INTO \"oxide_metadata\" (\"type\", \"schema\", \"name\", \"value\") VALUES (?, ?, ?, ?)"
        );
        assert_eq!(
            query.parameters,
            vec![
                SqlValue::from("VIEW"),
                SqlValue::Null,
                SqlValue::from("active"),
                SqlValue::from("SELECT 1"),
            ]
        );
    }

    #[test]
    fn test_remove_with_schema_uses_placeholders() {
        let dialect = PostgresDialect::new();
        let ledger = Ledger::new("meta", &dialect);
        let query = ledger.remove_view(Some("app"), "active", true);
        assert_eq!(
            query.query,
            "DELETE FROM \"meta\" WHERE \"type\" = $1 AND \"name\" = $2 AND \"schema\" = $3"
        );
        assert_eq!(query.parameters[0], SqlValue::from("MATERIALIZED_VIEW"));

        let query = ledger.remove_enum_type(None, "status_enum");
        assert!(query.query.ends_with("\"schema\" IS NULL"));
        assert_eq!(query.parameters.len(), 2);
    }

    #[test]
    fn test_enum_row_round_trips_labels() {
        let dialect = PostgresDialect::new();
        let ledger = Ledger::new("meta", &dialect);
        let enum_type = NamedEnumType {
            name: "status_enum".into(),
            schema: None,
            labels: vec!["A".into(), "B".into()],
        };
        let query = ledger.record_enum_type(&enum_type);
        let row = LedgerRow {
            kind: LedgerKind::EnumType,
            schema: None,
            name: "status_enum".into(),
            value: query.parameters[3].as_str().unwrap_or_default().to_string(),
        };
        assert_eq!(row.labels(), Some(vec!["A".to_string(), "B".to_string()]));
    }

    #[test]
    fn test_generated_column_name() {
        let row = LedgerRow {
            kind: LedgerKind::GeneratedColumn,
            schema: None,
            name: "users.full_name".into(),
            value: "first || last".into(),
        };
        assert_eq!(row.generated_column(), Some(("users", "full_name")));
        assert_eq!(LedgerKind::parse("GENERATED_COLUMN"), Some(LedgerKind::GeneratedColumn));
    }
}
