//! Schema model types.
//!
//! These value types describe tables, columns, constraints, views and named
//! enum types. Both sides of a comparison use them: the projector builds a
//! model from entity declarations and the catalog reader builds one from a
//! live database. The differ only reads them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};
use crate::naming;

/// Joins an optional schema qualifier and a name into a lookup key.
#[must_use]
pub fn qualify(schema: Option<&str>, name: &str) -> String {
    match schema {
        Some(schema) => format!("{schema}.{name}"),
        None => name.to_string(),
    }
}

/// Identity column policy (`GENERATED ALWAYS` / `GENERATED BY DEFAULT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdentityPolicy {
    /// Values are always generated by the database.
    Always,
    /// Values are generated unless one is supplied.
    ByDefault,
}

impl IdentityPolicy {
    /// Returns the SQL keyword sequence for this policy.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Always => "ALWAYS",
            Self::ByDefault => "BY DEFAULT",
        }
    }
}

/// How the database generates values for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Generation {
    /// Auto-increment / serial.
    Increment,
    /// Random UUID.
    Uuid,
    /// SQL standard identity column.
    Identity(IdentityPolicy),
}

/// Storage of a computed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedKind {
    /// Computed on write and stored.
    Stored,
    /// Computed on read.
    Virtual,
}

impl GeneratedKind {
    /// Returns the SQL keyword for this kind.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::Stored => "STORED",
            Self::Virtual => "VIRTUAL",
        }
    }
}

/// Expression of a computed (`GENERATED ALWAYS AS`) column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeneratedAs {
    /// The generation expression.
    pub expression: String,
    /// Stored or virtual.
    pub kind: GeneratedKind,
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Restrict (same as NoAction but checked immediately).
    Restrict,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }

    /// Parses the textual form reported by catalogs (`NO ACTION`,
    /// `SET NULL`, ...). Unknown text maps to `NoAction`.
    #[must_use]
    pub fn from_sql(text: &str) -> Self {
        match text.trim().to_ascii_uppercase().as_str() {
            "RESTRICT" => Self::Restrict,
            "CASCADE" => Self::Cascade,
            "SET NULL" => Self::SetNull,
            "SET DEFAULT" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }
}

/// Deferral mode of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Deferrable {
    /// `DEFERRABLE INITIALLY IMMEDIATE`
    InitiallyImmediate,
    /// `DEFERRABLE INITIALLY DEFERRED`
    InitiallyDeferred,
}

impl Deferrable {
    /// Returns the SQL clause.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::InitiallyImmediate => "DEFERRABLE INITIALLY IMMEDIATE",
            Self::InitiallyDeferred => "DEFERRABLE INITIALLY DEFERRED",
        }
    }
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Type identifier without length/precision (e.g. `varchar`).
    pub data_type: String,
    /// Whether the column allows NULL values.
    pub nullable: bool,
    /// Character length.
    pub length: Option<u32>,
    /// Numeric precision (or fractional seconds precision).
    pub precision: Option<u32>,
    /// Numeric scale.
    pub scale: Option<u32>,
    /// Default expression as SQL text.
    pub default: Option<String>,
    /// Value generation strategy.
    pub generation: Option<Generation>,
    /// Computed column expression.
    pub generated_as: Option<GeneratedAs>,
    /// Whether this column is part of the primary key.
    pub primary: bool,
    /// Whether a single-column unique constraint covers this column.
    pub unique: bool,
    /// Column comment.
    pub comment: Option<String>,
    /// Character set.
    pub charset: Option<String>,
    /// Collation.
    pub collation: Option<String>,
    /// Allowed labels for enum columns.
    pub enum_values: Vec<String>,
    /// Named enum type backing this column (dialects with named enums).
    pub enum_name: Option<String>,
    /// Whether the column is an array of `data_type`.
    pub is_array: bool,
    /// Spatial subtype (`point`, `polygon`, ...).
    pub spatial_type: Option<String>,
    /// Spatial reference id.
    pub srid: Option<u32>,
    /// `ON UPDATE` expression.
    pub on_update: Option<String>,
}

impl Column {
    /// Creates a new nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            length: None,
            precision: None,
            scale: None,
            default: None,
            generation: None,
            generated_as: None,
            primary: false,
            unique: false,
            comment: None,
            charset: None,
            collation: None,
            enum_values: Vec::new(),
            enum_name: None,
            is_array: false,
            spatial_type: None,
            srid: None,
            on_update: None,
        }
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as part of the primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false; // Primary keys are always NOT NULL
        self
    }

    /// Sets the character length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets numeric precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    /// Sets the default expression.
    #[must_use]
    pub fn default(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(expression.into());
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub fn generated(mut self, generation: Generation) -> Self {
        self.generation = Some(generation);
        self
    }

    /// Makes this a computed column.
    #[must_use]
    pub fn generated_as(mut self, expression: impl Into<String>, kind: GeneratedKind) -> Self {
        self.generated_as = Some(GeneratedAs {
            expression: expression.into(),
            kind,
        });
        self
    }

    /// Marks the column unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Sets the collation.
    #[must_use]
    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// Makes this an enum column with the given labels.
    #[must_use]
    pub fn enumeration<I, S>(mut self, enum_name: Option<&str>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_name = enum_name.map(str::to_string);
        self.enum_values = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the column as an array.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    /// Returns true for enum-typed columns.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.data_type == "enum" || self.data_type == "simple-enum"
    }
}

/// An index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Indexed columns, in order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    pub unique: bool,
    /// Whether this is a spatial index.
    pub spatial: bool,
    /// Whether this is a fulltext index.
    pub fulltext: bool,
    /// Partial index condition (WHERE clause).
    pub where_clause: Option<String>,
    /// Index expression (expression indices).
    pub expression: Option<String>,
}

impl Index {
    /// Creates a plain index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            unique: false,
            spatial: false,
            fulltext: false,
            where_clause: None,
            expression: None,
        }
    }

    /// Makes the index unique.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Adds a partial index condition.
    #[must_use]
    pub fn where_clause(mut self, condition: impl Into<String>) -> Self {
        self.where_clause = Some(condition.into());
        self
    }
}

/// A foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Column(s) in the referencing table.
    pub columns: Vec<String>,
    /// Schema of the referenced table.
    pub referenced_schema: Option<String>,
    /// Referenced table name.
    pub referenced_table: String,
    /// Referenced column(s).
    pub referenced_columns: Vec<String>,
    /// Action on delete.
    pub on_delete: ForeignKeyAction,
    /// Action on update.
    pub on_update: ForeignKeyAction,
    /// Deferral mode.
    pub deferrable: Option<Deferrable>,
}

impl ForeignKey {
    /// Creates a foreign key with default actions.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        referenced_table: impl Into<String>,
        referenced_columns: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            referenced_schema: None,
            referenced_table: referenced_table.into(),
            referenced_columns,
            on_delete: ForeignKeyAction::NoAction,
            on_update: ForeignKeyAction::NoAction,
            deferrable: None,
        }
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Lookup key of the referenced table.
    #[must_use]
    pub fn referenced_key(&self) -> String {
        qualify(self.referenced_schema.as_deref(), &self.referenced_table)
    }
}

/// A named unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Columns that form the unique constraint.
    pub columns: Vec<String>,
}

/// A named check constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckConstraint {
    /// Constraint name.
    pub name: String,
    /// Boolean SQL expression.
    pub expression: String,
}

/// A table and everything attached to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Schema (or database) qualifier.
    pub schema: Option<String>,
    /// Columns, in declaration order.
    pub columns: Vec<Column>,
    /// Indices.
    pub indices: Vec<Index>,
    /// Foreign keys.
    pub foreign_keys: Vec<ForeignKey>,
    /// Unique constraints.
    pub uniques: Vec<UniqueConstraint>,
    /// Check constraints.
    pub checks: Vec<CheckConstraint>,
    /// Primary key constraint name as the database reports it.
    #[serde(default)]
    pub primary_key_name: Option<String>,
    /// Default collation columns inherit (MySQL).
    #[serde(default)]
    pub collation: Option<String>,
}

impl Table {
    /// Creates a new empty table.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            columns: Vec::new(),
            indices: Vec::new(),
            foreign_keys: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            primary_key_name: None,
            collation: None,
        }
    }

    /// Sets the schema qualifier.
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indices.push(index);
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, fk: ForeignKey) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique(mut self, name: impl Into<String>, columns: Vec<String>) -> Self {
        self.uniques.push(UniqueConstraint {
            name: name.into(),
            columns,
        });
        self
    }

    /// Adds a check constraint.
    #[must_use]
    pub fn check(mut self, name: impl Into<String>, expression: impl Into<String>) -> Self {
        self.checks.push(CheckConstraint {
            name: name.into(),
            expression: expression.into(),
        });
        self
    }

    /// Lookup key (`schema.name` or `name`).
    #[must_use]
    pub fn key(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }

    /// Gets a column by name.
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key column names, in column order.
    #[must_use]
    pub fn primary_key(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary)
            .map(|c| c.name.clone())
            .collect()
    }

    /// Names the primary key constraint.
    #[must_use]
    pub fn primary_key_named(mut self, name: impl Into<String>) -> Self {
        self.primary_key_name = Some(name.into());
        self
    }

    /// Name of the primary key constraint: the stored one, otherwise the
    /// canonical name for the current key columns.
    #[must_use]
    pub fn primary_key_constraint(&self) -> String {
        self.primary_key_name
            .clone()
            .unwrap_or_else(|| naming::primary_key_name(&self.name, &self.primary_key()))
    }
}

/// A (possibly materialized) view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    /// View name.
    pub name: String,
    /// Schema qualifier.
    pub schema: Option<String>,
    /// The SELECT statement.
    pub expression: String,
    /// Whether this is a materialized view.
    pub materialized: bool,
    /// Keys of tables and views the expression reads from.
    pub dependencies: BTreeSet<String>,
}

impl View {
    /// Creates a view.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            expression: expression.into(),
            materialized: false,
            dependencies: BTreeSet::new(),
        }
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.dependencies.insert(key.into());
        self
    }

    /// Lookup key (`schema.name` or `name`).
    #[must_use]
    pub fn key(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }
}

/// A reusable enum type (Postgres `CREATE TYPE ... AS ENUM`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NamedEnumType {
    /// Type name.
    pub name: String,
    /// Schema qualifier.
    pub schema: Option<String>,
    /// Labels, in declaration order.
    pub labels: Vec<String>,
}

impl NamedEnumType {
    /// Lookup key (`schema.name` or `name`).
    #[must_use]
    pub fn key(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }
}

/// A complete schema snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaModel {
    /// Tables.
    pub tables: Vec<Table>,
    /// Views.
    pub views: Vec<View>,
    /// Named enum types.
    pub enum_types: Vec<NamedEnumType>,
    /// Whether the ledger table already exists in the database.
    #[serde(default)]
    pub ledger_present: bool,
    /// Default collation of each character set, where the catalog reports
    /// charset and collation on every column (MySQL).
    #[serde(default)]
    pub default_collations: BTreeMap<String, String>,
}

impl SchemaModel {
    /// Creates an empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    /// Adds a view.
    #[must_use]
    pub fn view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    /// Adds a named enum type.
    #[must_use]
    pub fn enum_type(mut self, enum_type: NamedEnumType) -> Self {
        self.enum_types.push(enum_type);
        self
    }

    /// Gets a table by key.
    #[must_use]
    pub fn get_table(&self, key: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.key() == key)
    }

    /// Checks structural invariants.
    ///
    /// Duplicate table, column, view and enum type names are always
    /// rejected. With `check_references`, every foreign key must also point
    /// at an existing table and columns of this model.
    pub fn validate(&self, check_references: bool) -> Result<()> {
        let mut relations = HashSet::new();
        for table in &self.tables {
            if !relations.insert(table.key()) {
                return Err(SchemaError::MalformedSchema(format!(
                    "duplicate table '{}'",
                    table.key()
                )));
            }
            let mut columns = HashSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.as_str()) {
                    return Err(SchemaError::MalformedSchema(format!(
                        "duplicate column '{}' in table '{}'",
                        column.name,
                        table.key()
                    )));
                }
            }
        }
        for view in &self.views {
            if !relations.insert(view.key()) {
                return Err(SchemaError::MalformedSchema(format!(
                    "duplicate relation '{}'",
                    view.key()
                )));
            }
        }
        let mut enums = HashSet::new();
        for enum_type in &self.enum_types {
            if !enums.insert(enum_type.key()) {
                return Err(SchemaError::MalformedSchema(format!(
                    "duplicate enum type '{}'",
                    enum_type.key()
                )));
            }
        }

        if check_references {
            for table in &self.tables {
                for fk in &table.foreign_keys {
                    let Some(target) = self.get_table(&fk.referenced_key()) else {
                        return Err(SchemaError::MalformedSchema(format!(
                            "foreign key '{}' on '{}' references missing table '{}'",
                            fk.name,
                            table.key(),
                            fk.referenced_key()
                        )));
                    };
                    if let Some(missing) = fk
                        .referenced_columns
                        .iter()
                        .find(|c| target.get_column(c).is_none())
                    {
                        return Err(SchemaError::MalformedSchema(format!(
                            "foreign key '{}' on '{}' references missing column '{}.{}'",
                            fk.name,
                            table.key(),
                            target.key(),
                            missing
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("users")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("name", "varchar").length(255).not_null())
    }

    #[test]
    fn test_column_builder() {
        let col = Column::new("id", "integer")
            .primary()
            .generated(Generation::Increment);

        assert!(col.primary);
        assert!(!col.nullable); // Primary keys are NOT NULL
        assert_eq!(col.generation, Some(Generation::Increment));
    }

    #[test]
    fn test_table_primary_key() {
        let table = users().column(Column::new("tenant", "integer").primary());
        assert_eq!(table.primary_key(), vec!["id", "tenant"]);
        assert_eq!(table.key(), "users");
        assert_eq!(table.clone().in_schema("app").key(), "app.users");
    }

    #[test]
    fn test_primary_key_constraint_prefers_stored_name() {
        let table = users();
        assert_eq!(
            table.primary_key_constraint(),
            naming::primary_key_name("users", &["id".to_string()])
        );
        assert_eq!(table.primary_key_named("users_pkey").primary_key_constraint(), "users_pkey");
    }

    #[test]
    fn test_validate_duplicate_column() {
        let model =
            SchemaModel::new().table(users().column(Column::new("name", "text")));
        let err = model.validate(false).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedSchema(_)));
    }

    #[test]
    fn test_validate_duplicate_table() {
        let model = SchemaModel::new().table(users()).table(users());
        assert!(model.validate(false).is_err());
    }

    #[test]
    fn test_validate_dangling_foreign_key() {
        let posts = Table::new("posts")
            .column(Column::new("id", "integer").primary())
            .column(Column::new("author_id", "integer"))
            .foreign_key(ForeignKey::new(
                "FK_author",
                vec!["author_id".into()],
                "authors",
                vec!["id".into()],
            ));
        let model = SchemaModel::new().table(users()).table(posts);

        assert!(model.validate(false).is_ok());
        match model.validate(true) {
            Err(SchemaError::MalformedSchema(msg)) => assert!(msg.contains("authors")),
            other => panic!("Expected MalformedSchema, got {other:?}"),
        }
    }

    #[test]
    fn test_foreign_key_action_parse() {
        assert_eq!(ForeignKeyAction::from_sql("set null"), ForeignKeyAction::SetNull);
        assert_eq!(ForeignKeyAction::from_sql("CASCADE"), ForeignKeyAction::Cascade);
        assert_eq!(ForeignKeyAction::from_sql("NO ACTION"), ForeignKeyAction::NoAction);
        assert_eq!(ForeignKeyAction::Restrict.to_sql(), "RESTRICT");
    }
}
