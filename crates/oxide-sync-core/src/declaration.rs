//! Entity and view declarations: the desired schema as application code
//! describes it.
//!
//! Declarations are loosely specified: constraint names, enum type names
//! and referenced columns may be omitted. The projector resolves them into
//! a fully named [`SchemaModel`](crate::schema::SchemaModel).

use serde::{Deserialize, Serialize};

use crate::schema::{Deferrable, ForeignKeyAction, GeneratedAs, GeneratedKind, IdentityPolicy};

/// A declared column default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    /// Explicit NULL default.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Float literal.
    Float(f64),
    /// String literal, quoted on rendering.
    String(String),
    /// Raw SQL expression (`CURRENT_TIMESTAMP`, `now()`, ...).
    Expression {
        /// Expression text.
        expression: String,
    },
}

impl DefaultValue {
    /// Shorthand for [`DefaultValue::Expression`].
    #[must_use]
    pub fn expression(expression: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
        }
    }
}

/// Declared value generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStrategy {
    /// Auto-increment.
    Increment,
    /// UUID.
    Uuid,
    /// Identity column; policy from [`ColumnDeclaration::identity`].
    Identity,
}

fn default_true() -> bool {
    true
}

/// A declared column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDeclaration {
    /// Column name.
    pub name: String,
    /// Type name as written by the application (`int`, `varchar`, ...).
    #[serde(rename = "type")]
    pub data_type: String,
    /// Character length.
    #[serde(default)]
    pub length: Option<u32>,
    /// Numeric precision.
    #[serde(default)]
    pub precision: Option<u32>,
    /// Numeric scale.
    #[serde(default)]
    pub scale: Option<u32>,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
    /// Part of the primary key.
    #[serde(default)]
    pub primary: bool,
    /// Single-column unique constraint.
    #[serde(default)]
    pub unique: bool,
    /// Default value.
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Generation strategy.
    #[serde(default)]
    pub generated: Option<GenerationStrategy>,
    /// Identity policy when `generated` is `identity`.
    #[serde(default)]
    pub identity: Option<IdentityPolicy>,
    /// Computed column expression.
    #[serde(default)]
    pub generated_as: Option<GeneratedAs>,
    /// Comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Character set.
    #[serde(default)]
    pub charset: Option<String>,
    /// Collation.
    #[serde(default)]
    pub collation: Option<String>,
    /// Enum labels.
    #[serde(default, rename = "enum")]
    pub enum_values: Vec<String>,
    /// Explicit enum type name.
    #[serde(default)]
    pub enum_name: Option<String>,
    /// Array column.
    #[serde(default)]
    pub array: bool,
    /// Spatial subtype.
    #[serde(default)]
    pub spatial_type: Option<String>,
    /// Spatial reference id.
    #[serde(default)]
    pub srid: Option<u32>,
    /// `ON UPDATE` expression.
    #[serde(default)]
    pub on_update: Option<String>,
}

impl ColumnDeclaration {
    /// Declares a NOT NULL column.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            length: None,
            precision: None,
            scale: None,
            nullable: false,
            primary: false,
            unique: false,
            default: None,
            generated: None,
            identity: None,
            generated_as: None,
            comment: None,
            charset: None,
            collation: None,
            enum_values: Vec::new(),
            enum_name: None,
            array: false,
            spatial_type: None,
            srid: None,
            on_update: None,
        }
    }

    /// Allows NULL.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Marks the column as part of the primary key.
    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Adds a single-column unique constraint.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the length.
    #[must_use]
    pub fn length(mut self, length: u32) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets precision and scale.
    #[must_use]
    pub fn precision(mut self, precision: u32, scale: Option<u32>) -> Self {
        self.precision = Some(precision);
        self.scale = scale;
        self
    }

    /// Sets the default.
    #[must_use]
    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Sets the generation strategy.
    #[must_use]
    pub fn generated(mut self, strategy: GenerationStrategy) -> Self {
        self.generated = Some(strategy);
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

    /// Makes this an enum column.
    #[must_use]
    pub fn enumeration<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_type = "enum".to_string();
        self.enum_values = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Names the enum type explicitly.
    #[must_use]
    pub fn enum_name(mut self, name: impl Into<String>) -> Self {
        self.enum_name = Some(name.into());
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Marks the column as an array.
    #[must_use]
    pub fn array(mut self) -> Self {
        self.array = true;
        self
    }
}

/// A declared index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDeclaration {
    /// Explicit name.
    #[serde(default)]
    pub name: Option<String>,
    /// Indexed columns.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Unique index.
    #[serde(default)]
    pub unique: bool,
    /// Spatial index.
    #[serde(default)]
    pub spatial: bool,
    /// Fulltext index.
    #[serde(default)]
    pub fulltext: bool,
    /// Partial index condition.
    #[serde(default, rename = "where")]
    pub where_clause: Option<String>,
    /// Index expression.
    #[serde(default)]
    pub expression: Option<String>,
}

impl IndexDeclaration {
    /// Declares an index over columns.
    #[must_use]
    pub fn on<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Names the index.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
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

/// A declared unique constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueDeclaration {
    /// Explicit name.
    #[serde(default)]
    pub name: Option<String>,
    /// Columns.
    pub columns: Vec<String>,
}

/// A declared check constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDeclaration {
    /// Explicit name.
    #[serde(default)]
    pub name: Option<String>,
    /// Boolean expression.
    pub expression: String,
}

/// A declared many-to-one relation, materialized as a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDeclaration {
    /// Explicit constraint name.
    #[serde(default)]
    pub name: Option<String>,
    /// Referencing columns on the owning entity.
    pub columns: Vec<String>,
    /// Target entity name.
    pub target: String,
    /// Referenced columns; the target's primary key when empty.
    #[serde(default)]
    pub referenced_columns: Vec<String>,
    /// ON DELETE action.
    #[serde(default)]
    pub on_delete: ForeignKeyAction,
    /// ON UPDATE action.
    #[serde(default)]
    pub on_update: ForeignKeyAction,
    /// Deferral mode.
    #[serde(default)]
    pub deferrable: Option<Deferrable>,
}

impl RelationDeclaration {
    /// Declares a relation from `columns` to the target's primary key.
    #[must_use]
    pub fn to<I, S>(target: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
            target: target.into(),
            referenced_columns: Vec::new(),
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
}

/// A declared entity (one table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDeclaration {
    /// Entity name, used by relations.
    pub name: String,
    /// Table name; the entity name when omitted.
    #[serde(default)]
    pub table: Option<String>,
    /// Schema qualifier.
    #[serde(default)]
    pub schema: Option<String>,
    /// Columns.
    pub columns: Vec<ColumnDeclaration>,
    /// Indices.
    #[serde(default)]
    pub indices: Vec<IndexDeclaration>,
    /// Multi-column unique constraints.
    #[serde(default)]
    pub uniques: Vec<UniqueDeclaration>,
    /// Check constraints.
    #[serde(default)]
    pub checks: Vec<CheckDeclaration>,
    /// Relations.
    #[serde(default)]
    pub relations: Vec<RelationDeclaration>,
    /// Whether the table takes part in synchronization.
    #[serde(default = "default_true")]
    pub synchronize: bool,
}

impl EntityDeclaration {
    /// Declares an entity whose table has the same name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            schema: None,
            columns: Vec::new(),
            indices: Vec::new(),
            uniques: Vec::new(),
            checks: Vec::new(),
            relations: Vec::new(),
            synchronize: true,
        }
    }

    /// Sets the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Sets the schema.
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Adds a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDeclaration) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: IndexDeclaration) -> Self {
        self.indices.push(index);
        self
    }

    /// Adds a unique constraint.
    #[must_use]
    pub fn unique<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.uniques.push(UniqueDeclaration {
            name: None,
            columns: columns.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds a check constraint.
    #[must_use]
    pub fn check(mut self, expression: impl Into<String>) -> Self {
        self.checks.push(CheckDeclaration {
            name: None,
            expression: expression.into(),
        });
        self
    }

    /// Adds a relation.
    #[must_use]
    pub fn relation(mut self, relation: RelationDeclaration) -> Self {
        self.relations.push(relation);
        self
    }

    /// Excludes the table from synchronization.
    #[must_use]
    pub fn unsynchronized(mut self) -> Self {
        self.synchronize = false;
        self
    }

    /// The table name this entity maps to.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }
}

/// A declared view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDeclaration {
    /// View name.
    pub name: String,
    /// Schema qualifier.
    #[serde(default)]
    pub schema: Option<String>,
    /// SELECT statement.
    pub expression: String,
    /// Materialized view.
    #[serde(default)]
    pub materialized: bool,
    /// Extra dependencies (entity, table or view names) not visible in
    /// the expression.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ViewDeclaration {
    /// Declares a view.
    #[must_use]
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: None,
            expression: expression.into(),
            materialized: false,
            dependencies: Vec::new(),
        }
    }

    /// Makes the view materialized.
    #[must_use]
    pub fn materialized(mut self) -> Self {
        self.materialized = true;
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }
}

/// The full set of declarations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    /// Entities.
    #[serde(default)]
    pub entities: Vec<EntityDeclaration>,
    /// Views.
    #[serde(default)]
    pub views: Vec<ViewDeclaration>,
}

impl SchemaDeclaration {
    /// Creates an empty declaration set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity.
    #[must_use]
    pub fn entity(mut self, entity: EntityDeclaration) -> Self {
        self.entities.push(entity);
        self
    }

    /// Adds a view.
    #[must_use]
    pub fn view(mut self, view: ViewDeclaration) -> Self {
        self.views.push(view);
        self
    }

    /// Parses declarations from JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "entities": [{
                "name": "User",
                "table": "users",
                "columns": [
                    {"name": "id", "type": "integer", "primary": true, "generated": "increment"},
                    {"name": "status", "type": "enum", "enum": ["A", "B"], "default": "A"},
                    {"name": "created_at", "type": "timestamp",
                     "default": {"expression": "CURRENT_TIMESTAMP"}},
                    {"name": "score", "type": "integer", "nullable": true, "default": 0}
                ],
                "indices": [{"columns": ["status"], "where": "score > 0"}]
            }],
            "views": [{"name": "active_users", "expression": "SELECT * FROM users"}]
        }"#;
        let decl = SchemaDeclaration::from_json(json).unwrap();
        let user = &decl.entities[0];

        assert_eq!(user.table_name(), "users");
        assert!(user.synchronize);
        assert_eq!(user.columns[0].generated, Some(GenerationStrategy::Increment));
        assert_eq!(user.columns[1].default, Some(DefaultValue::String("A".into())));
        assert_eq!(
            user.columns[2].default,
            Some(DefaultValue::expression("CURRENT_TIMESTAMP"))
        );
        assert_eq!(user.columns[3].default, Some(DefaultValue::Integer(0)));
        assert!(!user.columns[1].nullable);
        assert_eq!(user.indices[0].where_clause.as_deref(), Some("score > 0"));
        assert_eq!(decl.views[0].name, "active_users");
    }

    #[test]
    fn test_builder() {
        let entity = EntityDeclaration::new("posts")
            .column(ColumnDeclaration::new("id", "integer").primary())
            .column(ColumnDeclaration::new("author_id", "integer").nullable())
            .relation(RelationDeclaration::to("users", ["author_id"]))
            .check("id > 0");

        assert_eq!(entity.table_name(), "posts");
        assert_eq!(entity.relations[0].target, "users");
        assert!(entity.relations[0].referenced_columns.is_empty());
        assert_eq!(entity.checks[0].name, None);
    }
}
