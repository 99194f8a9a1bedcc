//! Schema change operations.
//!
//! Every variant carries the complete before/after data it touches, so
//! [`SchemaChange::reverse`] is total and the synthesizer can render the
//! down-queue from the same values as the up-queue.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::schema::{
    qualify, CheckConstraint, Column, ForeignKey, Index, NamedEnumType, Table, UniqueConstraint,
    View,
};

/// Qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    /// Schema qualifier.
    pub schema: Option<String>,
    /// Table name.
    pub name: String,
}

impl TableName {
    /// Creates an unqualified table name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
        }
    }

    /// Lookup key (`schema.name` or `name`).
    #[must_use]
    pub fn key(&self) -> String {
        qualify(self.schema.as_deref(), &self.name)
    }
}

impl From<&Table> for TableName {
    fn from(table: &Table) -> Self {
        Self {
            schema: table.schema.clone(),
            name: table.name.clone(),
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Which parts of a column differ between the two sides of a
/// [`SchemaChange::ChangeColumn`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnChanges {
    /// Type, length, precision, scale, array, enum or collation.
    pub data_type: bool,
    /// Nullability.
    pub nullable: bool,
    /// Default expression.
    pub default: bool,
    /// Generation strategy.
    pub generation: bool,
    /// Computed expression or storage.
    pub computed: bool,
    /// Comment.
    pub comment: bool,
    /// `ON UPDATE` expression.
    pub on_update: bool,
}

impl ColumnChanges {
    /// Returns true if nothing differs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.data_type
            || self.nullable
            || self.default
            || self.generation
            || self.computed
            || self.comment
            || self.on_update)
    }
}

/// A named primary key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    /// Constraint name.
    pub name: String,
    /// Key columns, in order.
    pub columns: Vec<String>,
}

impl PrimaryKey {
    /// The primary key of `table`, or `None` when it has none.
    #[must_use]
    pub fn of(table: &Table) -> Option<Self> {
        let columns = table.primary_key();
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            name: table.primary_key_constraint(),
            columns,
        })
    }
}

/// A column that uses a named enum type, as repointed by
/// [`SchemaChange::AlterEnumType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumColumn {
    /// Owning table.
    pub table: TableName,
    /// Column name.
    pub column: String,
    /// Column default, restored after the type swap.
    pub default: Option<String>,
    /// Whether the column is an array of the enum.
    pub is_array: bool,
}

/// A single schema change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaChange {
    /// Create a table with its columns and constraints inlined.
    CreateTable {
        /// Full table definition.
        table: Table,
    },

    /// Drop a table.
    DropTable {
        /// The table as it existed, for reversal.
        table: Table,
    },

    /// Add a column.
    AddColumn {
        /// Table name.
        table: TableName,
        /// Column definition.
        column: Column,
    },

    /// Drop a column.
    DropColumn {
        /// Table name.
        table: TableName,
        /// The column as it existed, for reversal.
        column: Column,
    },

    /// Alter a column in place (or drop and re-add it).
    ChangeColumn {
        /// Table name.
        table: TableName,
        /// Current definition.
        from: Column,
        /// Target definition.
        to: Column,
        /// What differs.
        changes: ColumnChanges,
    },

    /// Rename a column. Only produced from an explicit rename request.
    RenameColumn {
        /// Table name.
        table: TableName,
        /// Old column name.
        from: String,
        /// New column name.
        to: String,
    },

    /// Create an index.
    CreateIndex {
        /// Table name.
        table: TableName,
        /// Index definition.
        index: Index,
    },

    /// Drop an index.
    DropIndex {
        /// Table name.
        table: TableName,
        /// The index as it existed.
        index: Index,
    },

    /// Add a foreign key.
    AddForeignKey {
        /// Table name.
        table: TableName,
        /// Foreign key definition.
        foreign_key: ForeignKey,
    },

    /// Drop a foreign key.
    DropForeignKey {
        /// Table name.
        table: TableName,
        /// The foreign key as it existed.
        foreign_key: ForeignKey,
    },

    /// Add a unique constraint.
    AddUniqueConstraint {
        /// Table name.
        table: TableName,
        /// Constraint definition.
        constraint: UniqueConstraint,
    },

    /// Drop a unique constraint.
    DropUniqueConstraint {
        /// Table name.
        table: TableName,
        /// The constraint as it existed.
        constraint: UniqueConstraint,
    },

    /// Add a check constraint.
    AddCheckConstraint {
        /// Table name.
        table: TableName,
        /// Constraint definition.
        constraint: CheckConstraint,
    },

    /// Drop a check constraint.
    DropCheckConstraint {
        /// Table name.
        table: TableName,
        /// The constraint as it existed.
        constraint: CheckConstraint,
    },

    /// Replace the primary key.
    ChangePrimaryKey {
        /// Table name.
        table: TableName,
        /// Current primary key, if any.
        from: Option<PrimaryKey>,
        /// Target primary key, if any.
        to: Option<PrimaryKey>,
    },

    /// Rebuild a table through a temporary copy, for dialects that cannot
    /// alter columns or constraints in place.
    RecreateTable {
        /// Current definition.
        from: Table,
        /// Target definition.
        to: Table,
    },

    /// Create a view.
    CreateView {
        /// View definition.
        view: View,
    },

    /// Drop a view.
    DropView {
        /// The view as it existed.
        view: View,
    },

    /// Create a named enum type.
    CreateEnumType {
        /// Type definition.
        enum_type: NamedEnumType,
    },

    /// Drop a named enum type.
    DropEnumType {
        /// The type as it existed.
        enum_type: NamedEnumType,
    },

    /// Rename a named enum type whose labels did not change.
    RenameEnumType {
        /// Schema qualifier.
        schema: Option<String>,
        /// Old type name.
        from: String,
        /// New type name.
        to: String,
        /// Labels (unchanged).
        labels: Vec<String>,
    },

    /// Replace the label set of a named enum type: rename the old type,
    /// create the new one, repoint the columns, drop the old type.
    AlterEnumType {
        /// Type with its target labels.
        enum_type: NamedEnumType,
        /// Current labels.
        from_labels: Vec<String>,
        /// Columns using the type.
        columns: Vec<EnumColumn>,
    },
}

impl SchemaChange {
    /// Returns the operation that undoes this one.
    #[must_use]
    pub fn reverse(&self) -> Self {
        match self {
            Self::CreateTable { table } => Self::DropTable {
                table: table.clone(),
            },
            Self::DropTable { table } => Self::CreateTable {
                table: table.clone(),
            },
            Self::AddColumn { table, column } => Self::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Self::DropColumn { table, column } => Self::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            Self::ChangeColumn {
                table,
                from,
                to,
                changes,
            } => Self::ChangeColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
                changes: *changes,
            },
            Self::RenameColumn { table, from, to } => Self::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Self::CreateIndex { table, index } => Self::DropIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Self::DropIndex { table, index } => Self::CreateIndex {
                table: table.clone(),
                index: index.clone(),
            },
            Self::AddForeignKey { table, foreign_key } => Self::DropForeignKey {
                table: table.clone(),
                foreign_key: foreign_key.clone(),
            },
            Self::DropForeignKey { table, foreign_key } => Self::AddForeignKey {
                table: table.clone(),
                foreign_key: foreign_key.clone(),
            },
            Self::AddUniqueConstraint { table, constraint } => Self::DropUniqueConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Self::DropUniqueConstraint { table, constraint } => Self::AddUniqueConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Self::AddCheckConstraint { table, constraint } => Self::DropCheckConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Self::DropCheckConstraint { table, constraint } => Self::AddCheckConstraint {
                table: table.clone(),
                constraint: constraint.clone(),
            },
            Self::ChangePrimaryKey { table, from, to } => Self::ChangePrimaryKey {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Self::RecreateTable { from, to } => Self::RecreateTable {
                from: to.clone(),
                to: from.clone(),
            },
            Self::CreateView { view } => Self::DropView { view: view.clone() },
            Self::DropView { view } => Self::CreateView { view: view.clone() },
            Self::CreateEnumType { enum_type } => Self::DropEnumType {
                enum_type: enum_type.clone(),
            },
            Self::DropEnumType { enum_type } => Self::CreateEnumType {
                enum_type: enum_type.clone(),
            },
            Self::RenameEnumType {
                schema,
                from,
                to,
                labels,
            } => Self::RenameEnumType {
                schema: schema.clone(),
                from: to.clone(),
                to: from.clone(),
                labels: labels.clone(),
            },
            Self::AlterEnumType {
                enum_type,
                from_labels,
                columns,
            } => Self::AlterEnumType {
                enum_type: NamedEnumType {
                    labels: from_labels.clone(),
                    ..enum_type.clone()
                },
                from_labels: enum_type.labels.clone(),
                columns: columns.clone(),
            },
        }
    }

    /// Returns a human-readable description of this operation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::CreateTable { table } => format!("Create table {}", table.key()),
            Self::DropTable { table } => format!("Drop table {}", table.key()),
            Self::AddColumn { table, column } => {
                format!("Add column {} to {table}", column.name)
            }
            Self::DropColumn { table, column } => {
                format!("Drop column {} from {table}", column.name)
            }
            Self::ChangeColumn { table, to, .. } => format!("Change column {table}.{}", to.name),
            Self::RenameColumn { table, from, to } => {
                format!("Rename column {table}.{from} to {to}")
            }
            Self::CreateIndex { table, index } => {
                format!("Create index {} on {table}", index.name)
            }
            Self::DropIndex { table, index } => format!("Drop index {} on {table}", index.name),
            Self::AddForeignKey { table, foreign_key } => {
                format!("Add foreign key {} to {table}", foreign_key.name)
            }
            Self::DropForeignKey { table, foreign_key } => {
                format!("Drop foreign key {} from {table}", foreign_key.name)
            }
            Self::AddUniqueConstraint { table, constraint } => {
                format!("Add unique constraint {} to {table}", constraint.name)
            }
            Self::DropUniqueConstraint { table, constraint } => {
                format!("Drop unique constraint {} from {table}", constraint.name)
            }
            Self::AddCheckConstraint { table, constraint } => {
                format!("Add check constraint {} to {table}", constraint.name)
            }
            Self::DropCheckConstraint { table, constraint } => {
                format!("Drop check constraint {} from {table}", constraint.name)
            }
            Self::ChangePrimaryKey { table, to: Some(to), .. } => {
                format!("Change primary key of {table} to ({})", to.columns.join(", "))
            }
            Self::ChangePrimaryKey { table, from, .. } => match from {
                Some(from) => format!("Drop primary key {} from {table}", from.name),
                None => format!("Drop primary key from {table}"),
            },
            Self::RecreateTable { to, .. } => format!("Recreate table {}", to.key()),
            Self::CreateView { view } => format!("Create view {}", view.key()),
            Self::DropView { view } => format!("Drop view {}", view.key()),
            Self::CreateEnumType { enum_type } => format!("Create enum type {}", enum_type.key()),
            Self::DropEnumType { enum_type } => format!("Drop enum type {}", enum_type.key()),
            Self::RenameEnumType { from, to, .. } => format!("Rename enum type {from} to {to}"),
            Self::AlterEnumType { enum_type, .. } => {
                format!("Alter labels of enum type {}", enum_type.key())
            }
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
