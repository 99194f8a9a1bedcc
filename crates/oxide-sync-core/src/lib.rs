//! Schema synchronization for relational databases.
//!
//! `oxide-sync-core` is the pure half of schema synchronization: given
//! declared entities and the schema a database reports, it computes the
//! changes that bring the database in line and renders them as SQL.
//! Nothing here performs I/O.
//!
//! # Architecture
//!
//! - **Declarations** - The logical schema input, deserializable from JSON
//! - **Projector** - Turns declarations into a dialect-specific [`SchemaModel`]
//! - **Differ** - Compares two models and emits ordered [`SchemaChange`]s
//! - **Synthesizer** - Renders changes into up/down [`SqlQuery`] queues
//! - **Dialect** - PostgreSQL, MySQL and SQLite SQL generation
//! - **Ledger** - Bookkeeping rows for views, enum types and generated columns
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sync_core::prelude::*;
//!
//! let declarations = SchemaDeclaration::new().entity(
//!     EntityDeclaration::new("User")
//!         .column(ColumnDeclaration::new("id", "integer").primary().generated(GenerationStrategy::Increment))
//!         .column(ColumnDeclaration::new("name", "varchar").length(100)),
//! );
//!
//! let dialect = SqliteDialect::new();
//! let declared = project(&declarations, &dialect)?;
//! let changes = diff(&declared, &SchemaModel::new(), &dialect)?;
//! let sql = synthesize(&changes, &dialect, &SynthesisOptions::new())?;
//! for query in &sql.up_queries {
//!     println!("{query}");
//! }
//! ```

pub mod declaration;
pub mod dialect;
pub mod differ;
pub mod error;
pub mod ledger;
pub mod naming;
pub mod normalize;
pub mod operations;
pub mod projector;
pub mod schema;
pub mod sql;
pub mod synth;

pub use error::{Result, SchemaError};
pub use schema::SchemaModel;
pub use operations::SchemaChange;
pub use sql::{SqlInMemory, SqlQuery};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::declaration::{
        CheckDeclaration, ColumnDeclaration, DefaultValue, EntityDeclaration,
        GenerationStrategy, IndexDeclaration, RelationDeclaration, SchemaDeclaration,
        UniqueDeclaration, ViewDeclaration,
    };
    pub use crate::dialect::{
        DialectCapabilities, DialectKind, MigrationDialect, MysqlDialect, PostgresDialect,
        SqliteDialect,
    };
    pub use crate::differ::{diff, ColumnRename, Differ};
    pub use crate::error::{Result, SchemaError};
    pub use crate::ledger::{Ledger, LedgerKind, LedgerRow, DEFAULT_LEDGER_TABLE};
    pub use crate::operations::{ColumnChanges, EnumColumn, SchemaChange, TableName};
    pub use crate::projector::{project, Projector};
    pub use crate::schema::{
        CheckConstraint, Column, ForeignKey, ForeignKeyAction, GeneratedAs, GeneratedKind,
        Generation, IdentityPolicy, Index, NamedEnumType, SchemaModel, Table,
        UniqueConstraint, View,
    };
    pub use crate::sql::{SqlInMemory, SqlQuery, SqlValue};
    pub use crate::synth::{synthesize, SynthesisOptions};
}
