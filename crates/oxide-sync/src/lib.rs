//! Live-database half of schema synchronization.
//!
//! `oxide-sync` reads what a database currently holds, hands it to
//! [`oxide_sync_core`] together with the declared entities and executes the
//! resulting change set.
//!
//! # Example
//!
//! ```rust,ignore
//! use oxide_sync::prelude::*;
//!
//! let conn = SqliteConnection::connect("sqlite:app.db").await?;
//! let declarations = SchemaDeclaration::from_json(&std::fs::read_to_string("schema.json")?)?;
//!
//! let sync = SchemaSync::new(&conn, &declarations);
//! let applied = sync.build().await?;
//! // Undo it again.
//! sync.revert(&applied).await?;
//! ```

pub mod catalog;
pub mod connection;
pub mod error;
pub mod ledger;
pub mod sync;

pub use connection::{CatalogRow, Connection, SqliteConnection};
pub use error::{Result, SyncError};
pub use sync::{SchemaSync, SyncOptions};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::catalog::CatalogFilter;
    pub use crate::connection::{CatalogRow, Connection, SqliteConnection};
    pub use crate::error::{Result, SyncError};
    pub use crate::ledger::{list_records, AppliedMigration, MigrationHistory};
    pub use crate::sync::{SchemaSync, SyncOptions};
    pub use oxide_sync_core::declaration::SchemaDeclaration;
    pub use oxide_sync_core::sql::{SqlInMemory, SqlQuery, SqlValue};
}
