//! Error types for schema synchronization.

use oxide_sync_core::SchemaError;

/// Errors that can occur while reading, diffing or applying a schema.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A catalog query failed.
    #[error("Failed to read the database catalog with '{query}': {source}")]
    Introspection {
        /// The catalog query that failed.
        query: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// A generated statement failed.
    #[error("Failed to execute '{query}': {source}")]
    Execution {
        /// The statement that failed.
        query: String,
        /// Driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Projection, diffing or synthesis failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Database error outside catalog reads and statement execution.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error (reading declaration files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A migrations table row carries an unreadable timestamp.
    #[error("Invalid applied_at '{value}' for migration '{name}': {source}")]
    InvalidTimestamp {
        /// Migration name.
        name: String,
        /// Stored text.
        value: String,
        /// Parse error.
        #[source]
        source: chrono::ParseError,
    },

    /// Migration record not found.
    #[error("Migration not found: {name}")]
    MigrationNotFound {
        /// Migration name.
        name: String,
    },
}

impl SyncError {
    pub(crate) fn introspection(query: &str, source: sqlx::Error) -> Self {
        Self::Introspection {
            query: query.to_string(),
            source,
        }
    }
}

/// Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;
