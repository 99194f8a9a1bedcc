//! Error types for schema projection, diffing and DDL synthesis.

/// Errors raised while building, comparing or rendering schema models.
///
/// Detected drift is never an error: it is the normal output of the
/// differ. These variants cover malformed input and missing dialect
/// capabilities only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// A declaration references a target that cannot be resolved.
    #[error("Cannot resolve metadata for '{entity}': {message}")]
    MetadataResolution {
        /// Entity (or view) holding the broken reference.
        entity: String,
        /// What could not be resolved.
        message: String,
    },

    /// A schema model violates a structural invariant (duplicate names,
    /// dangling foreign key target, ...).
    #[error("Malformed schema: {0}")]
    MalformedSchema(String),

    /// The dialect cannot express the requested change.
    #[error("Operation not supported by {dialect}: {operation}")]
    UnsupportedOperation {
        /// Dialect name.
        dialect: String,
        /// Description of the operation.
        operation: String,
    },
}

impl SchemaError {
    pub(crate) fn resolution(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetadataResolution {
            entity: entity.into(),
            message: message.into(),
        }
    }

    pub(crate) fn unsupported(dialect: &str, operation: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            dialect: dialect.to_string(),
            operation: operation.into(),
        }
    }
}

/// Result type for schema operations.
pub type Result<T> = std::result::Result<T, SchemaError>;
