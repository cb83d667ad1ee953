use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unknown variant '{tag}' for embeddable '{embeddable}'")]
    UnknownVariant { embeddable: String, tag: String },

    #[error("Malformed embedded data in '{field}': {reason}")]
    MalformedEmbeddedData { field: String, reason: String },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("{entity} not found ({key})")]
    NotFound { entity: String, key: String },

    #[error("Entity '{0}' is detached from its entity manager")]
    DetachedEntity(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl DbError {
    /// Whether the error originated in the table store rather than in
    /// metadata, filter or embedded-value handling.
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::StorageError(_)
                | Self::TableExists(_)
                | Self::TableNotFound(_)
                | Self::ColumnNotFound(_, _)
                | Self::TypeMismatch(_)
                | Self::ConstraintViolation(_)
        )
    }

    pub(crate) fn malformed(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedEmbeddedData {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
