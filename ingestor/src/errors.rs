use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Log writer unavailable")]
    WriterUnavailable,
}

impl Error {
    /// Storage-side failures, as opposed to bad input.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Error::Database(_) | Error::Migration(_) | Error::WriterUnavailable
        )
    }
}

/// Reasons a raw event is rejected before it reaches the log.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing field: {0}")]
    MissingField(String),

    #[error("malformed field {field}: {value:?} is not {expected}")]
    Malformed {
        field: String,
        value: String,
        expected: String,
    },

    #[error("unknown sheet: {0:?}")]
    UnknownSheet(String),

    #[error("{0}")]
    Inconsistent(String),

    #[error("body is not a flat JSON object: {0}")]
    Body(String),

    #[error("invalid query string: {0}")]
    Query(String),
}

impl ValidationError {
    pub fn malformed(field: &str, value: &str, expected: &str) -> Self {
        ValidationError::Malformed {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
