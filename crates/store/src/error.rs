//! Store error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("the requested entry was not found in the database")]
    NotFound,

    #[error("a duplicate entry was found in the database")]
    DuplicateEntry,

    #[error("the requested operation is not allowed")]
    NotAllowed,

    #[error("the request contained one or more invalid parameters")]
    InvalidRequest,

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("an internal error occurred while performing the database operation")]
    Internal,
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::DuplicateEntry,
            _ => StoreError::Database(err),
        }
    }
}
