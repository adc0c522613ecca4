//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("lock not held: {0}")]
    LockNotHeld(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for conveyor_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::LockNotHeld(name) => {
                conveyor_core::Error::Internal(format!("lock not held: {}", name))
            }
            DbError::Database(e) => conveyor_core::Error::Store(e.to_string()),
        }
    }
}
