//! Mirror store errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be mapped back to domain types.
    #[error("corrupt mirror row for {course}: {reason}")]
    Corrupt { course: String, reason: String },

    /// An amount or counter does not fit the storage column.
    #[error("{0} out of range for storage")]
    OutOfRange(&'static str),

    #[error("mirror unavailable: {0}")]
    Unavailable(String),
}
