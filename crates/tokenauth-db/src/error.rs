//! Error types for the database layer.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::migrations::MigrationError;

/// How a failure should be treated by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The store reported a momentary lock conflict (`SQLITE_BUSY` or
    /// `SQLITE_LOCKED`). Retrying the same operation may succeed.
    Transient,
    /// Anything else. Never retried.
    Fatal,
}

/// Errors returned by the reader and writer services.
///
/// A credential mismatch is not represented here: it is the ordinary
/// [`LookupOutcome::NotFound`](crate::LookupOutcome::NotFound) result.
#[derive(Debug, Error)]
pub enum DbError {
    /// A SQLite call failed.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No physical connection could be obtained from the connection handle.
    #[error("database connection error: {0}")]
    Connection(#[from] r2d2::Error),

    /// Schema creation failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A transient failure persisted through every allowed attempt.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Name of the retried operation (`lookup`, `seed`).
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        source: Box<DbError>,
    },

    /// The statement pool has been drained and accepts no more acquisitions.
    #[error("statement pool is closed")]
    PoolClosed,

    /// A write was requested from services opened without a writer.
    #[error("database opened in read-only mode")]
    ReadOnly,

    /// Connection or pool settings that cannot be honoured.
    #[error("invalid database settings: {0}")]
    InvalidSettings(String),
}

impl DbError {
    /// Classifies this error for the retry policy.
    ///
    /// Classification inspects the SQLite primary result code. Error message
    /// text is never consulted.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Sqlite(e) => match e.sqlite_error_code() {
                Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => ErrorClass::Transient,
                _ => ErrorClass::Fatal,
            },
            _ => ErrorClass::Fatal,
        }
    }

    /// Shorthand for `self.class() == ErrorClass::Transient`.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}
