//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the durable job store.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating the database directory.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored row could not be turned back into a job.
    #[error("Corrupt row for job '{id}': {reason}")]
    Corrupt { id: String, reason: String },

    /// The connection lock was poisoned by a panicking writer.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
