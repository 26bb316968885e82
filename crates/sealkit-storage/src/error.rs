//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger. Values (config maps, wrapped DEKs) are never included.

use uuid::Uuid;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open or migrate the storage backend.
    #[error("failed to open storage at '{location}': {reason}")]
    Open { location: String, reason: String },

    /// Failed to read a row.
    #[error("failed to read from '{table}': {reason}")]
    Read { table: &'static str, reason: String },

    /// Failed to write a row.
    #[error("failed to write {table} row {id}: {reason}")]
    Write {
        table: &'static str,
        id: Uuid,
        reason: String,
    },

    /// An update targeted a row that does not exist.
    #[error("{table} row {id} not found")]
    NotFound { table: &'static str, id: Uuid },

    /// The row changed since it was read; the update was not applied.
    #[error("{table} row {id} was modified concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        table: &'static str,
        id: Uuid,
        expected: i64,
        actual: i64,
    },

    /// A row violates a uniqueness constraint (provisioning helpers only).
    #[error("duplicate {table} row: {reason}")]
    Duplicate { table: &'static str, reason: String },
}
