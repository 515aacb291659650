//! Error types for AMI tables and snapshots.

use thiserror::Error;

use crate::schema::ColumnId;

/// Result type alias for table operations.
pub type TableResult<T> = Result<T, TableError>;

/// Errors that can occur while building, writing, or snapshotting tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("schema drift in {table}: expected column {expected}, allocator returned {allocated}")]
    SchemaDrift {
        table: String,
        expected: ColumnId,
        allocated: ColumnId,
    },

    #[error("index space must have at least one entity and one sample slot")]
    EmptyIndexSpace,

    #[error("column {0} is a shadow column and cannot be written by a stage")]
    ShadowWrite(ColumnId),

    #[error("column {0} does not belong to this table")]
    UnknownColumn(ColumnId),

    #[error("invalid copy pair {src} -> {dst}")]
    InvalidCopyPair { src: ColumnId, dst: ColumnId },

    #[error("cell ({entity}, {sample}) outside index space")]
    OutOfBounds { entity: usize, sample: usize },

    #[error("external binding conflict at {path}: {reason}")]
    BindingConflict { path: String, reason: String },

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),
}
