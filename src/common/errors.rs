use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::file_operations::FileOperationError;
use crate::directory::error::{LockError, OpenReadError, OpenWriteError};

/// Error kinds surfaced by the engine.
///
/// Expected conditions (a disabled index, an unindexed field, a malformed
/// INTERSECT query) are regular variants rather than panics; iteration
/// paths surface per-item failures through the index error log and keep
/// going instead of unwinding.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The index priority is `Error`; queries fail fast.
    #[error("index '{0}' is marked as errored and cannot be queried")]
    IndexDisabled(String),

    /// A failure inside `apply`. Increments the per-index write-error
    /// counter; crossing the threshold quarantines the index.
    #[error("writing to index failed: {source}")]
    IndexWriteFailed {
        #[source]
        source: Box<EngineError>,
    },

    /// A document carried a spatial field that could not be parsed.
    /// The document is skipped and recorded, the batch continues.
    #[error("document '{document_id}' carries an invalid spatial shape")]
    InvalidSpatialShape { document_id: String },

    /// A query referenced a field the index does not cover.
    #[error("the field '{name}' is not indexed, cannot query/sort on fields that are not indexed")]
    FieldNotIndexed { name: String },

    /// An INTERSECT query with fewer than two clauses.
    #[error("a query with an INTERSECT separator must have at least two sub-queries")]
    IntersectMalformed,

    /// The directory state cannot be read back consistently. During
    /// backup this is logged and the backup abandoned gracefully.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Optimistic-concurrency failure reported by the external
    /// transactional store. Stats updates retry this; everything else
    /// propagates it.
    #[error("concurrency conflict: {0}")]
    ConcurrencyConflict(String),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Cooperative cancellation observed by an indexing or query
    /// iteration.
    #[error("the operation was cancelled")]
    Cancelled,

    #[error("failed to acquire a lock: {0}")]
    LockFailure(#[from] LockError),

    #[error("data corruption in '{filepath}': {comment}")]
    DataCorruption { filepath: PathBuf, comment: String },

    #[error(transparent)]
    OpenRead(#[from] OpenReadError),

    #[error(transparent)]
    OpenWrite(#[from] OpenWriteError),

    #[error(transparent)]
    FileOperation(#[from] FileOperationError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    /// Wraps any failure observed while applying a batch.
    pub fn write_failed(inner: EngineError) -> EngineError {
        EngineError::IndexWriteFailed { source: Box::new(inner) }
    }

    pub(crate) fn corrupted(filepath: &std::path::Path, comment: impl Into<String>) -> EngineError {
        EngineError::DataCorruption { filepath: filepath.to_path_buf(), comment: comment.into() }
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(error: serde_json::Error) -> Self {
        EngineError::FileOperation(FileOperationError::SerdeJsonError(error))
    }
}

impl From<bincode::Error> for EngineError {
    fn from(error: bincode::Error) -> Self {
        EngineError::FileOperation(FileOperationError::BinCodeError(error))
    }
}
