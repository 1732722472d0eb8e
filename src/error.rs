//! Unified error type for the storage engine, the ingestor and the facade.

use thiserror::Error;
use tracing::error;

/// A specialized `Result` for every fallible operation this crate exposes.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the graph store.
///
/// Every variant carries a message; callers that need structured detail
/// should match on the variant and inspect its string payload.
#[derive(Debug, Error)]
pub enum Error {
    /// The KV store (or one of its keyspaces) could not be created or opened.
    #[error("failed to open storage: {0}")]
    StorageOpen(String),

    /// A read or write against the KV store failed.
    #[error("storage I/O error: {0}")]
    StorageIO(String),

    /// A value could not be serialized into its on-disk form.
    #[error("encode error: {0}")]
    Encode(String),

    /// A stored value could not be deserialized (corruption or version skew).
    #[error("decode error: {0}")]
    Decode(String),

    /// A single `.pgdf` record was malformed or violated an ingestion rule.
    #[error("bad record at line {line}: {message}")]
    BadRecord { line: usize, message: String },

    /// The `.pgdf` input file was missing or unreadable.
    #[error("file I/O error: {0}")]
    FileIO(#[from] std::io::Error),

    /// A secondary-index entry pointed at a missing primary row.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    /// The caller misused the API (closed handle, separator byte in input, ...).
    #[error("usage error: {0}")]
    UsageError(String),
}

impl Error {
    pub(crate) fn storage_open(msg: impl std::fmt::Display) -> Self {
        let err = Error::StorageOpen(msg.to_string());
        error!(%err, "storage open failed");
        err
    }

    pub(crate) fn storage_io(msg: impl std::fmt::Display) -> Self {
        let err = Error::StorageIO(msg.to_string());
        error!(%err, "storage I/O failed");
        err
    }

    pub(crate) fn decode(msg: impl std::fmt::Display) -> Self {
        Error::Decode(msg.to_string())
    }

    pub(crate) fn encode(msg: impl std::fmt::Display) -> Self {
        Error::Encode(msg.to_string())
    }

    pub(crate) fn bad_record(line: usize, msg: impl std::fmt::Display) -> Self {
        Error::BadRecord {
            line,
            message: msg.to_string(),
        }
    }

    pub(crate) fn usage(msg: impl std::fmt::Display) -> Self {
        Error::UsageError(msg.to_string())
    }

    pub(crate) fn index_inconsistency(msg: impl std::fmt::Display) -> Self {
        let err = Error::IndexInconsistency(msg.to_string());
        error!(%err, "index inconsistency detected");
        err
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Error::storage_open(e)
    }
}

impl From<redb::TransactionError> for Error {
    fn from(e: redb::TransactionError) -> Self {
        Error::storage_io(e)
    }
}

impl From<redb::TableError> for Error {
    fn from(e: redb::TableError) -> Self {
        Error::storage_io(e)
    }
}

impl From<redb::StorageError> for Error {
    fn from(e: redb::StorageError) -> Self {
        Error::storage_io(e)
    }
}

impl From<redb::CommitError> for Error {
    fn from(e: redb::CommitError) -> Self {
        Error::storage_io(e)
    }
}
