//! Error types for catalog_sync.
//!
//! The taxonomy mirrors how failures propagate: normalization and
//! persistence errors are per-record (counted by the orchestrator, run
//! continues), source errors are fatal (the adapter cannot enumerate
//! records at all), and merge conflicts are reported to the caller with
//! no partial merge applied.

use thiserror::Error;

/// A raw record is missing or has an unusable identifying field.
///
/// Per-record: the orchestrator counts the record as failed and moves on.
#[derive(Debug, Error)]
#[error("cannot normalize record: field '{field}': {reason}")]
pub struct NormalizationError {
    /// Which field was bad (e.g. "name", "number", "set").
    pub field: &'static str,
    pub reason: String,
}

impl NormalizationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// A source adapter failed to enumerate records. Always fatal to the run.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP request failed (network error, timeout, etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP error status code after retries were exhausted
    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),
    /// Could not read the offline dataset
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Response or dataset content had an unusable shape
    #[error("malformed source data: {0}")]
    Malformed(String),
}

/// A card could not be written to the store.
///
/// Per-record: the card's transaction is rolled back and the run
/// continues, except for [`PersistenceError::RunLocked`] which aborts
/// before any record is processed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database operation failed (constraint violation, transaction failure)
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Another sync run holds the store lease
    #[error("store is locked by '{holder}' since {since}")]
    RunLocked { holder: String, since: String },
}

/// Owned copies disagree on a non-quantity attribute and cannot be merged.
#[derive(Debug, Error)]
#[error("cannot merge copies: {field} differs ('{left}' vs '{right}')")]
pub struct MergeConflictError {
    pub field: &'static str,
    pub left: String,
    pub right: String,
}

impl MergeConflictError {
    pub fn new(field: &'static str, left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            field,
            left: left.into(),
            right: right.into(),
        }
    }
}

/// The merge-copies command could not read or apply a collection file.
#[derive(Debug, Error)]
pub enum CollectionError {
    /// Collection CSV could not be opened or parsed
    #[error("collection file error: {0}")]
    Csv(#[from] csv::Error),
    /// A row carried an unusable field value
    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },
    /// Merge invoked with no copies
    #[error("no copies to merge")]
    EmptyMerge,
    #[error(transparent)]
    Conflict(#[from] MergeConflictError),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    /// A merged row references a card the catalog does not have
    #[error("no card in catalog for {set_code} #{number}")]
    UnknownCard { set_code: String, number: String },
}

/// Fatal sync-run error surfaced to the CLI.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    /// --fail-fast stopped the run at the first bad record
    #[error("run stopped after first failure: {0}")]
    Stopped(String),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Persistence(PersistenceError::Database(err))
    }
}

/// Result alias for catalog_sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
