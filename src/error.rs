use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to extract text from {source_id}: {reason}")]
    Parse { source_id: String, reason: String },

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error(
        "dimension mismatch: index holds {expected}-dimensional vectors, got {actual}"
    )]
    Dimension { expected: usize, actual: usize },

    #[error("the index is empty; add documents before asking questions")]
    EmptyIndex,

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("internal consistency violation: {0}")]
    Inconsistent(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
