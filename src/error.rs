use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("tensor computation error: {0}")]
    Tensor(#[from] candle_core::Error),

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

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("could not extract text from {document}: {reason}")]
    Extraction { document: String, reason: String },

    #[error("index has not been created or loaded")]
    IndexNotReady,

    #[error("no document loaded")]
    NoDocumentLoaded,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model error: {0}")]
    Model(String),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl Error {
    pub(crate) fn extraction(
        document: impl std::fmt::Display,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Extraction {
            document: document.to_string(),
            reason: reason.to_string(),
        }
    }
}
