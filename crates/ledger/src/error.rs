use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to open ledger store at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("ledger store is full or unreachable (disk full?): {0}")]
    DiskFull(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ledger writer shut down before this event was flushed")]
    WriterShutDown,

    #[error("ledger writer did not confirm this event within the shutdown deadline")]
    SyncTimeout,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
