use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened or its schema could not be created
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(#[source] rusqlite::Error),

    #[error("Read failed: {0}")]
    ReadFailed(#[source] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store worker stopped")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, StoreError>;
