use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("vector store error: {0}")]
    Store(#[from] lancedb::Error),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("embedding dimension mismatch: record has {got}, collection expects {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow_schema::ArrowError),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
