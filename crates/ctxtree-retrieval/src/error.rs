use thiserror::Error;

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding failed: {0}")]
    Embedding(#[from] ctxtree_archive::ArchiveError),
}

pub type Result<T> = std::result::Result<T, RetrievalError>;
