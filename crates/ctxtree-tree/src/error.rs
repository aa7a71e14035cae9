use thiserror::Error;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("node not found: {id}")]
    NodeNotFound { id: String },

    #[error("tree not found: {id}")]
    TreeNotFound { id: String },

    #[error("parent node does not exist: {id}")]
    ParentNotFound { id: String },

    #[error("buffer error: {0}")]
    Buffer(#[from] ctxtree_buffer::BufferError),
}

pub type Result<T> = std::result::Result<T, TreeError>;
