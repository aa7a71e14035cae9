use thiserror::Error;

/// Error kinds a caller (the gateway) maps onto HTTP status: not-found →
/// 404, bad-input → 400, LM pool exhaustion → 503, everything else that
/// would corrupt an invariant → 500.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("node not found: {0}")]
    NodeNotFound(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("LM provider pool exhausted: {0}")]
    LmUnavailable(String),

    #[error("LM turn failed: {0}")]
    LmFailed(String),

    #[error(transparent)]
    Tree(#[from] ctxtree_tree::TreeError),

    #[error(transparent)]
    Buffer(#[from] ctxtree_buffer::BufferError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
