use thiserror::Error;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("message text must not be empty")]
    EmptyText,

    #[error("invalid role for a buffer message: {0}")]
    InvalidRole(String),
}

pub type Result<T> = std::result::Result<T, BufferError>;
