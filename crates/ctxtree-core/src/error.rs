use thiserror::Error;

/// Error kind shared across crates that don't own a more specific error
/// type of their own — currently just config loading, the one failure
/// that happens before any crate-specific error type exists to report it.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
