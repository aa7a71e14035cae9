pub mod decompose;
pub mod error;
pub mod retriever;

pub use decompose::{classify_intent, decompose, Intent};
pub use error::{RetrievalError, Result};
pub use retriever::{
    retrieve, DEFAULT_TOP_K, DEFAULT_TOP_K_PER_SUBQUERY, DEFAULT_WINDOW_SECONDS,
};
