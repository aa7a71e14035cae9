pub mod embedding;
pub mod error;
pub mod store;
pub mod types;

pub use embedding::{EmbeddingModel, FastEmbedModel, HashEmbedModel};
pub use error::{ArchiveError, Result};
pub use store::VectorArchive;
pub use types::{ArchiveFilter, ArchiveRecord, ScoredRecord, DEFAULT_EMBEDDING_DIM};
