use ctxtree_core::{NodeId, RecordId, Role, Timestamp};
use serde::{Deserialize, Serialize};

/// Dimension of the `bge-small-en-v1.5` embedding model — the default
/// configured in `ctxtree_core::config::ProvidersConfig::embedding_model`.
/// A collection is rejected if asked to mix vectors of another width —
/// records produced by different embedding models never share a table.
pub const DEFAULT_EMBEDDING_DIM: usize = 384;

/// One append-only entry in the long-term archive. Never mutated once
/// written; `timestamp` is the turn's production time, not the time it
/// was indexed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub record_id: RecordId,
    pub node_id: NodeId,
    pub role: Role,
    pub text: String,
    pub timestamp: Timestamp,
    /// The node's title at the moment this record was indexed — titles
    /// can be renamed later, so this is a point-in-time copy, not a
    /// live reference.
    pub node_title_at_index_time: String,
    pub embedding: Vec<f32>,
}

/// Optional metadata filter applied alongside the vector search.
#[derive(Debug, Clone, Default)]
pub struct ArchiveFilter {
    pub node_id: Option<NodeId>,
    pub roles: Option<Vec<Role>>,
    /// Only records with `timestamp < max_timestamp` are returned — how
    /// the archive refuses to return turns that are still in a node's
    /// live buffer.
    pub max_timestamp: Option<Timestamp>,
}

/// One scored hit from a similarity query.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: ArchiveRecord,
    /// Cosine similarity, higher is more relevant.
    pub score: f32,
}
