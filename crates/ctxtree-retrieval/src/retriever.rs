//! Context Window Retriever (C7) — runs each decomposed sub-query
//! against the archive, merges hits by best score, and expands each
//! surviving hit into its ±W-second neighborhood.
//!
//! Ordering discipline — chronological emission within a window,
//! deduplication against an already-seen set — follows the same shape
//! as plain paginated history retrieval.

use std::collections::HashMap;

use tracing::warn;

use ctxtree_archive::{ArchiveFilter, ArchiveRecord, EmbeddingModel, VectorArchive};
use ctxtree_core::{NodeId, Timestamp};

use crate::error::Result;

pub const DEFAULT_TOP_K_PER_SUBQUERY: usize = 5;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_WINDOW_SECONDS: f64 = 60.0;

/// Run the full C7 algorithm for one requesting node.
///
/// `buffer_cutoff` is `n.buffer.oldest_timestamp()` — `Timestamp::INFINITE`
/// when the buffer is empty, so nothing is excluded. Returns an ordered,
/// deduplicated list of archive records: best-score-first at the
/// granularity of hits, chronological within each hit's window.
pub async fn retrieve(
    sub_queries: &[String],
    requesting_node: &NodeId,
    buffer_cutoff: Timestamp,
    archive: &VectorArchive,
    embedder: &dyn EmbeddingModel,
    top_k_per_subquery: usize,
    top_k: usize,
    window_seconds: f64,
) -> Result<Vec<ArchiveRecord>> {
    let filter = ArchiveFilter {
        node_id: None,
        roles: None,
        max_timestamp: Some(buffer_cutoff),
    };

    // best_score and a representative record per record_id, across all sub-queries.
    let mut best: HashMap<String, (f32, ArchiveRecord)> = HashMap::new();

    for q in sub_queries {
        let embedding = match embedder.embed(q).await {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, subquery = %q, "retriever: embedding failed, skipping sub-query");
                continue;
            }
        };

        let hits = match archive
            .query(&embedding, top_k_per_subquery, Some(&filter))
            .await
        {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, subquery = %q, "retriever: archive query failed, contributing zero hits");
                continue;
            }
        };

        for hit in hits {
            let key = hit.record.record_id.as_str().to_string();
            match best.get(&key) {
                Some((existing_score, _)) if *existing_score >= hit.score => {}
                _ => {
                    best.insert(key, (hit.score, hit.record));
                }
            }
        }
    }

    // Ties across equal-scoring hits break by timestamp then record_id
    // for a stable, reproducible ordering.
    let mut ranked: Vec<(f32, ArchiveRecord)> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                a.1.timestamp
                    .seconds()
                    .partial_cmp(&b.1.timestamp.seconds())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.1.record_id.as_str().cmp(b.1.record_id.as_str()))
    });

    let mut emitted = std::collections::HashSet::new();
    let mut out = Vec::new();

    for (_, hit_record) in ranked {
        if out.len() >= top_k {
            break;
        }

        let window = match archive
            .fetch_window(&hit_record.node_id, hit_record.timestamp, window_seconds)
            .await
        {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, node_id = %hit_record.node_id, "retriever: window fetch failed, emitting hit alone");
                vec![hit_record.clone()]
            }
        };

        for record in window {
            let key = record.record_id.as_str().to_string();
            if emitted.insert(key) {
                out.push(record);
            }
        }
    }

    let _ = requesting_node; // retained in the signature for callers/logging symmetry with C4/C8.
    Ok(out)
}
