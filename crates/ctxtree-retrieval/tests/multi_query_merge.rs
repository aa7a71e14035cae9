//! Scenario S3 — multi-query merge across conversations. Archive
//! contains "my name is Alex" (node A) and "I work as an engineer"
//! (node B). Retrieval from a fresh node with an identity-flavored query
//! and its paraphrases must surface both, each tagged with the node it
//! actually came from.

use ctxtree_archive::{ArchiveRecord, EmbeddingModel, HashEmbedModel, VectorArchive};
use ctxtree_core::{NodeId, RecordId, Role, Timestamp};
use ctxtree_retrieval::retrieve;

const DIM: usize = 64;

async fn embed_record(
    embedder: &HashEmbedModel,
    node_id: &NodeId,
    node_title: &str,
    ts: f64,
    text: &str,
) -> ArchiveRecord {
    ArchiveRecord {
        record_id: RecordId::new(),
        node_id: node_id.clone(),
        role: Role::User,
        text: text.to_string(),
        timestamp: Timestamp(ts),
        node_title_at_index_time: node_title.to_string(),
        embedding: embedder.embed(text).await.unwrap(),
    }
}

#[tokio::test]
async fn s3_both_archived_messages_surface_with_originating_node_titles() {
    let dir = tempfile::tempdir().unwrap();
    let archive = VectorArchive::open(dir.path().to_str().unwrap(), DIM).await.unwrap();
    let embedder = HashEmbedModel::new(DIM);

    let node_a = NodeId::new();
    let node_b = NodeId::new();

    archive
        .index(embed_record(&embedder, &node_a, "chat with Alex", 100.0, "my name is Alex").await)
        .await;
    archive
        .index(embed_record(&embedder, &node_b, "career chat", 200.0, "I work as an engineer").await)
        .await;

    // A fresh requesting node has never appended anything, so its buffer
    // cutoff is +infinity: nothing is excluded by the live-buffer guard.
    let fresh_node = NodeId::new();
    let sub_queries = vec![
        "who am i?".to_string(),
        "my name is".to_string(),
        "I am a".to_string(),
        "about myself".to_string(),
        "I work as an engineer".to_string(),
    ];

    let results = retrieve(
        &sub_queries,
        &fresh_node,
        Timestamp::INFINITE,
        &archive,
        &embedder,
        5,
        5,
        60.0,
    )
    .await
    .unwrap();

    assert!(
        results.iter().any(|r| r.text == "my name is Alex" && r.node_title_at_index_time == "chat with Alex"),
        "Alex's identity message must surface labeled with its own node's title"
    );
    assert!(
        results
            .iter()
            .any(|r| r.text == "I work as an engineer" && r.node_title_at_index_time == "career chat"),
        "the engineer message must surface labeled with its own node's title, not the requester's"
    );
}

/// Testable property 4 (success path) — decomposition-independent: even
/// when sub-queries are supplied directly (as here, bypassing the LM
/// decomposer), merge-by-best-score must not drop a record just because
/// it scored lower under one sub-query than another — the max across
/// sub-queries wins.
#[tokio::test]
async fn best_score_across_subqueries_wins() {
    let dir = tempfile::tempdir().unwrap();
    let archive = VectorArchive::open(dir.path().to_str().unwrap(), DIM).await.unwrap();
    let embedder = HashEmbedModel::new(DIM);
    let node = NodeId::new();

    let exact_text = "the quarterly roadmap review";
    archive
        .index(embed_record(&embedder, &node, "planning", 50.0, exact_text).await)
        .await;

    let requester = NodeId::new();
    let sub_queries = vec![
        "totally unrelated filler query".to_string(),
        exact_text.to_string(),
    ];

    let results = retrieve(
        &sub_queries,
        &requester,
        Timestamp::INFINITE,
        &archive,
        &embedder,
        5,
        5,
        60.0,
    )
    .await
    .unwrap();

    assert!(results.iter().any(|r| r.text == exact_text));
}
