//! Integration tests against a real (embedded) LanceDB-backed
//! `VectorArchive`: buffer-cutoff correctness and context-window
//! monotonicity as the half-width grows.

use ctxtree_archive::{ArchiveFilter, ArchiveRecord, VectorArchive};
use ctxtree_core::{NodeId, RecordId, Role, Timestamp};

const DIM: usize = 8;

fn record(node: &NodeId, ts: f64, text: &str, embedding: Vec<f32>) -> ArchiveRecord {
    ArchiveRecord {
        record_id: RecordId::new(),
        node_id: node.clone(),
        role: Role::User,
        text: text.to_string(),
        timestamp: Timestamp(ts),
        node_title_at_index_time: "root".to_string(),
        embedding,
    }
}

/// One-hot-ish embeddings so a query embedding identical to a record's
/// embedding scores strictly highest against that record.
fn one_hot(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

async fn open_archive() -> (tempfile::TempDir, VectorArchive) {
    let dir = tempfile::tempdir().unwrap();
    let archive = VectorArchive::open(dir.path().to_str().unwrap(), DIM)
        .await
        .expect("embedded archive should open against a fresh directory");
    (dir, archive)
}

/// Scenario S2 — buffer capacity 5, turns t1..t6 appended so t1 is
/// evicted into the archive; oldest-in-buffer is t2. A query that would
/// match both t1 and t2 must surface t1 (archived, timestamp < cutoff)
/// but never t2 (still live in the buffer).
#[tokio::test]
async fn s2_cutoff_excludes_oldest_in_buffer_turn() {
    let (_dir, archive) = open_archive().await;
    let node = NodeId::new();

    let t1 = record(&node, 1.0, "t1 snake handling tips", one_hot(0));
    let t2 = record(&node, 2.0, "t2 python hello world", one_hot(1));
    archive.index(t1.clone()).await;
    archive.index(t2.clone()).await;

    // buffer's oldest_timestamp() after eviction of t1 is t2's timestamp.
    let cutoff = Timestamp(2.0);
    let filter = ArchiveFilter {
        node_id: None,
        roles: None,
        max_timestamp: Some(cutoff),
    };

    let hits_for_t1 = archive.query(&one_hot(0), 5, Some(&filter)).await.unwrap();
    assert!(
        hits_for_t1.iter().any(|h| h.record.record_id == t1.record_id),
        "t1 is strictly before the cutoff and must be retrievable"
    );

    let hits_for_t2 = archive.query(&one_hot(1), 5, Some(&filter)).await.unwrap();
    assert!(
        hits_for_t2.iter().all(|h| h.record.record_id != t2.record_id),
        "t2 sits at the cutoff (still the oldest live buffer turn) and must never be returned"
    );
}

/// Testable property 3 — every turn appended to any buffer has exactly
/// one archive record with the same (node_id, role, text, timestamp).
/// This test exercises the archive half of that property directly:
/// what's indexed is what comes back out under a plain metadata scan.
#[tokio::test]
async fn indexed_record_is_recoverable_unmodified() {
    let (_dir, archive) = open_archive().await;
    let node = NodeId::new();
    let rec = record(&node, 42.0, "hello archive", one_hot(3));
    archive.index(rec.clone()).await;

    let window = archive.fetch_window(&node, Timestamp(42.0), 0.5).await.unwrap();
    assert_eq!(window.len(), 1);
    assert_eq!(window[0].record_id, rec.record_id);
    assert_eq!(window[0].node_id, rec.node_id);
    assert_eq!(window[0].role, rec.role);
    assert_eq!(window[0].text, rec.text);
    assert_eq!(window[0].timestamp.seconds(), rec.timestamp.seconds());
}

/// Property 5 — increasing the context-window half-width never removes
/// a record from the window, only ever adds to it.
#[tokio::test]
async fn widening_window_never_loses_a_record() {
    let (_dir, archive) = open_archive().await;
    let node = NodeId::new();

    // 10s and 125s are deliberately NOT symmetric around the 70s center
    // (60s vs 55s away) so a single half-width can admit one without the
    // other, keeping the narrow/medium/wide sequence strictly growing.
    for (i, ts) in [10.0, 40.0, 70.0, 125.0].into_iter().enumerate() {
        archive.index(record(&node, ts, &format!("turn {i}"), one_hot(i))).await;
    }

    let center = Timestamp(70.0);
    let narrow = archive.fetch_window(&node, center, 5.0).await.unwrap();
    let medium = archive.fetch_window(&node, center, 35.0).await.unwrap();
    let wide = archive.fetch_window(&node, center, 58.0).await.unwrap();

    let narrow_ids: std::collections::HashSet<_> = narrow.iter().map(|r| r.record_id.clone()).collect();
    let medium_ids: std::collections::HashSet<_> = medium.iter().map(|r| r.record_id.clone()).collect();
    let wide_ids: std::collections::HashSet<_> = wide.iter().map(|r| r.record_id.clone()).collect();

    assert!(narrow_ids.is_subset(&medium_ids));
    assert!(medium_ids.is_subset(&wide_ids));
    assert_eq!(narrow.len(), 1, "only the center turn itself is within +-5s");
    assert_eq!(medium.len(), 2, "the 40s turn enters at +-35s");
    assert_eq!(wide.len(), 3, "the 125s turn enters at +-58s but the 10s turn (60s away) never does");
}

/// A query with a mismatched embedding dimension is rejected rather than
/// silently truncated or padded.
#[tokio::test]
async fn query_rejects_mismatched_embedding_dimension() {
    let (_dir, archive) = open_archive().await;
    let err = archive.query(&[0.0, 1.0, 2.0], 5, None).await.unwrap_err();
    assert!(matches!(
        err,
        ctxtree_archive::ArchiveError::DimensionMismatch { got: 3, expected: 8 }
    ));
}
