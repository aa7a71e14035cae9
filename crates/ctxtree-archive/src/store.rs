//! Vector Archive (C5) — durable, content-addressed store of every
//! message, indexed by dense embedding and filterable by metadata.
//!
//! Backed by LanceDB rather than a lexical full-text index: this
//! component's core requirement — approximate nearest-neighbor search
//! under cosine distance over dense vectors — has no lexical-search
//! analogue (see DESIGN.md for the stack rationale).

use std::sync::Arc;

use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use futures_util::TryStreamExt;
use tracing::{debug, warn};

use ctxtree_core::{NodeId, RecordId, Role, Timestamp};

use crate::error::{ArchiveError, Result};
use crate::types::{ArchiveFilter, ArchiveRecord, ScoredRecord};

const TABLE_NAME: &str = "archive_records";

fn schema(dimension: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("record_id", DataType::Utf8, false),
        Field::new("node_id", DataType::Utf8, false),
        Field::new("role", DataType::Utf8, false),
        Field::new("text", DataType::Utf8, false),
        Field::new("timestamp", DataType::Float64, false),
        Field::new("node_title_at_index_time", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            false,
        ),
    ]))
}

/// Durable archive of every turn ever appended to any buffer. `index` is
/// best-effort — a write failure is logged and swallowed so the live
/// chat turn never aborts because of it.
pub struct VectorArchive {
    table: lancedb::Table,
    dimension: usize,
}

impl VectorArchive {
    /// Open or create the archive table at `db_uri` (a local directory
    /// path for the embedded LanceDB backend). `dimension` must match the
    /// embedding model configured for this deployment — an existing
    /// table created with a different width is refused.
    pub async fn open(db_uri: &str, dimension: usize) -> Result<Self> {
        let conn = lancedb::connect(db_uri).execute().await?;
        let existing = conn.table_names().execute().await?;

        let table = if existing.iter().any(|n| n == TABLE_NAME) {
            conn.open_table(TABLE_NAME).execute().await?
        } else {
            let empty_schema = schema(dimension);
            let empty_batches = RecordBatchIterator::new(
                vec![Ok(RecordBatch::new_empty(empty_schema.clone()))],
                empty_schema,
            );
            conn.create_table(TABLE_NAME, Box::new(empty_batches))
                .execute()
                .await?
        };

        Ok(Self { table, dimension })
    }

    /// Append one record. Never propagates an error to the caller beyond
    /// logging it — the archive must not be able to break a live turn.
    pub async fn index(&self, record: ArchiveRecord) {
        if record.embedding.len() != self.dimension {
            warn!(
                got = record.embedding.len(),
                expected = self.dimension,
                record_id = %record.record_id,
                "archive: dropping record with mismatched embedding dimension"
            );
            return;
        }

        if let Err(e) = self.index_inner(&record).await {
            warn!(error = %e, record_id = %record.record_id, "archive: index failed, continuing turn");
        }
    }

    async fn index_inner(&self, record: &ArchiveRecord) -> Result<()> {
        let batch = self.record_to_batch(record)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
        self.table.add(Box::new(batches)).execute().await?;
        debug!(record_id = %record.record_id, "archive: record indexed");
        Ok(())
    }

    fn record_to_batch(&self, record: &ArchiveRecord) -> Result<RecordBatch> {
        let schema = schema(self.dimension);

        let vector_values = Float32Array::from(record.embedding.clone());
        let vector = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension as i32,
            Arc::new(vector_values) as ArrayRef,
            None,
        )?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![record.record_id.to_string()])),
                Arc::new(StringArray::from(vec![record.node_id.to_string()])),
                Arc::new(StringArray::from(vec![record.role.as_str().to_string()])),
                Arc::new(StringArray::from(vec![record.text.clone()])),
                Arc::new(arrow_array::Float64Array::from(vec![record.timestamp.seconds()])),
                Arc::new(StringArray::from(vec![record.node_title_at_index_time.clone()])),
                Arc::new(vector),
            ],
        )
        .map_err(ArchiveError::from)
    }

    /// ANN search by a pre-computed embedding. Results are sorted by
    /// descending cosine similarity score.
    pub async fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&ArchiveFilter>,
    ) -> Result<Vec<ScoredRecord>> {
        if embedding.len() != self.dimension {
            return Err(ArchiveError::DimensionMismatch {
                got: embedding.len(),
                expected: self.dimension,
            });
        }

        let mut query = self
            .table
            .query()
            .nearest_to(embedding)?
            .distance_type(lancedb::DistanceType::Cosine)
            .limit(k);

        if let Some(sql) = filter.and_then(filter_to_sql) {
            query = query.only_if(sql);
        }

        let mut stream = query.execute().await?;
        let mut hits = Vec::new();

        while let Some(batch) = stream.try_next().await? {
            hits.extend(batch_to_scored_records(&batch, self.dimension)?);
        }

        // Ties across equal-scoring hits break by timestamp then record_id
        // for a stable, reproducible ordering.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.record
                        .timestamp
                        .seconds()
                        .partial_cmp(&b.record.timestamp.seconds())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.record.record_id.as_str().cmp(b.record.record_id.as_str()))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Plain metadata scan, no vector search: every record for `node_id`
    /// whose timestamp falls in `[center - half_width, center + half_width]`,
    /// in chronological order. Used by the retriever to expand a hit into
    /// its surrounding context window.
    pub async fn fetch_window(
        &self,
        node_id: &NodeId,
        center: Timestamp,
        half_width: f64,
    ) -> Result<Vec<ArchiveRecord>> {
        let lo = center.seconds() - half_width;
        let hi = center.seconds() + half_width;
        let sql = format!(
            "node_id = '{}' AND timestamp >= {} AND timestamp <= {}",
            escape_sql(node_id.as_str()),
            lo,
            hi
        );

        let mut stream = self.table.query().only_if(sql).execute().await?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            out.extend(
                batch_to_scored_records(&batch, self.dimension)?
                    .into_iter()
                    .map(|sr| sr.record),
            );
        }

        out.sort_by(|a, b| {
            a.timestamp
                .seconds()
                .partial_cmp(&b.timestamp.seconds())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record_id.as_str().cmp(b.record_id.as_str()))
        });
        Ok(out)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

fn filter_to_sql(filter: &ArchiveFilter) -> Option<String> {
    let mut clauses = Vec::new();

    if let Some(node_id) = &filter.node_id {
        clauses.push(format!("node_id = '{}'", escape_sql(node_id.as_str())));
    }
    if let Some(roles) = &filter.roles {
        if !roles.is_empty() {
            let list = roles
                .iter()
                .map(|r| format!("'{}'", r.as_str()))
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("role IN ({list})"));
        }
    }
    if let Some(max_ts) = filter.max_timestamp {
        if max_ts.seconds().is_finite() {
            clauses.push(format!("timestamp < {}", max_ts.seconds()));
        }
    }

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join(" AND "))
    }
}

fn escape_sql(s: &str) -> String {
    s.replace('\'', "''")
}

fn batch_to_scored_records(batch: &RecordBatch, dimension: usize) -> Result<Vec<ScoredRecord>> {
    let record_id = column_as_strings(batch, "record_id")?;
    let node_id = column_as_strings(batch, "node_id")?;
    let role = column_as_strings(batch, "role")?;
    let text = column_as_strings(batch, "text")?;
    let node_title = column_as_strings(batch, "node_title_at_index_time")?;

    let timestamp = batch
        .column_by_name("timestamp")
        .and_then(|c| c.as_any().downcast_ref::<arrow_array::Float64Array>())
        .ok_or_else(|| ArchiveError::Embedding("missing timestamp column".to_string()))?;

    // LanceDB appends `_distance` for nearest-neighbor queries; cosine
    // distance in [0, 2] is converted to a similarity score in [-1, 1].
    let distance = batch
        .column_by_name("_distance")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let score = distance.map(|d| 1.0 - d.value(i)).unwrap_or(0.0);
        out.push(ScoredRecord {
            record: ArchiveRecord {
                record_id: RecordId::from(record_id[i].clone()),
                node_id: NodeId::from(node_id[i].clone()),
                role: role[i].parse::<Role>().unwrap_or(Role::User),
                text: text[i].clone(),
                timestamp: Timestamp(timestamp.value(i)),
                node_title_at_index_time: node_title[i].clone(),
                embedding: vec![0.0; dimension], // not needed by callers; omitted to avoid re-decoding the list column
            },
            score,
        });
    }
    Ok(out)
}

fn column_as_strings(batch: &RecordBatch, name: &str) -> Result<Vec<String>> {
    let col = batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| ArchiveError::Embedding(format!("missing or malformed column: {name}")))?;
    Ok((0..col.len()).map(|i| col.value(i).to_string()).collect())
}
