//! In-memory vector store for chunk embeddings.
//!
//! Records are addressed by a [`RecordId`] that is assigned at insertion,
//! grows monotonically and is never reused after a delete. Search is an exact
//! linear scan; ties on score are broken by the lower id. Persistence goes
//! through [`Snapshot`](crate::snapshot::Snapshot).

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunks::Chunk;
use crate::snapshot::{Snapshot, SnapshotHeader, SnapshotRecord, SNAPSHOT_VERSION};

pub type RecordId = u64;

/// Id handed out by a fresh or cleared store.
pub const FIRST_ID: RecordId = 1;

/// Similarity metric. Higher scores always mean more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity in [-1, 1]. A zero vector scores 0 against anything.
    #[default]
    Cosine,
    /// `1 / (1 + euclidean distance)`, in (0, 1].
    Euclidean,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Cosine => f.write_str("cosine"),
            Metric::Euclidean => f.write_str("euclidean"),
        }
    }
}

/// A chunk with its embedding, stored for similarity search.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub id: RecordId,
    pub chunk: Chunk,
    vector: Vec<f32>,
    /// L2 norm of `vector` in f64, cached for cosine scoring.
    norm: f64,
}

impl IndexedRecord {
    fn new(id: RecordId, chunk: Chunk, vector: Vec<f32>) -> Self {
        let norm = l2_norm(&vector);
        Self {
            id,
            chunk,
            vector,
            norm,
        }
    }

    pub fn vector(&self) -> &[f32] {
        &self.vector
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: RecordId,
    pub chunk: Chunk,
    pub score: f32,
}

/// In-memory vector store. Holds chunks and their embeddings; supports similarity search.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    metric: Metric,
    records: Vec<IndexedRecord>,
    /// id -> position in `records`. Positions move on delete; ids do not.
    positions: HashMap<RecordId, usize>,
    next_id: RecordId,
}

impl VectorStore {
    pub fn new(dimension: usize, metric: Metric) -> Result<Self, StoreError> {
        if dimension == 0 {
            return Err(StoreError::InvalidArgument(
                "vector dimension must be positive".to_string(),
            ));
        }
        Ok(Self {
            dimension,
            metric,
            records: Vec::new(),
            positions: HashMap::new(),
            next_id: FIRST_ID,
        })
    }

    /// Build a store with the snapshot's dimension and metric and load it.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut store = Self::new(snapshot.header.dimension, snapshot.header.metric)
            .map_err(|e| StoreError::SnapshotFormat(e.to_string()))?;
        store.import_snapshot(snapshot)?;
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Add a chunk with its embedding. Returns the new record's id.
    pub fn insert(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<RecordId, StoreError> {
        self.check_vector(&vector)?;
        let id = self.next_id;
        self.next_id = id
            .checked_add(1)
            .ok_or_else(|| StoreError::InvalidArgument("record ids exhausted".to_string()))?;
        self.positions.insert(id, self.records.len());
        self.records.push(IndexedRecord::new(id, chunk, vector));
        tracing::trace!(id, "inserted record");
        Ok(id)
    }

    /// Up to `k` records most similar to `query`, best first. Records scoring
    /// below `min_score` are dropped even if that leaves fewer than `k`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        if k == 0 {
            return Err(StoreError::InvalidArgument("k must be positive".to_string()));
        }
        if min_score.is_some_and(|min| !min.is_finite()) {
            return Err(StoreError::InvalidArgument("min_score must be finite".to_string()));
        }
        self.check_vector(query)?;

        let q_norm = l2_norm(query);
        let mut scored: Vec<(f32, &IndexedRecord)> = self
            .records
            .iter()
            .map(|r| (self.score(query, q_norm, r), r))
            .filter(|(score, _)| min_score.map_or(true, |min| *score >= min))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, r)| SearchHit {
                id: r.id,
                chunk: r.chunk.clone(),
                score,
            })
            .collect())
    }

    /// Remove a record. Unknown ids are an error.
    pub fn delete(&mut self, id: RecordId) -> Result<(), StoreError> {
        let pos = self.positions.remove(&id).ok_or(StoreError::NotFound(id))?;
        self.records.swap_remove(pos);
        if let Some(moved) = self.records.get(pos) {
            self.positions.insert(moved.id, pos);
        }
        Ok(())
    }

    /// Remove everything and restart ids at [`FIRST_ID`].
    pub fn clear(&mut self) {
        self.records.clear();
        self.positions.clear();
        self.next_id = FIRST_ID;
    }

    pub fn get(&self, id: RecordId) -> Option<&IndexedRecord> {
        self.positions.get(&id).map(|&pos| &self.records[pos])
    }

    /// Ids of all records from `source_id`, ascending.
    pub fn ids_for_source(&self, source_id: &str) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self
            .records
            .iter()
            .filter(|r| r.chunk.source_id == source_id)
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Distinct source ids with at least one record, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.records.iter().map(|r| r.chunk.source_id.clone()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of indexed chunks.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Capture every record (ordered by id) plus the store configuration.
    pub fn export_snapshot(&self) -> Snapshot {
        let mut records: Vec<SnapshotRecord> = self
            .records
            .iter()
            .map(|r| SnapshotRecord {
                id: r.id,
                source_id: r.chunk.source_id.clone(),
                sequence_index: r.chunk.sequence_index,
                text: r.chunk.text.clone(),
                summary: r.chunk.summary.clone(),
                vector: r.vector.clone(),
            })
            .collect();
        records.sort_by_key(|r| r.id);
        Snapshot {
            header: SnapshotHeader {
                version: SNAPSHOT_VERSION,
                dimension: self.dimension,
                metric: self.metric,
                next_id: self.next_id,
            },
            records,
        }
    }

    /// Replace the whole store content with `snapshot`. The snapshot is fully
    /// validated first; on error the store is left untouched.
    pub fn import_snapshot(&mut self, snapshot: Snapshot) -> Result<(), StoreError> {
        let header = &snapshot.header;
        if header.version != SNAPSHOT_VERSION {
            return Err(StoreError::SnapshotFormat(format!(
                "unsupported snapshot version {}",
                header.version
            )));
        }
        if header.dimension != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: header.dimension,
            });
        }
        if header.metric != self.metric {
            return Err(StoreError::SnapshotFormat(format!(
                "snapshot metric {} does not match store metric {}",
                header.metric, self.metric
            )));
        }
        if header.next_id < FIRST_ID {
            return Err(StoreError::SnapshotFormat(format!(
                "next id {} is below the first id {FIRST_ID}",
                header.next_id
            )));
        }

        let next_id = header.next_id;
        let mut seen = HashSet::with_capacity(snapshot.records.len());
        let mut records = Vec::with_capacity(snapshot.records.len());
        let mut positions = HashMap::with_capacity(snapshot.records.len());
        for rec in snapshot.records {
            if rec.id < FIRST_ID || rec.id >= next_id {
                return Err(StoreError::SnapshotFormat(format!(
                    "record id {} outside [{FIRST_ID}, {next_id})",
                    rec.id
                )));
            }
            if !seen.insert(rec.id) {
                return Err(StoreError::SnapshotFormat(format!("duplicate record id {}", rec.id)));
            }
            if rec.vector.len() != self.dimension {
                return Err(StoreError::SnapshotFormat(format!(
                    "record {} has {} components, expected {}",
                    rec.id,
                    rec.vector.len(),
                    self.dimension
                )));
            }
            if rec.vector.iter().any(|x| !x.is_finite()) {
                return Err(StoreError::SnapshotFormat(format!(
                    "record {} has a non-finite component",
                    rec.id
                )));
            }
            let chunk = Chunk {
                text: rec.text,
                source_id: rec.source_id,
                sequence_index: rec.sequence_index,
                summary: rec.summary,
            };
            positions.insert(rec.id, records.len());
            records.push(IndexedRecord::new(rec.id, chunk, rec.vector));
        }

        self.records = records;
        self.positions = positions;
        self.next_id = next_id;
        tracing::debug!(records = self.records.len(), next_id, "imported snapshot");
        Ok(())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(StoreError::InvalidArgument(
                "vector has a non-finite component".to_string(),
            ));
        }
        Ok(())
    }

    /// Accumulates in f64: squares of finite f32 components neither overflow
    /// nor underflow there. Always finite.
    fn score(&self, query: &[f32], q_norm: f64, record: &IndexedRecord) -> f32 {
        let score = match self.metric {
            Metric::Cosine => {
                if q_norm <= 0.0 || record.norm <= 0.0 {
                    return 0.0;
                }
                // Divide by each norm separately; their product can overflow.
                let scaled = dot(query, &record.vector) / q_norm / record.norm;
                scaled.clamp(-1.0, 1.0)
            }
            Metric::Euclidean => {
                let dist = query
                    .iter()
                    .zip(&record.vector)
                    .map(|(&a, &b)| {
                        let d = f64::from(a) - f64::from(b);
                        d * d
                    })
                    .sum::<f64>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
        };
        if score.is_finite() {
            score as f32
        } else {
            0.0
        }
    }
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no record with id {0}")]
    NotFound(RecordId),
    #[error("malformed snapshot: {0}")]
    SnapshotFormat(String),
}
