//! Serializable capture of a [`VectorStore`](crate::store::VectorStore) and
//! reading/writing it to disk as JSON or YAML (picked by file extension).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{Metric, RecordId, StoreError, VectorStore};

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub version: u32,
    pub dimension: usize,
    pub metric: Metric,
    /// Id the store will hand out next.
    pub next_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: RecordId,
    pub source_id: String,
    pub sequence_index: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub header: SnapshotHeader,
    pub records: Vec<SnapshotRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    Json,
    Yaml,
}

impl SnapshotFormat {
    pub fn from_path(path: &Path) -> Result<Self, SnapshotError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml" | "yml") => Ok(Self::Yaml),
            _ => Err(SnapshotError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

impl Snapshot {
    pub fn render(&self, format: SnapshotFormat) -> Result<String, SnapshotError> {
        match format {
            SnapshotFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            SnapshotFormat::Yaml => Ok(serde_yaml::to_string(self)?),
        }
    }

    /// Parse a snapshot. Structural problems surface as `SnapshotError::Json`/`Yaml`;
    /// semantic checks happen on import.
    pub fn parse(s: &str, format: SnapshotFormat) -> Result<Self, SnapshotError> {
        match format {
            SnapshotFormat::Json => Ok(serde_json::from_str(s)?),
            SnapshotFormat::Yaml => Ok(serde_yaml::from_str(s)?),
        }
    }
}

/// Write `snapshot` to `path`. Goes through a sibling temp file so a crash
/// never leaves a half-written snapshot behind.
pub fn save_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    let format = SnapshotFormat::from_path(path)?;
    let body = snapshot.render(format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SnapshotError::Io(parent.to_path_buf(), e))?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, body).map_err(|e| SnapshotError::Io(tmp.clone(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| SnapshotError::Io(path.to_path_buf(), e))?;
    tracing::debug!(path = %path.display(), records = snapshot.records.len(), "saved snapshot");
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<Snapshot, SnapshotError> {
    let format = SnapshotFormat::from_path(path)?;
    let s = std::fs::read_to_string(path).map_err(|e| SnapshotError::Io(path.to_path_buf(), e))?;
    Snapshot::parse(&s, format)
}

/// Load a snapshot file into a new store that adopts its dimension and metric.
pub fn load_store(path: &Path) -> Result<VectorStore, SnapshotError> {
    Ok(VectorStore::from_snapshot(load_snapshot(path)?)?)
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io error for {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("malformed JSON snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed YAML snapshot: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("unsupported snapshot extension (use .json, .yaml or .yml): {0}")]
    UnsupportedFormat(PathBuf),
    #[error(transparent)]
    Store(#[from] StoreError),
}
