//! In-memory vector index with exhaustive cosine similarity search.
//!
//! Embeddings are normalised on insert, so similarity against a normalised
//! query is a plain dot product. Search is O(n) over all entries and ties
//! keep insertion order.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use sift_core::error::{Result, SiftError};

use crate::embedding::normalize;

/// Version tag written into persisted index files.
const FORMAT_VERSION: u32 = 1;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: String,
    embedding: Vec<f32>,
    payload: Value,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: Vec<VectorEntry>,
    positions: HashMap<String, usize>,
}

impl IndexState {
    fn from_entries(entries: Vec<VectorEntry>) -> Self {
        let positions = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        Self { entries, positions }
    }
}

/// On-disk layout of a saved index.
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    dimension: usize,
    entries: Vec<VectorEntry>,
    /// Location of an external ANN blob, if one was built alongside.
    #[serde(default)]
    external_index: Option<PathBuf>,
}

/// Thread-safe brute-force vector index keyed by record id.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    state: Arc<RwLock<IndexState>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            state: Arc::new(RwLock::new(IndexState::default())),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>> {
        self.state
            .read()
            .map_err(|e| SiftError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>> {
        self.state
            .write()
            .map_err(|e| SiftError::Storage(format!("Lock poisoned: {}", e)))
    }

    fn check_dimension(&self, len: usize) -> Result<()> {
        if len != self.dimension {
            return Err(SiftError::Search(format!(
                "Embedding has {} dimensions, index expects {}",
                len, self.dimension
            )));
        }
        Ok(())
    }

    /// Store `embedding` (normalised) and `payload` under `id`.
    ///
    /// Re-adding an id overwrites it in place, keeping its original position.
    pub fn add(&self, id: impl Into<String>, payload: Value, mut embedding: Vec<f32>) -> Result<()> {
        self.check_dimension(embedding.len())?;
        normalize(&mut embedding);

        let id = id.into();
        let mut state = self.write()?;
        match state.positions.get(&id).copied() {
            Some(pos) => {
                state.entries[pos].embedding = embedding;
                state.entries[pos].payload = payload;
            }
            None => {
                let pos = state.entries.len();
                state.positions.insert(id.clone(), pos);
                state.entries.push(VectorEntry {
                    id,
                    embedding,
                    payload,
                });
            }
        }
        Ok(())
    }

    /// The `limit` entries most similar to `query`, best first.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        self.check_dimension(query.len())?;
        let mut query = query.to_vec();
        normalize(&mut query);

        let state = self.read()?;
        let mut scored: Vec<(usize, f64)> = state
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, dot(&query, &entry.embedding)))
            .collect();

        // Stable sort, so equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &state.entries[i];
                SearchHit {
                    id: entry.id.clone(),
                    score,
                    payload: entry.payload.clone(),
                }
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Option<Vec<f32>> {
        let state = self.read().ok()?;
        let pos = *state.positions.get(id)?;
        Some(state.entries[pos].embedding.clone())
    }

    /// Remove `id`. Returns whether it was present.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut state = self.write()?;
        let Some(pos) = state.positions.remove(id) else {
            return Ok(false);
        };
        state.entries.remove(pos);
        let entries = std::mem::take(&mut state.entries);
        *state = IndexState::from_entries(entries);
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        *self.write()? = IndexState::default();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.state
            .read()
            .map(|s| s.entries.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }

    /// Persist dimension, vectors and payloads to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = self.read()?;
        let file = IndexFile {
            version: FORMAT_VERSION,
            dimension: self.dimension,
            entries: state.entries.clone(),
            external_index: None,
        };
        drop(state);

        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, &file)?;
        writer.flush()?;
        info!(path = %path.display(), entries = file.entries.len(), "Vector index saved");
        Ok(())
    }

    /// Replace the contents with the index saved at `path`.
    ///
    /// Fails with [`SiftError::IndexLoad`] on a missing, unreadable or
    /// incompatible file, leaving the current contents untouched.
    pub fn try_load(&self, path: &Path) -> Result<()> {
        let file = File::open(path)
            .map_err(|e| SiftError::IndexLoad(format!("{}: {}", path.display(), e)))?;
        let saved: IndexFile = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| SiftError::IndexLoad(format!("{}: {}", path.display(), e)))?;

        if saved.version != FORMAT_VERSION {
            return Err(SiftError::IndexLoad(format!(
                "unsupported index version {}",
                saved.version
            )));
        }
        if saved.dimension != self.dimension {
            return Err(SiftError::IndexLoad(format!(
                "index has {} dimensions, expected {}",
                saved.dimension, self.dimension
            )));
        }
        if let Some(bad) = saved.entries.iter().find(|e| e.embedding.len() != self.dimension) {
            return Err(SiftError::IndexLoad(format!(
                "entry '{}' has {} dimensions",
                bad.id,
                bad.embedding.len()
            )));
        }

        let count = saved.entries.len();
        *self.write()? = IndexState::from_entries(saved.entries);
        info!(path = %path.display(), entries = count, "Vector index loaded");
        Ok(())
    }

    /// Soft variant of [`try_load`](Self::try_load): logs and returns `false`
    /// on failure.
    pub fn load(&self, path: &Path) -> bool {
        match self.try_load(path) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to load vector index");
                false
            }
        }
    }
}

/// Dot product in f64.
pub fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum()
}

/// Cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot(a, b) / (mag_a * mag_b)
}
