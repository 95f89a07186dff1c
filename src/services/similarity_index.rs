//! Exact nearest-neighbour index over approved question embeddings.
//!
//! Distances are squared L2 and scores are `1 / (1 + distance)`, so identical vectors
//! score 1.0 and scores fall monotonically with distance. Readers run concurrently;
//! additions and rebuilds take the write lock.

use crate::error::{Error, Result};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: String,
    pub distance: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_questions: usize,
    pub dimension: usize,
    pub index_size_mb: f64,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dimension: usize,
    records: Vec<IndexEntry>,
}

/// `owner:paper:position`, so lookups can be restricted to one requester's papers.
pub fn question_key(owner: Uuid, paper_id: Uuid, position: usize) -> String {
    format!("{}:{}:{}", owner, paper_id, position)
}

pub fn key_owner(id: &str) -> Option<Uuid> {
    id.split(':').next().and_then(|s| Uuid::parse_str(s).ok())
}

pub fn key_paper(id: &str) -> Option<Uuid> {
    id.split(':').nth(1).and_then(|s| Uuid::parse_str(s).ok())
}

pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub struct SimilarityIndex {
    dimension: usize,
    entries: RwLock<Vec<IndexEntry>>,
}

impl SimilarityIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::SimilarityIndex(format!(
                "expected {}-dimensional vector, got {}",
                self.dimension,
                vector.len()
            )));
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(Error::SimilarityIndex(
                "vector contains non-finite values".to_string(),
            ));
        }
        Ok(())
    }

    pub fn add(&self, id: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        self.check_dimension(&vector)?;
        self.entries.write().push(IndexEntry {
            id: id.into(),
            vector,
        });
        Ok(())
    }

    /// All-or-nothing: one bad vector rejects the whole batch.
    pub fn add_batch(&self, batch: Vec<(String, Vec<f32>)>) -> Result<usize> {
        for (_, vector) in &batch {
            self.check_dimension(vector)?;
        }
        let added = batch.len();
        let mut entries = self.entries.write();
        entries.extend(batch.into_iter().map(|(id, vector)| IndexEntry { id, vector }));
        Ok(added)
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.search_filtered(query, k, |_| true)
    }

    /// Up to `k` nearest entries accepted by `filter`, nearest first. Ties keep insertion order.
    pub fn search_filtered<F>(&self, query: &[f32], k: usize, filter: F) -> Result<Vec<Neighbor>>
    where
        F: Fn(&str) -> bool,
    {
        self.check_dimension(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.entries.read();
        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| filter(&e.id))
            .map(|(i, e)| (i, squared_l2(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, distance)| Neighbor {
                id: entries[i].id.clone(),
                distance,
                similarity: similarity_from_distance(distance),
            })
            .collect())
    }

    /// Replaces the contents wholesale. Readers see either the old or the new set.
    pub fn replace(&self, entries: Vec<IndexEntry>) -> Result<()> {
        for entry in &entries {
            self.check_dimension(&entry.vector)?;
        }
        *self.entries.write() = entries;
        Ok(())
    }

    /// Keeps only the records whose id passes `retain`. The new set is built while
    /// readers still see the old one; other writers wait until the swap.
    pub fn rebuild<F>(&self, retain: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let guard = self.entries.upgradable_read();
        let kept: Vec<IndexEntry> = guard.iter().filter(|e| retain(&e.id)).cloned().collect();
        let removed = guard.len() - kept.len();
        let mut writer = RwLockUpgradableReadGuard::upgrade(guard);
        *writer = kept;
        tracing::info!(
            "Similarity index rebuilt with {} questions ({} removed)",
            writer.len(),
            removed
        );
        removed
    }

    pub fn stats(&self) -> IndexStats {
        let total = self.len();
        IndexStats {
            total_questions: total,
            dimension: self.dimension,
            index_size_mb: (total * self.dimension * 4) as f64 / (1024.0 * 1024.0),
        }
    }

    /// Writes a sibling temp file, then renames it over `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = Snapshot {
            dimension: self.dimension,
            records: self.entries.read().clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| Error::SimilarityIndex(format!("serialize index: {}", e)))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::SimilarityIndex(format!("create index dir: {}", e)))?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::SimilarityIndex(format!("write index: {}", e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::SimilarityIndex(format!("replace index: {}", e)))?;

        tracing::info!(
            "Saved similarity index with {} questions to {}",
            snapshot.records.len(),
            path.display()
        );
        Ok(())
    }

    /// Any failure to read a usable snapshot yields an empty index.
    pub async fn load(path: &Path, dimension: usize) -> Self {
        let index = Self::new(dimension);
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No similarity index at {}, starting empty", path.display());
                return index;
            }
            Err(e) => {
                tracing::warn!("Failed to read similarity index {}: {}", path.display(), e);
                return index;
            }
        };

        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Corrupt similarity index {}: {}", path.display(), e);
                return index;
            }
        };
        if snapshot.dimension != dimension {
            tracing::warn!(
                "Similarity index dimension {} does not match configured {}, starting empty",
                snapshot.dimension,
                dimension
            );
            return index;
        }
        if let Err(e) = index.replace(snapshot.records) {
            tracing::warn!("Discarding similarity index {}: {}", path.display(), e);
            return Self::new(dimension);
        }
        index
    }
}
