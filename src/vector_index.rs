//! Nearest-neighbor index over chunk vectors.
//!
//! The [`VectorIndex`] trait is the query contract every index must keep:
//! results are ordered by descending cosine similarity, ties go to the lower
//! chunk id, `k` larger than the index is clamped, and an empty index or a
//! query of the wrong dimension is an error. [`FlatIndex`] is the baseline
//! brute-force implementation.

use std::cmp::Ordering;

use rayon::prelude::*;

use crate::error::{Error, Result};

/// One search hit: a chunk id and its similarity to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    pub id: u64,
    pub score: f32,
}

impl ScoredId {
    /// Ranking order: higher score first, then lower id.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then(self.id.cmp(&other.id))
    }
}

/// Append-only vector index keyed by chunk id.
pub trait VectorIndex: Send + Sync {
    /// Append vectors with their ids.
    ///
    /// The first non-empty add fixes the dimension. Ids must be strictly
    /// increasing and larger than every id already indexed. Nothing is
    /// appended when any vector is rejected.
    fn add(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<()>;

    /// Return up to `k` ids ranked by similarity to `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>>;

    /// Dimension of indexed vectors, once established.
    fn dimension(&self) -> Option<usize>;

    /// Number of indexed vectors.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every vector and forget the dimension.
    fn clear(&mut self);

    /// Stored vector for `id`, if indexed.
    fn vector(&self, id: u64) -> Option<Vec<f32>>;
}

/// Brute-force index scanning one contiguous buffer.
///
/// Search is O(n * d) and scores vectors in parallel.
#[derive(Debug, Default, Clone)]
pub struct FlatIndex {
    ids: Vec<u64>,
    data: Vec<f32>,
    norms: Vec<f32>,
    dimension: Option<usize>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.ids.binary_search(&id).ok()
    }

    fn row(&self, pos: usize, dimension: usize) -> &[f32] {
        &self.data[pos * dimension..(pos + 1) * dimension]
    }
}

fn norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Cosine similarity given precomputed norms; zero vectors score 0.
fn cosine(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

fn check_finite(vector: &[f32]) -> Result<()> {
    if let Some(i) = vector.iter().position(|x| !x.is_finite()) {
        return Err(Error::Embedding(format!(
            "non-finite value at index {i}"
        )));
    }
    Ok(())
}

impl VectorIndex for FlatIndex {
    fn add(&mut self, ids: &[u64], vectors: &[Vec<f32>]) -> Result<()> {
        if ids.len() != vectors.len() {
            return Err(Error::Inconsistent(format!(
                "{} ids for {} vectors",
                ids.len(),
                vectors.len()
            )));
        }
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let dimension = self.dimension.unwrap_or(first.len());
        if dimension == 0 {
            return Err(Error::Embedding("zero-length vector".to_string()));
        }

        let mut last = self.ids.last().copied();
        for (&id, vector) in ids.iter().zip(vectors) {
            if vector.len() != dimension {
                return Err(Error::Dimension {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            check_finite(vector)?;
            if last.is_some_and(|prev| id <= prev) {
                return Err(Error::Inconsistent(format!(
                    "chunk id {id} is not greater than the last indexed id"
                )));
            }
            last = Some(id);
        }

        self.dimension = Some(dimension);
        self.data.reserve(vectors.len() * dimension);
        for (&id, vector) in ids.iter().zip(vectors) {
            self.ids.push(id);
            self.data.extend_from_slice(vector);
            self.norms.push(norm(vector));
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredId>> {
        if k == 0 {
            return Err(Error::Config(
                "k must be greater than zero".to_string(),
            ));
        }
        let Some(dimension) = self.dimension.filter(|_| !self.ids.is_empty())
        else {
            return Err(Error::EmptyIndex);
        };
        if query.len() != dimension {
            return Err(Error::Dimension {
                expected: dimension,
                actual: query.len(),
            });
        }
        check_finite(query)?;

        let query_norm = norm(query);
        let mut scored: Vec<ScoredId> = self
            .data
            .par_chunks_exact(dimension)
            .zip(self.norms.par_iter())
            .zip(self.ids.par_iter())
            .map(|((row, &row_norm), &id)| ScoredId {
                id,
                score: cosine(query, query_norm, row, row_norm),
            })
            .collect();

        scored.sort_unstable_by(ScoredId::rank_cmp);
        scored.truncate(k);
        Ok(scored)
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn vector(&self, id: u64) -> Option<Vec<f32>> {
        let dimension = self.dimension?;
        self.position(id).map(|pos| self.row(pos, dimension).to_vec())
    }
}
