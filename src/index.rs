//! In-memory nearest-neighbour index over one document's chunk embeddings.
//!
//! [`VectorIndex`] is the contract the retriever depends on; [`FlatIndex`]
//! is a brute-force implementation that scores every stored vector on each
//! query. At a few thousand chunks per document this is a handful of
//! microseconds; an approximate structure can replace it behind the same
//! trait.
//!
//! Scores are "higher is more similar" for both metrics: cosine similarity
//! for [`Metric::Cosine`] and negated Euclidean distance for [`Metric::L2`].
//! Ranking is by descending score, ties by ascending chunk index, and NaN
//! scores always rank last.

use std::cmp::Ordering;
use std::sync::Arc;

use thiserror::Error;

use crate::config::Metric;
use crate::embedding::{cosine_similarity, l2_distance};
use crate::models::Chunk;

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("chunk {index} has {actual}-dimensional embedding, expected {expected}")]
    InconsistentDimensions {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("query vector has {actual} dimensions, index has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A ranked query hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub score: f32,
}

/// Immutable nearest-neighbour structure, built once per processed document.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector dimension, or `None` for an empty index.
    fn dims(&self) -> Option<usize>;

    /// The `min(k, len)` best matches for `vector`, best first.
    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;
}

/// Brute-force index: a flat list of `(chunk index, embedding)` pairs.
pub struct FlatIndex {
    metric: Metric,
    dims: Option<usize>,
    entries: Vec<(usize, Arc<[f32]>)>,
}

impl FlatIndex {
    /// O(n) construction. Fails if the embeddings disagree on dimension.
    pub fn build(chunks: &[Chunk], metric: Metric) -> Result<Self, IndexError> {
        let dims = chunks.first().map(|c| c.embedding.len());
        let mut entries = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if let Some(expected) = dims {
                if chunk.embedding.len() != expected {
                    return Err(IndexError::InconsistentDimensions {
                        index: chunk.index,
                        expected,
                        actual: chunk.embedding.len(),
                    });
                }
            }
            entries.push((chunk.index, Arc::clone(&chunk.embedding)));
        }
        Ok(Self {
            metric,
            dims,
            entries,
        })
    }

    fn score(&self, a: &[f32], b: &[f32]) -> f32 {
        match self.metric {
            Metric::Cosine => cosine_similarity(a, b),
            Metric::L2 => -l2_distance(a, b),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        let expected = match self.dims {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if vector.len() != expected {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(index, embedding)| Neighbor {
                index: *index,
                score: self.score(vector, embedding),
            })
            .collect();
        hits.sort_by(rank);
        hits.truncate(k.min(self.entries.len()));
        Ok(hits)
    }
}

/// Descending score, NaN last, then ascending chunk index.
fn rank(a: &Neighbor, b: &Neighbor) -> Ordering {
    match (a.score.is_nan(), b.score.is_nan()) {
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (true, true) => a.index.cmp(&b.index),
        (false, false) => b
            .score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.index.cmp(&b.index)),
    }
}

/// Build the default index implementation for a processed document.
pub fn build_index(chunks: &[Chunk], metric: Metric) -> Result<Box<dyn VectorIndex>, IndexError> {
    Ok(Box::new(FlatIndex::build(chunks, metric)?))
}
