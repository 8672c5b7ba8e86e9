//! Index contracts and result shapes.
//!
//! Every index in this crate speaks the same batch surface: train on a
//! sample, add vectors (assigned dense contiguous ids in insertion order),
//! then `search`/`range_search` over query batches. Searches take `&self`;
//! the borrow checker therefore rules out `add` interleaving with an
//! in-flight search, and query batches can be fanned out across workers
//! freely.

use crate::dc::DistanceComputer;
use crate::distance::Metric;
use crate::error::{Error, Result};

/// Id marking an unfilled result slot.
pub const SENTINEL_ID: i64 = -1;

/// Top-k search results for a query batch.
///
/// Row-major `nq x k`; slots that could not be filled carry
/// [`SENTINEL_ID`] and the metric's worst distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub distances: Vec<f32>,
    pub ids: Vec<i64>,
    pub k: usize,
}

impl SearchResult {
    /// Result row for query `q`.
    pub fn row(&self, q: usize) -> (&[f32], &[i64]) {
        let range = q * self.k..(q + 1) * self.k;
        (&self.distances[range.clone()], &self.ids[range])
    }
}

/// Range search results: a variable number of (id, distance) pairs per
/// query, exposed through a cumulative offset table over flat arrays.
///
/// The pairs for query `q` live at `lims[q]..lims[q + 1]`;
/// `lims.len() == nq + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSearchResult {
    pub lims: Vec<usize>,
    pub ids: Vec<i64>,
    pub distances: Vec<f32>,
}

impl RangeSearchResult {
    /// Pairs for query `q`.
    pub fn row(&self, q: usize) -> (&[i64], &[f32]) {
        let range = self.lims[q]..self.lims[q + 1];
        (&self.ids[range.clone()], &self.distances[range])
    }

    /// Total number of returned pairs.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no query returned any pair.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// The index surface the refinement composer consumes.
///
/// `SearchParams` is the index's own overridable per-call configuration
/// (e.g. candidate-list breadth for IVF); passing `None` uses the index's
/// stored defaults. This is distinct from the composer's
/// [`crate::refine::RefineSearchParams`].
pub trait Index {
    type SearchParams;

    /// Vector dimensionality `d`.
    fn dimension(&self) -> usize;

    /// Metric this index was constructed for.
    fn metric(&self) -> Metric;

    /// Number of stored vectors.
    fn ntotal(&self) -> usize;

    /// Whether the index is ready to `add`/`search`.
    fn is_trained(&self) -> bool;

    /// Train on `n` vectors stored contiguously.
    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()>;

    /// Add `n` vectors; ids are assigned contiguously in insertion order
    /// and never reused.
    fn add(&mut self, vectors: &[f32], n: usize) -> Result<()>;

    /// Top-k search over `nq` queries.
    fn search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        params: Option<&Self::SearchParams>,
    ) -> Result<SearchResult>;

    /// All stored items within `radius` of each query.
    fn range_search(
        &self,
        queries: &[f32],
        nq: usize,
        radius: f32,
        params: Option<&Self::SearchParams>,
    ) -> Result<RangeSearchResult>;
}

/// An index able to hand out a distance computer over its own storage, for
/// re-scoring candidates by id.
pub trait RefineSource {
    /// A fresh computer bound to this index's stored contents. Each caller
    /// (worker) gets its own instance.
    fn distance_computer(&self) -> Result<Box<dyn DistanceComputer + '_>>;
}

/// Validate the shared preconditions of a batch search call.
pub(crate) fn check_search_args(
    dimension: usize,
    queries: &[f32],
    nq: usize,
    k: usize,
) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidArgument("k must be positive".to_string()));
    }
    check_batch(dimension, queries, nq)
}

/// Validate the shared preconditions of a range search call.
pub(crate) fn check_range_args(
    dimension: usize,
    queries: &[f32],
    nq: usize,
    radius: f32,
) -> Result<()> {
    if !radius.is_finite() || radius <= 0.0 {
        return Err(Error::InvalidArgument(format!(
            "radius must be finite and positive, got {radius}"
        )));
    }
    check_batch(dimension, queries, nq)
}

/// Validate a contiguous vector batch against the index dimensionality.
pub(crate) fn check_batch(dimension: usize, vectors: &[f32], n: usize) -> Result<()> {
    if vectors.len() != n * dimension {
        return Err(Error::DimensionMismatch {
            expected: n * dimension,
            actual: vectors.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_result_rows() {
        let r = SearchResult {
            distances: vec![0.1, 0.2, 0.3, 0.4],
            ids: vec![1, 2, 3, 4],
            k: 2,
        };
        assert_eq!(r.row(1), (&[0.3f32, 0.4][..], &[3i64, 4][..]));
    }

    #[test]
    fn range_result_rows() {
        let r = RangeSearchResult {
            lims: vec![0, 1, 3],
            ids: vec![5, 6, 7],
            distances: vec![0.5, 0.6, 0.7],
        };
        assert_eq!(r.row(0).0, &[5i64][..]);
        assert_eq!(r.row(1).0, &[6i64, 7][..]);
        assert_eq!(r.len(), 3);
    }

    #[test]
    fn zero_k_is_rejected() {
        assert!(check_search_args(4, &[0.0; 4], 1, 0).is_err());
    }

    #[test]
    fn bad_radius_is_rejected() {
        assert!(check_range_args(4, &[0.0; 4], 1, f32::NAN).is_err());
        assert!(check_range_args(4, &[0.0; 4], 1, -1.0).is_err());
        assert!(check_range_args(4, &[0.0; 4], 1, f32::INFINITY).is_err());
    }
}
