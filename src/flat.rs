//! Exact flat index over raw float storage.
//!
//! Stores vectors uncompressed and searches by brute force. Serves three
//! roles: ground-truth oracle in evaluations, exact refinement index, and
//! the simplest [`Index`] implementation.

use crate::dc::{DistanceComputer, FlatDistanceComputer};
use crate::distance::Metric;
use crate::error::Result;
use crate::index::{
    check_batch, check_range_args, check_search_args, Index, RangeSearchResult, RefineSource,
    SearchResult, SENTINEL_ID,
};

/// Exact (brute-force) index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    /// SoA storage, `dimension` floats per entry.
    vectors: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty flat index.
    pub fn new(dimension: usize, metric: Metric) -> Self {
        Self {
            dimension,
            metric,
            vectors: Vec::new(),
        }
    }

    /// Stored vector for `id`.
    pub fn vector(&self, id: usize) -> &[f32] {
        &self.vectors[id * self.dimension..(id + 1) * self.dimension]
    }

    /// All stored vectors, flat.
    pub fn vectors(&self) -> &[f32] {
        &self.vectors
    }
}

impl Index for FlatIndex {
    type SearchParams = ();

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.vectors.len() / self.dimension
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        // Flat storage needs no training; validate the batch anyway so
        // misuse surfaces at the same place as for other indexes.
        check_batch(self.dimension, vectors, n)
    }

    fn add(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        check_batch(self.dimension, vectors, n)?;
        self.vectors.extend_from_slice(vectors);
        Ok(())
    }

    fn search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        _params: Option<&()>,
    ) -> Result<SearchResult> {
        check_search_args(self.dimension, queries, nq, k)?;

        let ntotal = self.ntotal();
        let mut distances = Vec::with_capacity(nq * k);
        let mut ids = Vec::with_capacity(nq * k);

        for q in 0..nq {
            let query = &queries[q * self.dimension..(q + 1) * self.dimension];
            let mut candidates: Vec<(i64, f32)> = (0..ntotal)
                .map(|id| (id as i64, self.metric.distance(query, self.vector(id))))
                .collect();
            // Stable: ties keep ascending-id order.
            candidates.sort_by(|a, b| self.metric.cmp_closest_first(a.1, b.1));

            for slot in 0..k {
                match candidates.get(slot) {
                    Some(&(id, dist)) => {
                        ids.push(id);
                        distances.push(dist);
                    }
                    None => {
                        ids.push(SENTINEL_ID);
                        distances.push(self.metric.worst());
                    }
                }
            }
        }

        Ok(SearchResult { distances, ids, k })
    }

    fn range_search(
        &self,
        queries: &[f32],
        nq: usize,
        radius: f32,
        _params: Option<&()>,
    ) -> Result<RangeSearchResult> {
        check_range_args(self.dimension, queries, nq, radius)?;

        let ntotal = self.ntotal();
        let mut lims = Vec::with_capacity(nq + 1);
        let mut ids = Vec::new();
        let mut distances = Vec::new();
        lims.push(0);

        for q in 0..nq {
            let query = &queries[q * self.dimension..(q + 1) * self.dimension];
            for id in 0..ntotal {
                let dist = self.metric.distance(query, self.vector(id));
                if self.metric.within_radius(dist, radius) {
                    ids.push(id as i64);
                    distances.push(dist);
                }
            }
            lims.push(ids.len());
        }

        Ok(RangeSearchResult {
            lims,
            ids,
            distances,
        })
    }
}

impl RefineSource for FlatIndex {
    fn distance_computer(&self) -> Result<Box<dyn DistanceComputer + '_>> {
        Ok(Box::new(FlatDistanceComputer::new(
            &self.vectors,
            self.dimension,
            self.metric,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_index(metric: Metric) -> FlatIndex {
        let mut index = FlatIndex::new(2, metric);
        index
            .add(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 2.0], 4)
            .unwrap();
        index
    }

    #[test]
    fn search_finds_nearest_first() {
        let index = small_index(Metric::L2);
        let result = index.search(&[0.1, 0.0], 1, 2, None).unwrap();
        assert_eq!(result.row(0).1, &[0, 1]);
    }

    #[test]
    fn search_pads_with_sentinels() {
        let index = small_index(Metric::L2);
        let result = index.search(&[0.0, 0.0], 1, 6, None).unwrap();
        let (dists, ids) = result.row(0);
        assert_eq!(ids[4], SENTINEL_ID);
        assert_eq!(ids[5], SENTINEL_ID);
        assert_eq!(dists[5], f32::INFINITY);
    }

    #[test]
    fn inner_product_ranks_descending() {
        let index = small_index(Metric::InnerProduct);
        let result = index.search(&[1.0, 1.0], 1, 4, None).unwrap();
        // (2,2) has the largest dot product.
        assert_eq!(result.row(0).1[0], 3);
        let dists = result.row(0).0;
        assert!(dists.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn range_search_respects_radius() {
        let index = small_index(Metric::L2);
        let result = index.range_search(&[0.0, 0.0], 1, 1.5, None).unwrap();
        let (ids, dists) = result.row(0);
        assert_eq!(ids, &[0, 1, 2]);
        assert!(dists.iter().all(|&d| d < 1.5));
    }

    #[test]
    fn add_rejects_wrong_batch_size() {
        let mut index = FlatIndex::new(3, Metric::L2);
        assert!(index.add(&[0.0; 7], 2).is_err());
    }
}
