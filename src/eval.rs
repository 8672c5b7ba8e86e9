//! Synthetic datasets and recall measures for evaluating compositions.
//!
//! The dataset generator is deliberately clustered rather than uniform:
//! uniform random data in high dimension has near-constant pairwise
//! distances, which makes approximate-vs-exact comparisons degenerate.
//! Clustered Gaussian data keeps neighbor structure that quantizers can
//! actually lose, so recall differences are measurable.

use crate::distance::Metric;
use crate::flat::FlatIndex;
use crate::index::{Index, RangeSearchResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A seeded synthetic dataset: training sample, database, and queries.
#[derive(Debug, Clone)]
pub struct SyntheticDataset {
    dimension: usize,
    train: Vec<f32>,
    database: Vec<f32>,
    queries: Vec<f32>,
    nt: usize,
    nb: usize,
    nq: usize,
}

impl SyntheticDataset {
    /// Generate a clustered dataset with `nt` training, `nb` database and
    /// `nq` query vectors of `dimension` components each.
    pub fn new(dimension: usize, nt: usize, nb: usize, nq: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let n_clusters = 10.min(nt.max(1));

        let centers: Vec<Vec<f32>> = (0..n_clusters)
            .map(|_| (0..dimension).map(|_| rng.random::<f32>()).collect())
            .collect();

        let mut sample_set = |count: usize, rng: &mut StdRng| -> Vec<f32> {
            let mut out = Vec::with_capacity(count * dimension);
            for _ in 0..count {
                let center = &centers[rng.random_range(0..n_clusters)];
                for &c in center {
                    // Box-Muller for Gaussian noise around the center.
                    let u1: f32 = rng.random::<f32>().max(1e-12);
                    let u2: f32 = rng.random();
                    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos();
                    out.push(c + z * 0.15);
                }
            }
            out
        };

        let train = sample_set(nt, &mut rng);
        let database = sample_set(nb, &mut rng);
        let queries = sample_set(nq, &mut rng);

        Self {
            dimension,
            train,
            database,
            queries,
            nt,
            nb,
            nq,
        }
    }

    /// Vector dimensionality.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Training vectors, flat.
    pub fn train(&self) -> &[f32] {
        &self.train
    }

    /// Database vectors, flat.
    pub fn database(&self) -> &[f32] {
        &self.database
    }

    /// Query vectors, flat.
    pub fn queries(&self) -> &[f32] {
        &self.queries
    }

    /// Number of training vectors.
    pub fn nt(&self) -> usize {
        self.nt
    }

    /// Number of database vectors.
    pub fn nb(&self) -> usize {
        self.nb
    }

    /// Number of queries.
    pub fn nq(&self) -> usize {
        self.nq
    }

    /// One database vector.
    pub fn database_vector(&self, id: usize) -> &[f32] {
        &self.database[id * self.dimension..(id + 1) * self.dimension]
    }

    /// One query vector.
    pub fn query_vector(&self, q: usize) -> &[f32] {
        &self.queries[q * self.dimension..(q + 1) * self.dimension]
    }

    /// Exact top-k neighbor ids per query (row-major `nq x k`), computed
    /// by brute force under `metric`.
    pub fn ground_truth(&self, k: usize, metric: Metric) -> Vec<i64> {
        let mut flat = FlatIndex::new(self.dimension, metric);
        flat.add(&self.database, self.nb)
            .expect("dataset shapes are consistent");
        flat.search(&self.queries, self.nq, k, None)
            .expect("brute-force ground truth")
            .ids
    }

    /// An exact flat index over the database.
    pub fn flat_reference(&self, metric: Metric) -> FlatIndex {
        let mut flat = FlatIndex::new(self.dimension, metric);
        flat.add(&self.database, self.nb)
            .expect("dataset shapes are consistent");
        flat
    }
}

/// Mean fraction of ground-truth neighbors present in `ids`.
///
/// Both arrays are row-major `nq x k`; sentinel ids never match.
pub fn knn_intersection(ids: &[i64], ground_truth: &[i64], nq: usize, k: usize) -> f64 {
    assert_eq!(ids.len(), nq * k);
    assert_eq!(ground_truth.len(), nq * k);

    let mut hits = 0usize;
    for q in 0..nq {
        let row = &ids[q * k..(q + 1) * k];
        let gt = &ground_truth[q * k..(q + 1) * k];
        for &id in row {
            if id >= 0 && gt.contains(&id) {
                hits += 1;
            }
        }
    }
    hits as f64 / (nq * k) as f64
}

/// Precision and recall of `candidate` range results against `reference`,
/// measured over (query, id) pairs.
pub fn range_pr(reference: &RangeSearchResult, candidate: &RangeSearchResult) -> (f64, f64) {
    assert_eq!(reference.lims.len(), candidate.lims.len());
    let nq = reference.lims.len() - 1;

    let mut matched = 0usize;
    for q in 0..nq {
        let (ref_ids, _) = reference.row(q);
        let (cand_ids, _) = candidate.row(q);
        for id in cand_ids {
            if ref_ids.contains(id) {
                matched += 1;
            }
        }
    }

    let precision = if candidate.len() == 0 {
        1.0
    } else {
        matched as f64 / candidate.len() as f64
    };
    let recall = if reference.len() == 0 {
        1.0
    } else {
        matched as f64 / reference.len() as f64
    };
    (precision, recall)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_shapes_are_consistent() {
        let ds = SyntheticDataset::new(16, 100, 50, 10, 7);
        assert_eq!(ds.train().len(), 100 * 16);
        assert_eq!(ds.database().len(), 50 * 16);
        assert_eq!(ds.queries().len(), 10 * 16);
    }

    #[test]
    fn dataset_is_deterministic_per_seed() {
        let a = SyntheticDataset::new(8, 20, 20, 5, 3);
        let b = SyntheticDataset::new(8, 20, 20, 5, 3);
        assert_eq!(a.database(), b.database());
        assert_eq!(a.queries(), b.queries());
    }

    #[test]
    fn intersection_counts_overlap() {
        let ids = vec![0i64, 1, 2, 9];
        let gt = vec![2i64, 1, 7, 8];
        // Query 0: {0,1} vs {2,1} -> 1 hit; query 1: {2,9} vs {7,8} -> 0.
        let inter = knn_intersection(&ids, &gt, 2, 2);
        assert!((inter - 0.25).abs() < 1e-12);
    }

    #[test]
    fn intersection_ignores_sentinels() {
        let ids = vec![-1i64, -1];
        let gt = vec![0i64, 1];
        assert_eq!(knn_intersection(&ids, &gt, 1, 2), 0.0);
    }

    #[test]
    fn range_pr_identical_results() {
        let r = RangeSearchResult {
            lims: vec![0, 2],
            ids: vec![1, 2],
            distances: vec![0.1, 0.2],
        };
        let (p, rec) = range_pr(&r, &r.clone());
        assert_eq!(p, 1.0);
        assert_eq!(rec, 1.0);
    }
}
