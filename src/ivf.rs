//! Inverted-file index over encoded vectors.
//!
//! A coarse k-means partitioner assigns every vector to one of `nlist`
//! inverted lists; search visits only the `nprobe` lists whose centroids
//! are closest to the query and scores their codes with the codec's
//! distance computer. This is the fast approximate "base index" side of a
//! refinement composition: its candidate-list breadth is the overridable
//! per-call parameter ([`IvfSearchParams`]).

use crate::codec::Codec;
use crate::dc::{DistanceComputer, FlatCodesDistanceComputer};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::index::{
    check_batch, check_range_args, check_search_args, Index, RangeSearchResult, SearchResult,
    SENTINEL_ID,
};
use crate::kmeans::KMeans;
use crate::simd;
use serde::{Deserialize, Serialize};

/// Per-call override for IVF search, distinct from the refinement layer's
/// parameters. `None` at the call site means "use the index's stored
/// default".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfSearchParams {
    /// Number of inverted lists to visit.
    pub nprobe: usize,
}

impl IvfSearchParams {
    /// Params probing `nprobe` lists.
    pub fn new(nprobe: usize) -> Self {
        Self { nprobe }
    }
}

/// One inverted list: ids and codes in insertion order.
#[derive(Debug, Clone, Default)]
struct IvfList {
    ids: Vec<i64>,
    codes: Vec<u8>,
}

/// Inverted-file index storing one code per vector.
#[derive(Debug, Clone)]
pub struct IvfIndex<C: Codec> {
    codec: C,
    metric: Metric,
    nlist: usize,
    /// Stored default probe breadth; per-call overrides never modify it.
    nprobe: usize,
    seed: u64,
    /// Coarse centroids (nlist x dimension); empty until trained.
    centroids: Vec<Vec<f32>>,
    lists: Vec<IvfList>,
    ntotal: usize,
}

impl<C: Codec> IvfIndex<C> {
    /// Create an IVF index with `nlist` inverted lists around `codec`.
    pub fn new(codec: C, metric: Metric, nlist: usize) -> Result<Self> {
        if nlist == 0 {
            return Err(Error::InvalidArgument(
                "nlist must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            codec,
            metric,
            nlist,
            nprobe: 1,
            seed: 0x6a78,
            centroids: Vec::new(),
            lists: Vec::new(),
            ntotal: 0,
        })
    }

    /// Configure the stored default probe breadth.
    #[must_use]
    pub fn with_nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = nprobe.max(1);
        self
    }

    /// Configure the coarse-training seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Stored default probe breadth.
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Number of inverted lists.
    pub fn nlist(&self) -> usize {
        self.nlist
    }

    /// Nearest coarse centroid (squared L2; the partitioner's own space).
    fn assign(&self, vector: &[f32]) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let dist = simd::l2_distance_squared(vector, centroid);
            if dist < best_dist {
                best_dist = dist;
                best = idx;
            }
        }
        best
    }

    /// Lists to visit for `query`, closest centroid first.
    fn probe_order(&self, query: &[f32], nprobe: usize) -> Vec<usize> {
        let mut order: Vec<(usize, f32)> = self
            .centroids
            .iter()
            .enumerate()
            .map(|(idx, centroid)| (idx, simd::l2_distance_squared(query, centroid)))
            .collect();
        order.sort_by(|a, b| a.1.total_cmp(&b.1));
        order.into_iter().take(nprobe).map(|(idx, _)| idx).collect()
    }

    fn resolve_nprobe(&self, params: Option<&IvfSearchParams>) -> usize {
        params
            .map(|p| p.nprobe)
            .unwrap_or(self.nprobe)
            .clamp(1, self.nlist)
    }

    /// Scan the probed lists for one query, in list-then-insertion order.
    fn scan_lists(
        &self,
        query: &[f32],
        nprobe: usize,
        mut visit: impl FnMut(i64, f32),
    ) -> Result<()> {
        let size = self.codec.code_size();
        let mut dc = self.codec.distance_computer(&[], self.metric)?;
        dc.set_query(query)?;
        for list_idx in self.probe_order(query, nprobe) {
            let list = &self.lists[list_idx];
            for (j, &id) in list.ids.iter().enumerate() {
                let code = &list.codes[j * size..(j + 1) * size];
                visit(id, dc.distance_to_code(code));
            }
        }
        Ok(())
    }
}

impl<C: Codec> Index for IvfIndex<C> {
    type SearchParams = IvfSearchParams;

    fn dimension(&self) -> usize {
        self.codec.dimension()
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn is_trained(&self) -> bool {
        !self.centroids.is_empty() && self.codec.is_trained()
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        let d = self.codec.dimension();
        check_batch(d, vectors, n)?;
        if n < self.nlist {
            return Err(Error::InvalidArgument(format!(
                "need at least {} training vectors for {} lists, got {n}",
                self.nlist, self.nlist
            )));
        }

        let mut km = KMeans::new(d, self.nlist)?.with_seed(self.seed);
        km.fit(vectors, n)?;
        self.centroids = km.centroids().to_vec();
        self.lists = vec![IvfList::default(); self.nlist];
        self.codec.train(vectors, n)
    }

    fn add(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if !self.is_trained() {
            return Err(Error::NotTrained("add to untrained IVF index"));
        }
        let d = self.codec.dimension();
        check_batch(d, vectors, n)?;

        for i in 0..n {
            let vector = &vectors[i * d..(i + 1) * d];
            let list_idx = self.assign(vector);
            let code = self.codec.encode(vector)?;
            let list = &mut self.lists[list_idx];
            list.ids.push(self.ntotal as i64);
            list.codes.extend_from_slice(&code);
            self.ntotal += 1;
        }
        Ok(())
    }

    fn search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        params: Option<&IvfSearchParams>,
    ) -> Result<SearchResult> {
        let d = self.codec.dimension();
        check_search_args(d, queries, nq, k)?;
        if !self.is_trained() {
            return Err(Error::NotTrained("search on untrained IVF index"));
        }

        let nprobe = self.resolve_nprobe(params);
        let mut distances = Vec::with_capacity(nq * k);
        let mut ids = Vec::with_capacity(nq * k);

        for q in 0..nq {
            let query = &queries[q * d..(q + 1) * d];
            let mut candidates: Vec<(i64, f32)> = Vec::new();
            self.scan_lists(query, nprobe, |id, dist| candidates.push((id, dist)))?;
            // Stable: tied distances keep scan order, so results are
            // reproducible call to call.
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
        params: Option<&IvfSearchParams>,
    ) -> Result<RangeSearchResult> {
        let d = self.codec.dimension();
        check_range_args(d, queries, nq, radius)?;
        if !self.is_trained() {
            return Err(Error::NotTrained("range search on untrained IVF index"));
        }

        let nprobe = self.resolve_nprobe(params);
        let mut lims = Vec::with_capacity(nq + 1);
        let mut ids = Vec::new();
        let mut distances = Vec::new();
        lims.push(0);

        for q in 0..nq {
            let query = &queries[q * d..(q + 1) * d];
            self.scan_lists(query, nprobe, |id, dist| {
                if self.metric.within_radius(dist, radius) {
                    ids.push(id);
                    distances.push(dist);
                }
            })?;
            lims.push(ids.len());
        }

        Ok(RangeSearchResult {
            lims,
            ids,
            distances,
        })
    }
}
