//! Refinement composition: re-rank a fast index's candidates with a
//! higher-fidelity one.
//!
//! [`RefineIndex`] pairs a base index (fast, approximate) with a
//! refinement index (exact or less approximate) holding the same vectors
//! under the same ids. Top-k search over-fetches `ceil(k * k_factor)`
//! candidates from the base, re-scores every valid candidate with the
//! refinement index's distance computer, re-sorts and truncates to `k`.
//!
//! Per-call configuration travels in an immutable [`RefineSearchParams`]
//! value; the composed index's own stored `k_factor` is only ever read as
//! the fallback default, never written through, so concurrent callers can
//! carry different overrides safely.

use crate::dc::DistanceComputer;
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::index::{
    check_range_args, check_search_args, Index, RangeSearchResult, RefineSource, SearchResult,
    SENTINEL_ID,
};

/// Immutable per-call configuration for a refined search.
///
/// `base_params` is forwarded verbatim to the base index's own
/// parameter-override mechanism; `None` lets the base index use its stored
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct RefineSearchParams<P> {
    /// Over-fetch multiplier; `None` falls back to the composed index's
    /// stored default.
    pub k_factor: Option<f32>,
    /// Opaque configuration for the base index.
    pub base_params: Option<P>,
}

impl<P> RefineSearchParams<P> {
    /// Params overriding only the k-factor.
    pub fn with_k_factor(k_factor: f32) -> Self {
        Self {
            k_factor: Some(k_factor),
            base_params: None,
        }
    }

    /// Params forwarding `base_params` to the base index.
    pub fn with_base_params(base_params: P) -> Self {
        Self {
            k_factor: None,
            base_params: Some(base_params),
        }
    }

    /// Set the k-factor override.
    #[must_use]
    pub fn k_factor(mut self, k_factor: f32) -> Self {
        self.k_factor = Some(k_factor);
        self
    }
}

/// Composition of a base index and a refinement index.
///
/// The refinement index must hold the same vectors, in the same id order,
/// as the base index. Driving both through this composer's `train`/`add`
/// maintains that invariant structurally; populating them separately makes
/// it the caller's responsibility. A mismatched id surfaces as
/// [`Error::IdOutOfRange`] where detectable.
#[derive(Debug, Clone)]
pub struct RefineIndex<B, R> {
    base: B,
    refine: R,
    /// Persistent default over-fetch multiplier. Per-call overrides are
    /// resolved against this but never written back.
    k_factor: f32,
}

impl<B, R> RefineIndex<B, R>
where
    B: Index,
    R: Index + RefineSource,
{
    /// Compose `base` with `refine`. Both must agree on dimensionality and
    /// metric.
    pub fn new(base: B, refine: R) -> Result<Self> {
        if base.dimension() != refine.dimension() {
            return Err(Error::InvalidArgument(format!(
                "base dimension {} != refinement dimension {}",
                base.dimension(),
                refine.dimension()
            )));
        }
        if base.metric() != refine.metric() {
            return Err(Error::InvalidArgument(
                "base and refinement indexes use different metrics".to_string(),
            ));
        }
        Ok(Self {
            base,
            refine,
            k_factor: 1.0,
        })
    }

    /// Set the stored default k-factor.
    pub fn set_k_factor(&mut self, k_factor: f32) -> Result<()> {
        check_k_factor(k_factor)?;
        self.k_factor = k_factor;
        Ok(())
    }

    /// The stored default k-factor.
    pub fn k_factor(&self) -> f32 {
        self.k_factor
    }

    /// The base index.
    pub fn base(&self) -> &B {
        &self.base
    }

    /// The refinement index.
    pub fn refine(&self) -> &R {
        &self.refine
    }

    fn resolve_k_factor(&self, params: Option<&RefineSearchParams<B::SearchParams>>) -> Result<f32> {
        match params.and_then(|p| p.k_factor) {
            Some(k_factor) => {
                check_k_factor(k_factor)?;
                Ok(k_factor)
            }
            None => Ok(self.k_factor),
        }
    }
}

fn check_k_factor(k_factor: f32) -> Result<()> {
    if !k_factor.is_finite() || k_factor < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "k_factor must be finite and non-negative, got {k_factor}"
        )));
    }
    Ok(())
}

impl<B, R> Index for RefineIndex<B, R>
where
    B: Index,
    R: Index + RefineSource,
{
    type SearchParams = RefineSearchParams<B::SearchParams>;

    fn dimension(&self) -> usize {
        self.base.dimension()
    }

    fn metric(&self) -> Metric {
        self.base.metric()
    }

    fn ntotal(&self) -> usize {
        self.base.ntotal()
    }

    fn is_trained(&self) -> bool {
        self.base.is_trained() && self.refine.is_trained()
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        self.base.train(vectors, n)?;
        self.refine.train(vectors, n)
    }

    fn add(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        self.base.add(vectors, n)?;
        self.refine.add(vectors, n)
    }

    fn search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        params: Option<&Self::SearchParams>,
    ) -> Result<SearchResult> {
        let d = self.dimension();
        check_search_args(d, queries, nq, k)?;

        let k_factor = self.resolve_k_factor(params)?;
        // Over-fetch, clamped so a narrowing factor can never starve the
        // requested result count.
        let k_base = ((k as f32 * k_factor).ceil() as usize).max(k);
        let base_params = params.and_then(|p| p.base_params.as_ref());
        let base_result = self.base.search(queries, nq, k_base, base_params)?;

        let metric = self.metric();
        let mut dc = self.refine.distance_computer()?;
        let mut distances = Vec::with_capacity(nq * k);
        let mut ids = Vec::with_capacity(nq * k);

        for q in 0..nq {
            dc.set_query(&queries[q * d..(q + 1) * d])?;
            let (_, base_ids) = base_result.row(q);

            let mut candidates: Vec<(i64, f32)> = Vec::with_capacity(k_base);
            for &id in base_ids {
                if id == SENTINEL_ID {
                    continue;
                }
                candidates.push((id, dc.distance(id as usize)?));
            }
            // Stable sort: tied refined distances keep the base index's
            // candidate order.
            candidates.sort_by(|a, b| metric.cmp_closest_first(a.1, b.1));

            for slot in 0..k {
                match candidates.get(slot) {
                    Some(&(id, dist)) => {
                        ids.push(id);
                        distances.push(dist);
                    }
                    None => {
                        ids.push(SENTINEL_ID);
                        distances.push(metric.worst());
                    }
                }
            }
        }

        Ok(SearchResult { distances, ids, k })
    }

    /// Range search with refined distances.
    ///
    /// Membership is the base index's decision: the refined result keeps
    /// exactly the (query, id) pairs the base returned, and only the
    /// reported distances are replaced by re-scored values. This asymmetry
    /// with top-k search (where refinement does reorder and drop
    /// candidates) is intentional: the radius semantics belong to the
    /// index that owns the range query, refinement only sharpens the
    /// reported metric values.
    fn range_search(
        &self,
        queries: &[f32],
        nq: usize,
        radius: f32,
        params: Option<&Self::SearchParams>,
    ) -> Result<RangeSearchResult> {
        let d = self.dimension();
        check_range_args(d, queries, nq, radius)?;

        let base_params = params.and_then(|p| p.base_params.as_ref());
        let mut result = self
            .base
            .range_search(queries, nq, radius, base_params)?;

        let mut dc = self.refine.distance_computer()?;
        for q in 0..nq {
            dc.set_query(&queries[q * d..(q + 1) * d])?;
            for i in result.lims[q]..result.lims[q + 1] {
                result.distances[i] = dc.distance(result.ids[i] as usize)?;
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flat::FlatIndex;

    fn sample_data(d: usize, n: usize) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(61);
        (0..n * d).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn rejects_mismatched_members() {
        let base = FlatIndex::new(4, Metric::L2);
        let refine = FlatIndex::new(8, Metric::L2);
        assert!(RefineIndex::new(base, refine).is_err());

        let base = FlatIndex::new(4, Metric::L2);
        let refine = FlatIndex::new(4, Metric::InnerProduct);
        assert!(RefineIndex::new(base, refine).is_err());
    }

    #[test]
    fn rejects_negative_k_factor() {
        let base = FlatIndex::new(4, Metric::L2);
        let refine = FlatIndex::new(4, Metric::L2);
        let mut index = RefineIndex::new(base, refine).unwrap();
        assert!(index.set_k_factor(-1.0).is_err());
        assert!(index.set_k_factor(f32::NAN).is_err());

        index.add(&sample_data(4, 8), 8).unwrap();
        let params = RefineSearchParams::with_k_factor(-2.0);
        assert!(matches!(
            index.search(&[0.0; 4], 1, 2, Some(&params)),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn flat_over_flat_matches_exact_search() {
        let d = 8;
        let n = 50;
        let data = sample_data(d, n);

        let mut composed =
            RefineIndex::new(FlatIndex::new(d, Metric::L2), FlatIndex::new(d, Metric::L2))
                .unwrap();
        composed.add(&data, n).unwrap();

        let mut exact = FlatIndex::new(d, Metric::L2);
        exact.add(&data, n).unwrap();

        let queries = &data[..3 * d];
        let refined = composed.search(queries, 3, 5, None).unwrap();
        let reference = exact.search(queries, 3, 5, None).unwrap();
        assert_eq!(refined.ids, reference.ids);
        assert_eq!(refined.distances, reference.distances);
    }

    #[test]
    fn narrowing_k_factor_still_fills_k() {
        let d = 4;
        let n = 32;
        let data = sample_data(d, n);
        let mut index =
            RefineIndex::new(FlatIndex::new(d, Metric::L2), FlatIndex::new(d, Metric::L2))
                .unwrap();
        index.add(&data, n).unwrap();

        let params = RefineSearchParams::with_k_factor(0.5);
        let result = index.search(&data[..d], 1, 10, Some(&params)).unwrap();
        assert!(result.row(0).1.iter().all(|&id| id >= 0));
    }

    #[test]
    fn add_keeps_both_members_aligned() {
        let d = 4;
        let n = 16;
        let data = sample_data(d, n);
        let mut index =
            RefineIndex::new(FlatIndex::new(d, Metric::L2), FlatIndex::new(d, Metric::L2))
                .unwrap();
        index.add(&data, n).unwrap();
        assert_eq!(index.base().ntotal(), n);
        assert_eq!(index.refine().ntotal(), n);
    }
}
