//! Flat-codes index: contiguous encoded storage over any codec.
//!
//! Codes are stored back to back and addressed by the dense id assigned at
//! insertion. Search scans every code with the codec's distance computer
//! (LUT path when the codec supports it under the index metric, decompress
//! path otherwise).

use crate::codec::Codec;
use crate::dc::{DistanceComputer, FlatCodesDistanceComputer};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::index::{
    check_batch, check_range_args, check_search_args, Index, RangeSearchResult, RefineSource,
    SearchResult, SENTINEL_ID,
};

/// Index storing one fixed-size code per vector.
#[derive(Debug, Clone)]
pub struct CodesIndex<C: Codec> {
    codec: C,
    metric: Metric,
    codes: Vec<u8>,
    ntotal: usize,
}

impl<C: Codec> CodesIndex<C> {
    /// Create an empty index around `codec`.
    pub fn new(codec: C, metric: Metric) -> Self {
        Self {
            codec,
            metric,
            codes: Vec::new(),
            ntotal: 0,
        }
    }

    /// The underlying codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Raw code bytes for `id`.
    pub fn code(&self, id: usize) -> &[u8] {
        let size = self.codec.code_size();
        &self.codes[id * size..(id + 1) * size]
    }

    /// A distance computer over this index's codes with the automatically
    /// selected evaluation path.
    pub fn codes_distance_computer(&self) -> Result<Box<dyn FlatCodesDistanceComputer + '_>> {
        self.codec.distance_computer(&self.codes, self.metric)
    }

    /// A distance computer that must use the lookup-table path; fails with
    /// [`Error::UnsupportedConfiguration`] when the codec has none under
    /// this metric.
    pub fn lut_distance_computer(&self) -> Result<Box<dyn FlatCodesDistanceComputer + '_>> {
        self.codec.lut_distance_computer(&self.codes, self.metric)
    }
}

impl<C: Codec> Index for CodesIndex<C> {
    type SearchParams = ();

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
        self.codec.is_trained()
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        check_batch(self.codec.dimension(), vectors, n)?;
        self.codec.train(vectors, n)
    }

    fn add(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if !self.codec.is_trained() {
            return Err(Error::NotTrained("add to untrained codes index"));
        }
        let d = self.codec.dimension();
        check_batch(d, vectors, n)?;

        self.codes.reserve(n * self.codec.code_size());
        for i in 0..n {
            let code = self.codec.encode(&vectors[i * d..(i + 1) * d])?;
            self.codes.extend_from_slice(&code);
        }
        self.ntotal += n;
        Ok(())
    }

    fn search(
        &self,
        queries: &[f32],
        nq: usize,
        k: usize,
        _params: Option<&()>,
    ) -> Result<SearchResult> {
        let d = self.codec.dimension();
        check_search_args(d, queries, nq, k)?;

        let mut dc = self.codes_distance_computer()?;
        let mut distances = Vec::with_capacity(nq * k);
        let mut ids = Vec::with_capacity(nq * k);

        for q in 0..nq {
            dc.set_query(&queries[q * d..(q + 1) * d])?;
            let mut candidates: Vec<(i64, f32)> = Vec::with_capacity(self.ntotal);
            for id in 0..self.ntotal {
                candidates.push((id as i64, dc.distance(id)?));
            }
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
        let d = self.codec.dimension();
        check_range_args(d, queries, nq, radius)?;

        let mut dc = self.codes_distance_computer()?;
        let mut lims = Vec::with_capacity(nq + 1);
        let mut ids = Vec::new();
        let mut distances = Vec::new();
        lims.push(0);

        for q in 0..nq {
            dc.set_query(&queries[q * d..(q + 1) * d])?;
            for id in 0..self.ntotal {
                let dist = dc.distance(id)?;
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

impl<C: Codec> RefineSource for CodesIndex<C> {
    fn distance_computer(&self) -> Result<Box<dyn DistanceComputer + '_>> {
        Ok(Box::new(self.codes_distance_computer()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sq::ScalarQuantizer;

    fn sample_data(d: usize, n: usize) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(31);
        (0..n * d).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn add_before_train_fails() {
        let sq = ScalarQuantizer::new(4, 8).unwrap();
        let mut index = CodesIndex::new(sq, Metric::L2);
        assert_eq!(
            index.add(&[0.0; 8], 2).unwrap_err(),
            Error::NotTrained("add to untrained codes index")
        );
    }

    #[test]
    fn search_matches_decoded_brute_force() {
        let d = 8;
        let n = 64;
        let data = sample_data(d, n);
        let sq = ScalarQuantizer::new(d, 8).unwrap();
        let mut index = CodesIndex::new(sq, Metric::L2);
        index.train(&data, n).unwrap();
        index.add(&data, n).unwrap();

        let query = &data[..d];
        let result = index.search(query, 1, 5, None).unwrap();

        // Recompute via explicit decode
        let mut expected: Vec<(i64, f32)> = (0..n)
            .map(|id| {
                let decoded = index.codec().decode(index.code(id));
                (id as i64, Metric::L2.distance(query, &decoded))
            })
            .collect();
        expected.sort_by(|a, b| a.1.total_cmp(&b.1));

        for (slot, &(id, dist)) in expected.iter().take(5).enumerate() {
            assert_eq!(result.row(0).1[slot], id);
            assert!((result.row(0).0[slot] - dist).abs() < 1e-6);
        }
    }

    #[test]
    fn ids_are_contiguous_across_adds() {
        let d = 4;
        let data = sample_data(d, 20);
        let sq = ScalarQuantizer::new(d, 8).unwrap();
        let mut index = CodesIndex::new(sq, Metric::L2);
        index.train(&data, 20).unwrap();
        index.add(&data[..10 * d], 10).unwrap();
        index.add(&data[10 * d..], 10).unwrap();
        assert_eq!(index.ntotal(), 20);
        // id 15 decodes the 16th vector added
        let decoded = index.codec().decode(index.code(15));
        let original = &data[15 * d..16 * d];
        for (a, b) in decoded.iter().zip(original.iter()) {
            assert!((a - b).abs() < 0.1);
        }
    }
}
