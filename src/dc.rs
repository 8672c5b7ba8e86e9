//! Distance computers: per-query evaluators over stored vectors or codes.
//!
//! A distance computer follows a two-phase protocol: bind a query with
//! [`DistanceComputer::set_query`], then evaluate any number of stored
//! entries. All mutable state (the bound query, lookup tables, decode
//! scratch) is owned by the computer, so the concurrency contract is
//! structural: one computer per in-flight query, never shared, reusable
//! across `set_query` calls to amortize table building.
//!
//! Two evaluation strategies exist:
//!
//! - **decompress**: decode the stored code and apply the metric directly.
//!   Always available; the correctness baseline.
//! - **lookup table**: on `set_query`, precompute one table per code slot
//!   (cost proportional to slots x alphabet size); evaluation then sums
//!   one table entry per slot, independent of the dimensionality.
//!
//! Codecs that cannot express a metric through tables must refuse LUT
//! construction ([`crate::Error::UnsupportedConfiguration`]) rather than
//! fall back silently — see [`crate::codec::Codec::lut_distance_computer`].

use crate::codec::rq::ResidualQuantizer;
use crate::codec::{pq::ProductQuantizer, Codec};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::simd;

/// Stateful per-query distance evaluator bound to one store.
pub trait DistanceComputer {
    /// Bind (or rebind) the query. Idempotent; validates dimensionality.
    fn set_query(&mut self, query: &[f32]) -> Result<()>;

    /// Distance from the bound query to the stored entry `id`.
    ///
    /// Fails with [`Error::IdOutOfRange`] for ids the store does not hold
    /// and [`Error::InvalidArgument`] when no query is bound.
    fn distance(&mut self, id: usize) -> Result<f32>;
}

/// Distance computer over directly addressable codes.
///
/// Adds evaluation from a caller-supplied code buffer, for standalone use
/// and for refinement paths that already hold the code in hand.
pub trait FlatCodesDistanceComputer: DistanceComputer {
    /// Distance from the bound query to a raw code.
    ///
    /// # Panics
    ///
    /// Panics if no query is bound or the code is shorter than the codec's
    /// code size.
    fn distance_to_code(&mut self, code: &[u8]) -> f32;
}

impl<T: DistanceComputer + ?Sized> DistanceComputer for Box<T> {
    fn set_query(&mut self, query: &[f32]) -> Result<()> {
        (**self).set_query(query)
    }

    fn distance(&mut self, id: usize) -> Result<f32> {
        (**self).distance(id)
    }
}

impl<T: FlatCodesDistanceComputer + ?Sized> FlatCodesDistanceComputer for Box<T> {
    fn distance_to_code(&mut self, code: &[u8]) -> f32 {
        (**self).distance_to_code(code)
    }
}

fn check_query_dim(expected: usize, query: &[f32]) -> Result<()> {
    if query.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: query.len(),
        });
    }
    Ok(())
}

fn no_query_bound() -> Error {
    Error::InvalidArgument("distance requested before set_query".to_string())
}

/// Exact distance computer over raw float storage.
pub struct FlatDistanceComputer<'a> {
    vectors: &'a [f32],
    dimension: usize,
    metric: Metric,
    query: Vec<f32>,
    bound: bool,
}

impl<'a> FlatDistanceComputer<'a> {
    /// Bind to `vectors` (SoA, `dimension` floats per entry).
    pub fn new(vectors: &'a [f32], dimension: usize, metric: Metric) -> Self {
        Self {
            vectors,
            dimension,
            metric,
            query: Vec::new(),
            bound: false,
        }
    }

    fn ntotal(&self) -> usize {
        self.vectors.len() / self.dimension
    }
}

impl DistanceComputer for FlatDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> Result<()> {
        check_query_dim(self.dimension, query)?;
        self.query.clear();
        self.query.extend_from_slice(query);
        self.bound = true;
        Ok(())
    }

    fn distance(&mut self, id: usize) -> Result<f32> {
        if !self.bound {
            return Err(no_query_bound());
        }
        if id >= self.ntotal() {
            return Err(Error::IdOutOfRange {
                id,
                ntotal: self.ntotal(),
            });
        }
        let v = &self.vectors[id * self.dimension..(id + 1) * self.dimension];
        Ok(self.metric.distance(&self.query, v))
    }
}

/// Decompress-path distance computer: decode, then measure.
pub struct DecodeDistanceComputer<'a, C: Codec> {
    codec: &'a C,
    codes: &'a [u8],
    metric: Metric,
    query: Vec<f32>,
    scratch: Vec<f32>,
    bound: bool,
}

impl<'a, C: Codec> DecodeDistanceComputer<'a, C> {
    /// Bind to `codes` (contiguous, `codec.code_size()` bytes per entry).
    pub fn new(codec: &'a C, codes: &'a [u8], metric: Metric) -> Self {
        let scratch = vec![0.0f32; codec.dimension()];
        Self {
            codec,
            codes,
            metric,
            query: Vec::new(),
            scratch,
            bound: false,
        }
    }

    fn ntotal(&self) -> usize {
        self.codes.len() / self.codec.code_size()
    }
}

impl<C: Codec> DistanceComputer for DecodeDistanceComputer<'_, C> {
    fn set_query(&mut self, query: &[f32]) -> Result<()> {
        check_query_dim(self.codec.dimension(), query)?;
        self.query.clear();
        self.query.extend_from_slice(query);
        self.bound = true;
        Ok(())
    }

    fn distance(&mut self, id: usize) -> Result<f32> {
        if !self.bound {
            return Err(no_query_bound());
        }
        if id >= self.ntotal() {
            return Err(Error::IdOutOfRange {
                id,
                ntotal: self.ntotal(),
            });
        }
        let size = self.codec.code_size();
        let code = &self.codes[id * size..(id + 1) * size];
        self.codec.decode_into(code, &mut self.scratch);
        Ok(self.metric.distance(&self.query, &self.scratch))
    }
}

impl<C: Codec> FlatCodesDistanceComputer for DecodeDistanceComputer<'_, C> {
    fn distance_to_code(&mut self, code: &[u8]) -> f32 {
        assert!(self.bound, "distance_to_code before set_query");
        self.codec.decode_into(code, &mut self.scratch);
        self.metric.distance(&self.query, &self.scratch)
    }
}

/// Lookup-table distance computer for product quantization.
///
/// `set_query` builds one table of `ksub` partial distances per subspace;
/// evaluation sums one entry per subspace.
pub struct PqLutDistanceComputer<'a> {
    pq: &'a ProductQuantizer,
    codes: &'a [u8],
    metric: Metric,
    table: Vec<f32>,
    bound: bool,
}

impl<'a> PqLutDistanceComputer<'a> {
    pub(crate) fn new(pq: &'a ProductQuantizer, codes: &'a [u8], metric: Metric) -> Self {
        Self {
            pq,
            codes,
            metric,
            table: Vec::new(),
            bound: false,
        }
    }

    fn ntotal(&self) -> usize {
        self.codes.len() / self.pq.code_size()
    }
}

impl DistanceComputer for PqLutDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> Result<()> {
        check_query_dim(self.pq.dimension(), query)?;
        self.pq.compute_lut(query, self.metric, &mut self.table);
        self.bound = true;
        Ok(())
    }

    fn distance(&mut self, id: usize) -> Result<f32> {
        if !self.bound {
            return Err(no_query_bound());
        }
        if id >= self.ntotal() {
            return Err(Error::IdOutOfRange {
                id,
                ntotal: self.ntotal(),
            });
        }
        let size = self.pq.code_size();
        Ok(self
            .pq
            .distance_with_lut(&self.table, &self.codes[id * size..(id + 1) * size]))
    }
}

impl FlatCodesDistanceComputer for PqLutDistanceComputer<'_> {
    fn distance_to_code(&mut self, code: &[u8]) -> f32 {
        assert!(self.bound, "distance_to_code before set_query");
        self.pq.distance_with_lut(&self.table, code)
    }
}

/// Lookup-table distance computer for residual quantization with a norm
/// channel.
///
/// Construction is only valid when the quantizer supports the LUT form
/// under the metric; [`crate::codec::Codec::lut_distance_computer`]
/// enforces that.
pub struct RqLutDistanceComputer<'a> {
    rq: &'a ResidualQuantizer,
    codes: &'a [u8],
    metric: Metric,
    table: Vec<f32>,
    q_norm2: f32,
    bound: bool,
}

impl<'a> RqLutDistanceComputer<'a> {
    pub(crate) fn new(rq: &'a ResidualQuantizer, codes: &'a [u8], metric: Metric) -> Self {
        Self {
            rq,
            codes,
            metric,
            table: Vec::new(),
            q_norm2: 0.0,
            bound: false,
        }
    }

    fn ntotal(&self) -> usize {
        self.codes.len() / self.rq.code_size()
    }
}

impl DistanceComputer for RqLutDistanceComputer<'_> {
    fn set_query(&mut self, query: &[f32]) -> Result<()> {
        check_query_dim(self.rq.dimension(), query)?;
        self.rq.compute_lut(query, &mut self.table);
        self.q_norm2 = simd::dot(query, query);
        self.bound = true;
        Ok(())
    }

    fn distance(&mut self, id: usize) -> Result<f32> {
        if !self.bound {
            return Err(no_query_bound());
        }
        if id >= self.ntotal() {
            return Err(Error::IdOutOfRange {
                id,
                ntotal: self.ntotal(),
            });
        }
        let size = self.rq.code_size();
        Ok(self.rq.distance_with_lut(
            &self.table,
            self.q_norm2,
            self.metric,
            &self.codes[id * size..(id + 1) * size],
        ))
    }
}

impl FlatCodesDistanceComputer for RqLutDistanceComputer<'_> {
    fn distance_to_code(&mut self, code: &[u8]) -> f32 {
        assert!(self.bound, "distance_to_code before set_query");
        self.rq
            .distance_with_lut(&self.table, self.q_norm2, self.metric, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_distance_before_set_query_fails() {
        let vectors = [0.0f32, 1.0, 2.0, 3.0];
        let mut dc = FlatDistanceComputer::new(&vectors, 2, Metric::L2);
        assert!(matches!(dc.distance(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn flat_id_out_of_range() {
        let vectors = [0.0f32, 1.0, 2.0, 3.0];
        let mut dc = FlatDistanceComputer::new(&vectors, 2, Metric::L2);
        dc.set_query(&[0.0, 0.0]).unwrap();
        assert_eq!(
            dc.distance(2).unwrap_err(),
            Error::IdOutOfRange { id: 2, ntotal: 2 }
        );
    }

    #[test]
    fn flat_set_query_is_idempotent() {
        let vectors = [0.0f32, 0.0, 3.0, 4.0];
        let mut dc = FlatDistanceComputer::new(&vectors, 2, Metric::L2);
        dc.set_query(&[0.0, 0.0]).unwrap();
        let d1 = dc.distance(1).unwrap();
        dc.set_query(&[0.0, 0.0]).unwrap();
        let d2 = dc.distance(1).unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1, 25.0);
    }

    #[test]
    fn flat_rejects_wrong_query_dimension() {
        let vectors = [0.0f32; 4];
        let mut dc = FlatDistanceComputer::new(&vectors, 2, Metric::L2);
        assert!(matches!(
            dc.set_query(&[0.0; 3]),
            Err(Error::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn flat_inner_product_direction() {
        let vectors = [1.0f32, 0.0, 0.0, 1.0];
        let mut dc = FlatDistanceComputer::new(&vectors, 2, Metric::InnerProduct);
        dc.set_query(&[2.0, 0.0]).unwrap();
        let d0 = dc.distance(0).unwrap();
        let d1 = dc.distance(1).unwrap();
        assert!(Metric::InnerProduct.is_closer(d0, d1));
        assert_eq!(d0, 2.0);
        assert_eq!(d1, 0.0);
    }
}
