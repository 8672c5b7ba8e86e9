//! Product Quantization (PQ).
//!
//! Splits a vector into `m` sub-vectors and quantizes each against its own
//! codebook of `2^nbits` codewords. Codes are bit-packed, so 6-bit
//! codewords cost 6 bits, not a byte.

use super::{pack_entries, BitReader, Codec};
use crate::dc::{FlatCodesDistanceComputer, PqLutDistanceComputer};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::kmeans::KMeans;
use crate::simd;
use serde::{Deserialize, Serialize};

/// Product quantizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    /// Number of subspaces (code slots).
    m: usize,
    /// Bits per code slot.
    nbits: usize,
    /// Codewords per subspace: `2^nbits`.
    ksub: usize,
    /// Sub-vector dimensionality: `dimension / m`.
    dsub: usize,
    /// Flat codebooks, `m * ksub * dsub` floats.
    codebooks: Vec<f32>,
    seed: u64,
    trained: bool,
}

impl ProductQuantizer {
    /// Create a new product quantizer with `m` subspaces of `nbits` each.
    pub fn new(dimension: usize, m: usize, nbits: usize) -> Result<Self> {
        if dimension == 0 || m == 0 {
            return Err(Error::InvalidArgument(
                "dimension and subspace count must be greater than 0".to_string(),
            ));
        }
        if dimension % m != 0 {
            return Err(Error::InvalidArgument(format!(
                "dimension {dimension} not divisible by {m} subspaces"
            )));
        }
        if nbits == 0 || nbits > 8 {
            return Err(Error::InvalidArgument(format!(
                "nbits must be in 1..=8, got {nbits}"
            )));
        }

        Ok(Self {
            dimension,
            m,
            nbits,
            ksub: 1 << nbits,
            dsub: dimension / m,
            codebooks: Vec::new(),
            seed: 0x6a78,
            trained: false,
        })
    }

    /// Configure the training seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of subspaces.
    pub fn num_subspaces(&self) -> usize {
        self.m
    }

    /// Bits per code slot.
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Codewords per subspace.
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    #[inline]
    fn centroid(&self, subspace: usize, code: usize) -> &[f32] {
        let start = (subspace * self.ksub + code) * self.dsub;
        &self.codebooks[start..start + self.dsub]
    }

    /// Build the per-query lookup table: `m * ksub` partial distances.
    ///
    /// Layout: `table[subspace * ksub + code]`. For L2 each entry is the
    /// squared distance from the query sub-vector to the codeword; for
    /// inner product it is the partial dot product.
    pub(crate) fn compute_lut(&self, query: &[f32], metric: Metric, table: &mut Vec<f32>) {
        table.clear();
        table.reserve(self.m * self.ksub);
        for subspace in 0..self.m {
            let qsub = &query[subspace * self.dsub..(subspace + 1) * self.dsub];
            for code in 0..self.ksub {
                let c = self.centroid(subspace, code);
                table.push(match metric {
                    Metric::L2 => simd::l2_distance_squared(qsub, c),
                    Metric::InnerProduct => simd::dot(qsub, c),
                });
            }
        }
    }

    /// Sum one table entry per code slot.
    #[inline]
    pub(crate) fn distance_with_lut(&self, table: &[f32], code: &[u8]) -> f32 {
        let mut reader = BitReader::new(code);
        let mut total = 0.0f32;
        for subspace in 0..self.m {
            let c = reader.read(self.nbits) as usize;
            total += table[subspace * self.ksub + c];
        }
        total
    }
}

impl Codec for ProductQuantizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        (self.m * self.nbits + 7) / 8
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if vectors.len() < n * self.dimension {
            return Err(Error::InvalidArgument(
                "insufficient training data for the declared count".to_string(),
            ));
        }
        if n < self.ksub {
            return Err(Error::InvalidArgument(format!(
                "need at least {} training vectors for {}-bit codebooks, got {n}",
                self.ksub, self.nbits
            )));
        }

        self.codebooks = Vec::with_capacity(self.m * self.ksub * self.dsub);
        for subspace in 0..self.m {
            // Gather the sub-vector block for this subspace.
            let start_dim = subspace * self.dsub;
            let mut block = Vec::with_capacity(n * self.dsub);
            for i in 0..n {
                let v = &vectors[i * self.dimension..(i + 1) * self.dimension];
                block.extend_from_slice(&v[start_dim..start_dim + self.dsub]);
            }

            let mut km = KMeans::new(self.dsub, self.ksub)?
                .with_seed(self.seed.wrapping_add(subspace as u64));
            km.fit(&block, n)?;
            for centroid in km.centroids() {
                self.codebooks.extend_from_slice(centroid);
            }
        }

        self.trained = true;
        Ok(())
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(Error::NotTrained("product quantizer"));
        }
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut entries = Vec::with_capacity(self.m);
        for subspace in 0..self.m {
            let sub = &vector[subspace * self.dsub..(subspace + 1) * self.dsub];
            let mut best_code = 0usize;
            let mut best_dist = f32::INFINITY;
            for code in 0..self.ksub {
                let dist = simd::l2_distance_squared(sub, self.centroid(subspace, code));
                if dist < best_dist {
                    best_dist = dist;
                    best_code = code;
                }
            }
            entries.push(best_code as u32);
        }

        let mut out = Vec::with_capacity(self.code_size());
        pack_entries(&entries, self.nbits, &mut out);
        Ok(out)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        let mut reader = BitReader::new(code);
        for subspace in 0..self.m {
            let c = reader.read(self.nbits) as usize;
            out[subspace * self.dsub..(subspace + 1) * self.dsub]
                .copy_from_slice(self.centroid(subspace, c));
        }
    }

    fn supports_lut(&self, _metric: Metric) -> bool {
        true
    }

    fn distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>> {
        self.lut_distance_computer(codes, metric)
    }

    fn lut_distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>> {
        if !self.trained {
            return Err(Error::NotTrained("distance computer over untrained codec"));
        }
        Ok(Box::new(PqLutDistanceComputer::new(self, codes, metric)))
    }
}
