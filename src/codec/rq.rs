//! Residual (additive) quantization.
//!
//! A vector is represented as the sum of one codeword per stage; each
//! stage's codebook is trained on the residuals the previous stages leave
//! behind, and encoding greedily picks the nearest codeword stage by stage.
//!
//! ## Norm channel and the LUT path
//!
//! Unlike PQ, additive codewords overlap in all dimensions, so the
//! lookup-table trick only recovers the cross term `<q, decode(x)>`. Under
//! inner product that is the whole distance; under L2 the code must also
//! carry `||decode(x)||^2`, which [`NormMode::QInt8`] stores as one extra
//! quantized byte per code. Without the norm channel there is no valid L2
//! LUT formulation and construction of a LUT computer fails.

use super::{pack_entries, BitReader, Codec};
use crate::dc::{FlatCodesDistanceComputer, RqLutDistanceComputer};
use crate::distance::Metric;
use crate::error::{Error, Result};
use crate::kmeans::KMeans;
use crate::simd;
use serde::{Deserialize, Serialize};

/// How the squared reconstruction norm is carried in each code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NormMode {
    /// No norm channel; only the decompress evaluation path is available.
    None,
    /// Append one byte quantizing `||decode(x)||^2` over a trained range,
    /// enabling lookup-table evaluation under both metrics.
    QInt8,
}

/// Residual quantizer with `m` stages of `nbits` each.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualQuantizer {
    dimension: usize,
    /// Number of stages (code slots).
    m: usize,
    nbits: usize,
    ksub: usize,
    /// Flat codebooks, `m * ksub * dimension` floats.
    codebooks: Vec<f32>,
    norm_mode: NormMode,
    norm_min: f32,
    norm_scale: f32,
    seed: u64,
    trained: bool,
}

impl ResidualQuantizer {
    /// Create a residual quantizer with `m` stages of `nbits` each.
    pub fn new(dimension: usize, m: usize, nbits: usize, norm_mode: NormMode) -> Result<Self> {
        if dimension == 0 || m == 0 {
            return Err(Error::InvalidArgument(
                "dimension and stage count must be greater than 0".to_string(),
            ));
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
            codebooks: Vec::new(),
            norm_mode,
            norm_min: 0.0,
            norm_scale: 0.0,
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

    /// Number of stages.
    pub fn num_stages(&self) -> usize {
        self.m
    }

    /// Bits per code slot.
    pub fn nbits(&self) -> usize {
        self.nbits
    }

    /// Codewords per stage.
    pub fn ksub(&self) -> usize {
        self.ksub
    }

    /// Norm channel configuration.
    pub fn norm_mode(&self) -> NormMode {
        self.norm_mode
    }

    #[inline]
    fn centroid(&self, stage: usize, code: usize) -> &[f32] {
        let start = (stage * self.ksub + code) * self.dimension;
        &self.codebooks[start..start + self.dimension]
    }

    fn packed_size(&self) -> usize {
        (self.m * self.nbits + 7) / 8
    }

    /// Greedily pick the codeword per stage, mutating `residual` in place.
    /// Returns the selected entries.
    fn assign(&self, residual: &mut [f32]) -> Vec<u32> {
        let mut entries = Vec::with_capacity(self.m);
        for stage in 0..self.m {
            let mut best_code = 0usize;
            let mut best_dist = f32::INFINITY;
            for code in 0..self.ksub {
                let dist = simd::l2_distance_squared(residual, self.centroid(stage, code));
                if dist < best_dist {
                    best_dist = dist;
                    best_code = code;
                }
            }
            let c = self.centroid(stage, best_code);
            for (r, &cv) in residual.iter_mut().zip(c.iter()) {
                *r -= cv;
            }
            entries.push(best_code as u32);
        }
        entries
    }

    /// Dequantize the norm byte of a code.
    #[inline]
    pub(crate) fn decode_norm(&self, code: &[u8]) -> f32 {
        debug_assert_eq!(self.norm_mode, NormMode::QInt8);
        let byte = code[self.packed_size()] as f32;
        self.norm_min + byte * self.norm_scale
    }

    /// Build the per-query lookup table: `m * ksub` partial dot products
    /// `<q, c>`, plus the query's squared norm for the L2 form.
    pub(crate) fn compute_lut(&self, query: &[f32], table: &mut Vec<f32>) {
        table.clear();
        table.reserve(self.m * self.ksub);
        for stage in 0..self.m {
            for code in 0..self.ksub {
                table.push(simd::dot(query, self.centroid(stage, code)));
            }
        }
    }

    /// Evaluate a code against a prebuilt table.
    ///
    /// `q_norm2` is `||q||^2`, only used under L2.
    #[inline]
    pub(crate) fn distance_with_lut(
        &self,
        table: &[f32],
        q_norm2: f32,
        metric: Metric,
        code: &[u8],
    ) -> f32 {
        let mut reader = BitReader::new(&code[..self.packed_size()]);
        let mut cross = 0.0f32;
        for stage in 0..self.m {
            let c = reader.read(self.nbits) as usize;
            cross += table[stage * self.ksub + c];
        }
        match metric {
            Metric::InnerProduct => cross,
            Metric::L2 => q_norm2 - 2.0 * cross + self.decode_norm(code),
        }
    }
}

impl Codec for ResidualQuantizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        let norm_bytes = match self.norm_mode {
            NormMode::None => 0,
            NormMode::QInt8 => 1,
        };
        self.packed_size() + norm_bytes
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

        // Train each stage on the residuals of the previous stages.
        let mut residuals = vectors[..n * self.dimension].to_vec();
        self.codebooks = Vec::with_capacity(self.m * self.ksub * self.dimension);
        for stage in 0..self.m {
            let mut km = KMeans::new(self.dimension, self.ksub)?
                .with_seed(self.seed.wrapping_add(stage as u64));
            km.fit(&residuals, n)?;
            let assignments = km.assign_clusters(&residuals, n);
            for centroid in km.centroids() {
                self.codebooks.extend_from_slice(centroid);
            }
            for (i, &cluster) in assignments.iter().enumerate() {
                let r = &mut residuals[i * self.dimension..(i + 1) * self.dimension];
                for (x, &cv) in r.iter_mut().zip(km.centroids()[cluster].iter()) {
                    *x -= cv;
                }
            }
        }
        self.trained = true;

        if self.norm_mode == NormMode::QInt8 {
            // Norm range over the training set's reconstructions.
            let mut norm_min = f32::INFINITY;
            let mut norm_max = f32::NEG_INFINITY;
            let mut recon = vec![0.0f32; self.dimension];
            for i in 0..n {
                let v = &vectors[i * self.dimension..(i + 1) * self.dimension];
                let mut residual = v.to_vec();
                let entries = self.assign(&mut residual);
                recon.iter_mut().for_each(|x| *x = 0.0);
                for (stage, &e) in entries.iter().enumerate() {
                    for (x, &cv) in recon.iter_mut().zip(self.centroid(stage, e as usize)) {
                        *x += cv;
                    }
                }
                let n2 = simd::dot(&recon, &recon);
                norm_min = norm_min.min(n2);
                norm_max = norm_max.max(n2);
            }
            self.norm_min = norm_min;
            self.norm_scale = if norm_max > norm_min {
                (norm_max - norm_min) / 255.0
            } else {
                0.0
            };
        }

        Ok(())
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(Error::NotTrained("residual quantizer"));
        }
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut residual = vector.to_vec();
        let entries = self.assign(&mut residual);
        let mut out = Vec::with_capacity(self.code_size());
        pack_entries(&entries, self.nbits, &mut out);

        if self.norm_mode == NormMode::QInt8 {
            // reconstruction = vector - final residual
            let n2: f32 = vector
                .iter()
                .zip(residual.iter())
                .map(|(&x, &r)| (x - r) * (x - r))
                .sum();
            let byte = if self.norm_scale > 0.0 {
                ((n2 - self.norm_min) / self.norm_scale)
                    .round()
                    .clamp(0.0, 255.0) as u8
            } else {
                0
            };
            out.push(byte);
        }

        Ok(out)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        out.iter_mut().for_each(|x| *x = 0.0);
        let mut reader = BitReader::new(&code[..self.packed_size()]);
        for stage in 0..self.m {
            let c = reader.read(self.nbits) as usize;
            for (x, &cv) in out.iter_mut().zip(self.centroid(stage, c)) {
                *x += cv;
            }
        }
    }

    fn supports_lut(&self, metric: Metric) -> bool {
        match self.norm_mode {
            NormMode::QInt8 => true,
            // Without the norm channel, mirror the decompress-only
            // configuration: no LUT under either metric.
            NormMode::None => {
                let _ = metric;
                false
            }
        }
    }

    fn distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>> {
        if !self.trained {
            return Err(Error::NotTrained("distance computer over untrained codec"));
        }
        if self.supports_lut(metric) {
            self.lut_distance_computer(codes, metric)
        } else {
            Ok(Box::new(crate::dc::DecodeDistanceComputer::new(
                self, codes, metric,
            )))
        }
    }

    fn lut_distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>> {
        if !self.trained {
            return Err(Error::NotTrained("distance computer over untrained codec"));
        }
        if !self.supports_lut(metric) {
            return Err(Error::UnsupportedConfiguration(format!(
                "residual quantizer LUT under {metric:?} requires the QInt8 norm channel"
            )));
        }
        Ok(Box::new(RqLutDistanceComputer::new(self, codes, metric)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn training_data(d: usize, n: usize) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(17);
        (0..n * d).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn code_size_includes_norm_byte() {
        let rq = ResidualQuantizer::new(32, 3, 4, NormMode::None).unwrap();
        assert_eq!(rq.code_size(), 2); // 12 bits packed
        let rq = ResidualQuantizer::new(32, 3, 4, NormMode::QInt8).unwrap();
        assert_eq!(rq.code_size(), 3);
    }

    #[test]
    fn more_stages_reduce_reconstruction_error() {
        let d = 16;
        let n = 128;
        let data = training_data(d, n);

        let mut err = Vec::new();
        for m in [1, 3] {
            let mut rq = ResidualQuantizer::new(d, m, 4, NormMode::None)
                .unwrap()
                .with_seed(5);
            rq.train(&data, n).unwrap();
            let total: f32 = (0..n)
                .map(|i| {
                    let v = &data[i * d..(i + 1) * d];
                    let decoded = rq.decode(&rq.encode(v).unwrap());
                    crate::simd::l2_distance_squared(v, &decoded)
                })
                .sum();
            err.push(total);
        }
        assert!(err[1] < err[0]);
    }

    #[test]
    fn lut_without_norm_channel_is_unsupported() {
        let d = 16;
        let n = 64;
        let data = training_data(d, n);
        let mut rq = ResidualQuantizer::new(d, 3, 4, NormMode::None).unwrap();
        rq.train(&data, n).unwrap();
        let err = rq.lut_distance_computer(&[], Metric::L2).err().unwrap();
        assert!(matches!(err, Error::UnsupportedConfiguration(_)));
        let err = rq
            .lut_distance_computer(&[], Metric::InnerProduct)
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedConfiguration(_)));
    }

    #[test]
    fn lut_inner_product_matches_decode_exactly() {
        let d = 16;
        let n = 128;
        let data = training_data(d, n);
        let mut rq = ResidualQuantizer::new(d, 3, 4, NormMode::QInt8)
            .unwrap()
            .with_seed(5);
        rq.train(&data, n).unwrap();

        let query = &data[..d];
        let mut table = Vec::new();
        rq.compute_lut(query, &mut table);
        for i in 8..24 {
            let v = &data[i * d..(i + 1) * d];
            let code = rq.encode(v).unwrap();
            let lut = rq.distance_with_lut(&table, 0.0, Metric::InnerProduct, &code);
            let decoded = rq.decode(&code);
            let reference = crate::simd::dot(query, &decoded);
            assert!((lut - reference).abs() <= 1e-4 * reference.abs().max(1.0));
        }
    }

    #[test]
    fn lut_l2_matches_decode_within_norm_quantization() {
        let d = 16;
        let n = 128;
        let data = training_data(d, n);
        let mut rq = ResidualQuantizer::new(d, 3, 4, NormMode::QInt8)
            .unwrap()
            .with_seed(5);
        rq.train(&data, n).unwrap();

        let query = &data[..d];
        let q_norm2 = crate::simd::dot(query, query);
        let mut table = Vec::new();
        rq.compute_lut(query, &mut table);
        // One qint8 step of the norm range bounds the disagreement.
        let step = rq.norm_scale;
        for i in 8..24 {
            let v = &data[i * d..(i + 1) * d];
            let code = rq.encode(v).unwrap();
            let lut = rq.distance_with_lut(&table, q_norm2, Metric::L2, &code);
            let decoded = rq.decode(&code);
            let reference = crate::simd::l2_distance_squared(query, &decoded);
            assert!((lut - reference).abs() <= step + 1e-4);
        }
    }
}
