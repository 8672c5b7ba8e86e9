//! Scalar Quantization (SQ).
//!
//! Quantizes each vector component independently to `nbits` uniform levels
//! inside a per-dimension range learned at training time. No lookup-table
//! path: evaluation always goes through decoding.

use super::{pack_entries, BitReader, Codec};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Uniform scalar quantizer with trained per-dimension ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarQuantizer {
    dimension: usize,
    nbits: usize,
    /// Per-dimension range minimum.
    vmin: Vec<f32>,
    /// Per-dimension range width (`vmax - vmin`).
    vdiff: Vec<f32>,
    trained: bool,
}

impl ScalarQuantizer {
    /// Create a scalar quantizer at `nbits` per component (1..=8).
    pub fn new(dimension: usize, nbits: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::InvalidArgument(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if nbits == 0 || nbits > 8 {
            return Err(Error::InvalidArgument(format!(
                "nbits must be in 1..=8, got {nbits}"
            )));
        }
        Ok(Self {
            dimension,
            nbits,
            vmin: Vec::new(),
            vdiff: Vec::new(),
            trained: false,
        })
    }

    /// Highest quantization level.
    #[inline]
    fn levels(&self) -> f32 {
        ((1usize << self.nbits) - 1) as f32
    }
}

impl Codec for ScalarQuantizer {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn code_size(&self) -> usize {
        (self.dimension * self.nbits + 7) / 8
    }

    fn is_trained(&self) -> bool {
        self.trained
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if n == 0 || vectors.len() < n * self.dimension {
            return Err(Error::InvalidArgument(
                "insufficient training data for the declared count".to_string(),
            ));
        }

        let mut vmin = vec![f32::INFINITY; self.dimension];
        let mut vmax = vec![f32::NEG_INFINITY; self.dimension];
        for i in 0..n {
            let v = &vectors[i * self.dimension..(i + 1) * self.dimension];
            for (j, &x) in v.iter().enumerate() {
                vmin[j] = vmin[j].min(x);
                vmax[j] = vmax[j].max(x);
            }
        }

        self.vdiff = vmin
            .iter()
            .zip(vmax.iter())
            .map(|(&lo, &hi)| hi - lo)
            .collect();
        self.vmin = vmin;
        self.trained = true;
        Ok(())
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.trained {
            return Err(Error::NotTrained("scalar quantizer"));
        }
        if vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let levels = self.levels();
        let mut entries = Vec::with_capacity(self.dimension);
        for (j, &x) in vector.iter().enumerate() {
            let level = if self.vdiff[j] > 0.0 {
                let xi = ((x - self.vmin[j]) / self.vdiff[j]).clamp(0.0, 1.0);
                (xi * levels).round() as u32
            } else {
                0
            };
            entries.push(level);
        }

        let mut out = Vec::with_capacity(self.code_size());
        pack_entries(&entries, self.nbits, &mut out);
        Ok(out)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        let levels = self.levels();
        let mut reader = BitReader::new(code);
        for j in 0..self.dimension {
            let level = reader.read(self.nbits) as f32;
            out[j] = self.vmin[j] + level / levels * self.vdiff[j];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn code_size_for_common_widths() {
        assert_eq!(ScalarQuantizer::new(32, 8).unwrap().code_size(), 32);
        assert_eq!(ScalarQuantizer::new(32, 6).unwrap().code_size(), 24);
        assert_eq!(ScalarQuantizer::new(32, 4).unwrap().code_size(), 16);
    }

    #[test]
    fn untrained_encode_fails() {
        let sq = ScalarQuantizer::new(8, 8).unwrap();
        assert_eq!(
            sq.encode(&vec![0.0; 8]).unwrap_err(),
            Error::NotTrained("scalar quantizer")
        );
    }

    #[test]
    fn constant_dimension_decodes_to_constant() {
        let mut sq = ScalarQuantizer::new(2, 8).unwrap();
        // Second dimension constant at 3.5
        let data = vec![0.0, 3.5, 1.0, 3.5, 0.5, 3.5];
        sq.train(&data, 3).unwrap();
        let code = sq.encode(&[0.25, 3.5]).unwrap();
        let decoded = sq.decode(&code);
        assert_eq!(decoded[1], 3.5);
    }

    proptest! {
        #[test]
        fn prop_decode_stays_within_trained_range(
            nbits in prop::sample::select(vec![4usize, 6, 8]),
            data in proptest::collection::vec(-10.0f32..10.0, 16..64),
        ) {
            let d = 4;
            let n = data.len() / d;
            prop_assume!(n >= 2);
            let data = &data[..n * d];

            let mut sq = ScalarQuantizer::new(d, nbits).unwrap();
            sq.train(data, n).unwrap();

            for i in 0..n {
                let v = &data[i * d..(i + 1) * d];
                let decoded = sq.decode(&sq.encode(v).unwrap());
                for (j, &x) in decoded.iter().enumerate() {
                    // Reconstruction stays inside the trained range and
                    // within one quantization step of the input.
                    let step = sq.vdiff[j] / sq.levels();
                    prop_assert!(x >= sq.vmin[j] - 1e-5);
                    prop_assert!(x <= sq.vmin[j] + sq.vdiff[j] + 1e-5);
                    prop_assert!((x - v[j]).abs() <= step * 0.5 + 1e-4);
                }
            }
        }
    }
}
