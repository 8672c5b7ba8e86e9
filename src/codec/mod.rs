//! Vector codecs: lossy vector <-> code mappings.
//!
//! A codec turns a `d`-dimensional vector into a fixed-size byte code and
//! back (approximately). The families implemented here:
//!
//! | Codec | Code contents | LUT path |
//! |-------|---------------|----------|
//! | [`pq::ProductQuantizer`] | per-subspace codeword ids | yes (both metrics) |
//! | [`sq::ScalarQuantizer`] | per-component uniform levels | no |
//! | [`rq::ResidualQuantizer`] | additive codeword ids (+ optional norm byte) | with norm channel |
//! | [`transform::TransformCodec`] | inner codec over a PCA projection | no |
//!
//! The LUT ("lookup table") path trades a once-per-query table build for
//! per-code evaluation that touches one table entry per code slot, never
//! the full dimensionality. Codecs declare LUT capability per metric via
//! [`Codec::supports_lut`]; a capability they do not declare must fail at
//! distance-computer construction, not produce wrong numbers.

pub mod pq;
pub mod rq;
pub mod sq;
pub mod transform;

use crate::dc::{DecodeDistanceComputer, FlatCodesDistanceComputer};
use crate::distance::Metric;
use crate::error::{Error, Result};

/// Lossy vector <-> code mapping.
///
/// Implementations are a closed set of concrete quantizer types; indexes
/// are generic over the codec so the per-variant numeric kernels stay
/// concrete and inlinable.
pub trait Codec {
    /// Input dimensionality `d`. Every encoded vector must have exactly
    /// this many components.
    fn dimension(&self) -> usize;

    /// Size in bytes of one code.
    fn code_size(&self) -> usize;

    /// Whether `train` has been called successfully.
    fn is_trained(&self) -> bool;

    /// Train codebooks/ranges on `n` vectors stored contiguously.
    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()>;

    /// Encode one vector into a fresh code. Deterministic given trained
    /// state.
    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>>;

    /// Decode a code into `out`, which must hold `dimension()` floats.
    fn decode_into(&self, code: &[u8], out: &mut [f32]);

    /// Decode a code into a fresh vector.
    fn decode(&self, code: &[u8]) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dimension()];
        self.decode_into(code, &mut out);
        out
    }

    /// Whether this codec has a valid lookup-table formulation under
    /// `metric`.
    fn supports_lut(&self, metric: Metric) -> bool {
        let _ = metric;
        false
    }

    /// A distance computer bound to `codes` (contiguous, `code_size()`
    /// bytes per entry), choosing the LUT path automatically when this
    /// codec supports it under `metric` and the decompress path otherwise.
    ///
    /// `codes` may be empty when the caller only evaluates through
    /// [`FlatCodesDistanceComputer::distance_to_code`].
    fn distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>>
    where
        Self: Sized,
    {
        if !self.is_trained() {
            return Err(Error::NotTrained("distance computer over untrained codec"));
        }
        Ok(Box::new(DecodeDistanceComputer::new(self, codes, metric)))
    }

    /// A distance computer that must use the LUT path. Fails with
    /// [`Error::UnsupportedConfiguration`] when the codec has no valid LUT
    /// formulation under `metric`; never silently falls back to decoding.
    fn lut_distance_computer<'a>(
        &'a self,
        codes: &'a [u8],
        metric: Metric,
    ) -> Result<Box<dyn FlatCodesDistanceComputer + 'a>> {
        let _ = codes;
        Err(Error::UnsupportedConfiguration(format!(
            "codec has no lookup-table path under {metric:?}"
        )))
    }
}

/// Pack a sequence of sub-byte entries into bytes, LSB first.
pub(crate) fn pack_entries(values: &[u32], nbits: usize, out: &mut Vec<u8>) {
    debug_assert!(nbits >= 1 && nbits <= 8);
    let mut acc: u32 = 0;
    let mut filled = 0usize;
    for &v in values {
        debug_assert!(v < (1u32 << nbits));
        acc |= v << filled;
        filled += nbits;
        while filled >= 8 {
            out.push((acc & 0xff) as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        out.push((acc & 0xff) as u8);
    }
}

/// Reader for sub-byte entries packed by [`pack_entries`].
pub(crate) struct BitReader<'a> {
    bytes: &'a [u8],
    bitpos: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, bitpos: 0 }
    }

    #[inline]
    pub(crate) fn read(&mut self, nbits: usize) -> u32 {
        let mut value = 0u32;
        let mut got = 0usize;
        while got < nbits {
            let byte = self.bytes[self.bitpos / 8] as u32;
            let offset = self.bitpos % 8;
            let take = (8 - offset).min(nbits - got);
            let bits = (byte >> offset) & ((1u32 << take) - 1);
            value |= bits << got;
            got += take;
            self.bitpos += take;
        }
        value
    }
}
