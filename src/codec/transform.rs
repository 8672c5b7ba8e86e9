//! Dimensionality-reducing transform in front of another codec.
//!
//! [`PcaMatrix`] learns an orthonormal projection from training data
//! (covariance + Jacobi eigensolver, fully deterministic) and
//! [`TransformCodec`] chains it with any inner codec: encode projects then
//! quantizes, decode dequantizes then maps back through the transpose.

use super::Codec;
use crate::error::{Error, Result};
use crate::simd;
use serde::{Deserialize, Serialize};

/// Trained PCA projection from `d_in` to `d_out` dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaMatrix {
    d_in: usize,
    d_out: usize,
    mean: Vec<f32>,
    /// Row-major `d_out x d_in`; rows are orthonormal principal axes.
    components: Vec<f32>,
    trained: bool,
}

impl PcaMatrix {
    /// Create an untrained projection.
    pub fn new(d_in: usize, d_out: usize) -> Result<Self> {
        if d_out == 0 || d_out > d_in {
            return Err(Error::InvalidArgument(format!(
                "output dimension must be in 1..={d_in}, got {d_out}"
            )));
        }
        Ok(Self {
            d_in,
            d_out,
            mean: Vec::new(),
            components: Vec::new(),
            trained: false,
        })
    }

    /// Input dimensionality.
    pub fn d_in(&self) -> usize {
        self.d_in
    }

    /// Output dimensionality.
    pub fn d_out(&self) -> usize {
        self.d_out
    }

    /// Whether `train` has completed.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Learn the mean and principal axes from `n` vectors.
    pub fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        if n < 2 || vectors.len() < n * self.d_in {
            return Err(Error::InvalidArgument(
                "PCA needs at least two training vectors".to_string(),
            ));
        }

        let d = self.d_in;
        let mut mean = vec![0.0f64; d];
        for i in 0..n {
            for j in 0..d {
                mean[j] += vectors[i * d + j] as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f64;
        }

        // Covariance, accumulated in f64.
        let mut cov = vec![0.0f64; d * d];
        let mut centered = vec![0.0f64; d];
        for i in 0..n {
            for j in 0..d {
                centered[j] = vectors[i * d + j] as f64 - mean[j];
            }
            for p in 0..d {
                for q in p..d {
                    cov[p * d + q] += centered[p] * centered[q];
                }
            }
        }
        for p in 0..d {
            for q in p..d {
                let v = cov[p * d + q] / n as f64;
                cov[p * d + q] = v;
                cov[q * d + p] = v;
            }
        }

        let (eigenvalues, eigenvectors) = jacobi_eigen(&mut cov, d);

        // Sort axes by descending eigenvalue, keep the top d_out.
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

        self.components = Vec::with_capacity(self.d_out * d);
        for &axis in order.iter().take(self.d_out) {
            for j in 0..d {
                // Eigenvectors are stored column-major.
                self.components.push(eigenvectors[j * d + axis] as f32);
            }
        }
        self.mean = mean.into_iter().map(|m| m as f32).collect();
        self.trained = true;
        Ok(())
    }

    /// Project a vector into the reduced space.
    pub fn apply(&self, x: &[f32], out: &mut [f32]) {
        debug_assert_eq!(x.len(), self.d_in);
        debug_assert_eq!(out.len(), self.d_out);
        let mut centered = vec![0.0f32; self.d_in];
        for (c, (&xv, &mv)) in centered.iter_mut().zip(x.iter().zip(self.mean.iter())) {
            *c = xv - mv;
        }
        for (i, o) in out.iter_mut().enumerate() {
            let row = &self.components[i * self.d_in..(i + 1) * self.d_in];
            *o = simd::dot(row, &centered);
        }
    }

    /// Map a reduced vector back to the input space (transpose of the
    /// orthonormal projection, plus the mean).
    pub fn reverse(&self, y: &[f32], out: &mut [f32]) {
        debug_assert_eq!(y.len(), self.d_out);
        debug_assert_eq!(out.len(), self.d_in);
        out.copy_from_slice(&self.mean);
        for (i, &yi) in y.iter().enumerate() {
            let row = &self.components[i * self.d_in..(i + 1) * self.d_in];
            for (o, &r) in out.iter_mut().zip(row.iter()) {
                *o += yi * r;
            }
        }
    }
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix.
///
/// Returns eigenvalues and the accumulated rotation matrix (column `j`
/// is the eigenvector for eigenvalue `j`).
fn jacobi_eigen(a: &mut [f64], n: usize) -> (Vec<f64>, Vec<f64>) {
    let mut v = vec![0.0f64; n * n];
    for i in 0..n {
        v[i * n + i] = 1.0;
    }

    for _sweep in 0..64 {
        let mut off: f64 = 0.0;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[p * n + q] * a[p * n + q];
            }
        }
        if off < 1e-24 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[p * n + q];
                if apq.abs() < 1e-30 {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[k * n + p];
                    let akq = a[k * n + q];
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p * n + k];
                    let aqk = a[q * n + k];
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[k * n + p];
                    let vkq = v[k * n + q];
                    v[k * n + p] = c * vkp - s * vkq;
                    v[k * n + q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigenvalues = (0..n).map(|i| a[i * n + i]).collect();
    (eigenvalues, v)
}

/// A PCA projection chained with an inner codec.
///
/// From the outside this is a codec over the input dimensionality; the
/// inner codec only ever sees projected vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformCodec<C> {
    pca: PcaMatrix,
    inner: C,
}

impl<C: Codec> TransformCodec<C> {
    /// Wrap `inner` behind a `d_in -> inner.dimension()` PCA projection.
    pub fn new(d_in: usize, inner: C) -> Result<Self> {
        let pca = PcaMatrix::new(d_in, inner.dimension())?;
        Ok(Self { pca, inner })
    }

    /// The trained projection.
    pub fn pca(&self) -> &PcaMatrix {
        &self.pca
    }

    /// The inner codec.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Codec> Codec for TransformCodec<C> {
    fn dimension(&self) -> usize {
        self.pca.d_in()
    }

    fn code_size(&self) -> usize {
        self.inner.code_size()
    }

    fn is_trained(&self) -> bool {
        self.pca.is_trained() && self.inner.is_trained()
    }

    fn train(&mut self, vectors: &[f32], n: usize) -> Result<()> {
        self.pca.train(vectors, n)?;

        let d_in = self.pca.d_in();
        let d_out = self.pca.d_out();
        let mut projected = vec![0.0f32; n * d_out];
        for i in 0..n {
            self.pca.apply(
                &vectors[i * d_in..(i + 1) * d_in],
                &mut projected[i * d_out..(i + 1) * d_out],
            );
        }
        self.inner.train(&projected, n)
    }

    fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if !self.is_trained() {
            return Err(Error::NotTrained("transform codec"));
        }
        if vector.len() != self.pca.d_in() {
            return Err(Error::DimensionMismatch {
                expected: self.pca.d_in(),
                actual: vector.len(),
            });
        }
        let mut projected = vec![0.0f32; self.pca.d_out()];
        self.pca.apply(vector, &mut projected);
        self.inner.encode(&projected)
    }

    fn decode_into(&self, code: &[u8], out: &mut [f32]) {
        let mut projected = vec![0.0f32; self.pca.d_out()];
        self.inner.decode_into(code, &mut projected);
        self.pca.reverse(&projected, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sq::ScalarQuantizer;

    fn training_data(d: usize, n: usize) -> Vec<f32> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        let mut rng = StdRng::seed_from_u64(23);
        (0..n * d).map(|_| rng.random::<f32>()).collect()
    }

    #[test]
    fn rejects_expanding_projection() {
        assert!(PcaMatrix::new(8, 9).is_err());
        assert!(PcaMatrix::new(8, 0).is_err());
    }

    #[test]
    fn components_are_orthonormal() {
        let d = 8;
        let n = 200;
        let data = training_data(d, n);
        let mut pca = PcaMatrix::new(d, 4).unwrap();
        pca.train(&data, n).unwrap();

        for i in 0..4 {
            for j in 0..4 {
                let ri = &pca.components[i * d..(i + 1) * d];
                let rj = &pca.components[j * d..(j + 1) * d];
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!(
                    (simd::dot(ri, rj) - expected).abs() < 1e-4,
                    "rows {i},{j} not orthonormal"
                );
            }
        }
    }

    #[test]
    fn full_rank_projection_roundtrips() {
        let d = 6;
        let n = 100;
        let data = training_data(d, n);
        let mut pca = PcaMatrix::new(d, d).unwrap();
        pca.train(&data, n).unwrap();

        let x = &data[..d];
        let mut y = vec![0.0f32; d];
        let mut back = vec![0.0f32; d];
        pca.apply(x, &mut y);
        pca.reverse(&y, &mut back);
        for (a, b) in x.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn transform_codec_reconstructs_near_input() {
        let d = 16;
        let n = 300;
        let data = training_data(d, n);
        let sq = ScalarQuantizer::new(10, 8).unwrap();
        let mut codec = TransformCodec::new(d, sq).unwrap();
        codec.train(&data, n).unwrap();
        assert_eq!(codec.dimension(), d);

        // Lossy, but the reconstruction must stay close on training data.
        let x = &data[..d];
        let decoded = codec.decode(&codec.encode(x).unwrap());
        let err = simd::l2_distance_squared(x, &decoded);
        let scale = simd::dot(x, x);
        assert!(err < scale, "reconstruction error {err} vs norm {scale}");
    }
}
