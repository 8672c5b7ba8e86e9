//! k-means clustering over flat (SoA) vector storage.
//!
//! Used for PQ/RQ codebook training and the IVF coarse partitioner. The
//! objective is squared Euclidean distance: codebooks trained here feed
//! distance estimators that must stay metric-correct under L2, so this must
//! not silently switch to a similarity objective.

use crate::error::{Error, Result};
use crate::simd;

/// k-means clustering with k-means++ initialization.
pub struct KMeans {
    /// Centroids (k x dimension)
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    k: usize,
    seed: u64,
    max_iterations: usize,
}

impl KMeans {
    /// Create new k-means with `k` clusters.
    pub fn new(dimension: usize, k: usize) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(Error::InvalidArgument(
                "dimension and k must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            seed: 0x6a78,
            max_iterations: 25,
        })
    }

    /// Configure the seed for k-means++ initialization.
    ///
    /// Repeated `fit(...)` calls on the same inputs and seed produce
    /// identical centroids.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Train k-means on `num_vectors` vectors stored contiguously.
    pub fn fit(&mut self, vectors: &[f32], num_vectors: usize) -> Result<()> {
        if vectors.len() < num_vectors * self.dimension {
            return Err(Error::InvalidArgument(
                "insufficient vector data for the declared count".to_string(),
            ));
        }
        if num_vectors < self.k {
            return Err(Error::InvalidArgument(format!(
                "cannot fit {} clusters on {} vectors",
                self.k, num_vectors
            )));
        }

        self.centroids = self.kmeans_plus_plus(vectors, num_vectors);

        for _iteration in 0..self.max_iterations {
            let assignments = self.assign_clusters(vectors, num_vectors);
            let new_centroids = self.update_centroids(vectors, num_vectors, &assignments);

            // Check convergence
            let mut converged = true;
            for (old, new) in self.centroids.iter().zip(new_centroids.iter()) {
                if simd::l2_distance_squared(old, new) > 1e-9 {
                    converged = false;
                    break;
                }
            }

            self.centroids = new_centroids;
            if converged {
                break;
            }
        }

        Ok(())
    }

    /// k-means++ initialization.
    fn kmeans_plus_plus(&self, vectors: &[f32], num_vectors: usize) -> Vec<Vec<f32>> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut centroids = Vec::with_capacity(self.k);

        // First centroid: random vector
        let first_idx = rng.random_range(0..num_vectors);
        centroids.push(self.get_vector(vectors, first_idx).to_vec());

        // Subsequent centroids: weighted by squared distance to the nearest
        // existing centroid
        while centroids.len() < self.k {
            let mut distances = Vec::with_capacity(num_vectors);
            let mut total_distance = 0.0f64;

            for i in 0..num_vectors {
                let vec = self.get_vector(vectors, i);
                let min_dist = centroids
                    .iter()
                    .map(|c| simd::l2_distance_squared(vec, c))
                    .fold(f32::INFINITY, f32::min);

                distances.push(min_dist);
                total_distance += min_dist as f64;
            }

            if total_distance <= 0.0 {
                // All points coincide with existing centroids; duplicate one.
                centroids.push(self.get_vector(vectors, first_idx).to_vec());
                continue;
            }

            let threshold = rng.random::<f64>() * total_distance;
            let mut cumulative = 0.0f64;
            let mut chosen = num_vectors - 1;
            for (i, &dist) in distances.iter().enumerate() {
                cumulative += dist as f64;
                if cumulative >= threshold {
                    chosen = i;
                    break;
                }
            }
            centroids.push(self.get_vector(vectors, chosen).to_vec());
        }

        centroids
    }

    /// Assign vectors to their nearest centroids.
    pub fn assign_clusters(&self, vectors: &[f32], num_vectors: usize) -> Vec<usize> {
        let mut assignments = Vec::with_capacity(num_vectors);

        for i in 0..num_vectors {
            let vec = self.get_vector(vectors, i);
            let mut best_cluster = 0;
            let mut best_dist = f32::INFINITY;

            for (cluster_idx, centroid) in self.centroids.iter().enumerate() {
                let dist = simd::l2_distance_squared(vec, centroid);
                if dist < best_dist {
                    best_dist = dist;
                    best_cluster = cluster_idx;
                }
            }

            assignments.push(best_cluster);
        }

        assignments
    }

    /// Update centroids as the means of their assigned vectors.
    fn update_centroids(
        &self,
        vectors: &[f32],
        num_vectors: usize,
        assignments: &[usize],
    ) -> Vec<Vec<f32>> {
        let mut cluster_sums = vec![vec![0.0f32; self.dimension]; self.k];
        let mut cluster_counts = vec![0usize; self.k];

        for (i, &cluster) in assignments.iter().enumerate().take(num_vectors) {
            cluster_counts[cluster] += 1;

            let vec = self.get_vector(vectors, i);
            for (j, &val) in vec.iter().enumerate() {
                cluster_sums[cluster][j] += val;
            }
        }

        cluster_sums
            .into_iter()
            .zip(cluster_counts.iter())
            .enumerate()
            .map(|(idx, (sums, &count))| {
                if count > 0 {
                    sums.iter().map(|&s| s / count as f32).collect()
                } else {
                    // Empty cluster: keep the previous centroid
                    self.centroids[idx].clone()
                }
            })
            .collect()
    }

    /// Get vector from SoA storage.
    fn get_vector<'a>(&self, vectors: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        &vectors[start..start + self.dimension]
    }

    /// Trained centroids.
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }
}
