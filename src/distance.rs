//! Distance metrics for dense vectors.
//!
//! Every index instance is bound to one [`Metric`] at construction, and
//! every distance computer derived from it must honor that metric.
//!
//! ## Ranking direction
//!
//! For L2, "closer" means a smaller distance. For inner product, "closer"
//! means a larger value (maximum inner product search). Any code that
//! sorts, truncates or thresholds candidates must go through
//! [`Metric::is_closer`] / [`Metric::within_radius`] rather than comparing
//! raw floats, so the direction is threaded through every step.

use crate::simd;
use serde::{Deserialize, Serialize};

/// Distance metric for dense vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance. Smaller is closer.
    L2,
    /// Raw inner product. Larger is closer.
    InnerProduct,
}

impl Metric {
    /// Compute the distance between two vectors of equal length.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Metric::L2 => simd::l2_distance_squared(a, b),
            Metric::InnerProduct => simd::dot(a, b),
        }
    }

    /// Whether distance `a` ranks strictly closer than distance `b`.
    #[inline]
    #[must_use]
    pub fn is_closer(self, a: f32, b: f32) -> bool {
        match self {
            Metric::L2 => a < b,
            Metric::InnerProduct => a > b,
        }
    }

    /// Total-order comparison with the closest distance first.
    ///
    /// Suitable for a stable sort: equal distances compare equal, so the
    /// input order of tied candidates is preserved.
    #[inline]
    #[must_use]
    pub fn cmp_closest_first(self, a: f32, b: f32) -> std::cmp::Ordering {
        match self {
            Metric::L2 => a.total_cmp(&b),
            Metric::InnerProduct => b.total_cmp(&a),
        }
    }

    /// Whether a distance falls inside the given search radius.
    #[inline]
    #[must_use]
    pub fn within_radius(self, distance: f32, radius: f32) -> bool {
        match self {
            Metric::L2 => distance < radius,
            Metric::InnerProduct => distance > radius,
        }
    }

    /// The sentinel distance used to pad unfilled result slots. Ranks
    /// after every real distance in this metric's direction.
    #[inline]
    #[must_use]
    pub fn worst(self) -> f32 {
        match self {
            Metric::L2 => f32::INFINITY,
            Metric::InnerProduct => f32::NEG_INFINITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_smaller_is_closer() {
        assert!(Metric::L2.is_closer(1.0, 2.0));
        assert!(!Metric::L2.is_closer(2.0, 1.0));
    }

    #[test]
    fn inner_product_larger_is_closer() {
        assert!(Metric::InnerProduct.is_closer(2.0, 1.0));
        assert!(!Metric::InnerProduct.is_closer(1.0, 2.0));
    }

    #[test]
    fn worst_ranks_last_in_both_directions() {
        for metric in [Metric::L2, Metric::InnerProduct] {
            assert!(metric.is_closer(0.0, metric.worst()));
        }
    }

    #[test]
    fn cmp_is_stable_on_ties() {
        use std::cmp::Ordering;
        assert_eq!(Metric::L2.cmp_closest_first(1.0, 1.0), Ordering::Equal);
        assert_eq!(
            Metric::InnerProduct.cmp_closest_first(1.0, 1.0),
            Ordering::Equal
        );
    }
}
