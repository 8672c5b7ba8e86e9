//! Error types for juxta.

use thiserror::Error;

/// Errors that can occur during encoding, distance computation, or search.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// A supplied vector's length differs from the configured dimensionality.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The requested distance-computation path is not valid for this
    /// codec/metric combination. Raised at construction, never deferred to
    /// first use.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// A caller-supplied argument is out of its valid domain (non-positive
    /// `k`, negative `k_factor`, non-finite radius, bad codec parameters).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A distance was requested for an id the bound store does not hold.
    /// Ids must be added to the base and refinement indexes identically;
    /// this error indicates that invariant was broken.
    #[error("id {id} out of range for store with {ntotal} entries")]
    IdOutOfRange { id: usize, ntotal: usize },

    /// Operation requires a trained codec or index.
    #[error("not trained: {0}")]
    NotTrained(&'static str),
}

/// Result type for juxta operations.
pub type Result<T> = std::result::Result<T, Error>;
