//! juxta: quantized distance computation and refinement composition for
//! vector similarity search.
//!
//! Two tightly coupled pieces make up the core:
//!
//! - **Distance computers** ([`dc`]): per-query evaluators that produce
//!   metric-consistent distances from heterogeneously encoded codes
//!   (product-, scalar-, and additively-quantized), via either a
//!   decompress-then-measure path or a lookup-table path.
//! - **Refinement composition** ([`refine`]): a fast approximate base
//!   index paired with an exact (or less approximate) refinement index;
//!   top-k search over-fetches by a `k_factor` and re-ranks with refined
//!   distances, range search keeps the base's memberships and re-scores
//!   them.
//!
//! # Why two evaluation paths?
//!
//! Decoding a code and measuring against the query is always correct but
//! touches every dimension per candidate. Codecs whose distance decomposes
//! per code slot (PQ always, additive quantization when codes carry a norm
//! channel) instead precompute per-slot tables once per query; evaluating
//! a candidate is then one table lookup per slot, independent of the
//! dimensionality. The LUT path is selected automatically where it is
//! valid and refuses construction where it is not — it must never be
//! silently wrong.
//!
//! # Example
//!
//! ```
//! use juxta::codec::pq::ProductQuantizer;
//! use juxta::{CodesIndex, FlatIndex, Index, Metric, RefineIndex, RefineSearchParams};
//!
//! # fn main() -> juxta::Result<()> {
//! let data: Vec<f32> = (0..256 * 16).map(|i| (i % 23) as f32 / 23.0).collect();
//!
//! let pq = ProductQuantizer::new(16, 4, 4)?;
//! let base = CodesIndex::new(pq, Metric::L2);
//! let refine = FlatIndex::new(16, Metric::L2);
//! let mut index = RefineIndex::new(base, refine)?;
//!
//! index.train(&data, 256)?;
//! index.add(&data, 256)?;
//!
//! let params = RefineSearchParams::with_k_factor(2.0);
//! let result = index.search(&data[..16], 1, 5, Some(&params))?;
//! assert_eq!(result.row(0).1[0], 0);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod codes;
pub mod dc;
pub mod distance;
pub mod error;
pub mod eval;
pub mod flat;
pub mod index;
pub mod ivf;
pub mod kmeans;
pub mod refine;
pub mod simd;

pub use codec::Codec;
pub use codes::CodesIndex;
pub use dc::{DistanceComputer, FlatCodesDistanceComputer};
pub use distance::Metric;
pub use error::{Error, Result};
pub use flat::FlatIndex;
pub use index::{Index, RangeSearchResult, RefineSource, SearchResult, SENTINEL_ID};
pub use ivf::{IvfIndex, IvfSearchParams};
pub use refine::{RefineIndex, RefineSearchParams};
