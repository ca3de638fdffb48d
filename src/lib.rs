//! A streaming histogram for `f64` samples with bounded error, adaptive memory use
//! and a compact binary wire format.
//!
//! Recording a value is a constant-time operation: a *layout* maps the value straight
//! to a bin index by decomposing its IEEE-754 bit pattern, and a bit-packed counter
//! array increments that bin. The layout guarantees a bound on how far any value can
//! sit from its bin — an absolute width limit, a relative width limit, or whichever of
//! the two is easier to meet at that magnitude — so order statistics computed from the
//! bins (ranks, quantiles) inherit a known worst-case error. The exact minimum and
//! maximum are tracked on the side, down to the sign of zero.
//!
//! Counters start at one bit each and widen only when some bin actually exceeds the
//! current range, so sparse and low-count histograms stay small without configuration.
//! The serialization format applies the same thinking to the wire: empty and
//! single-sample histograms take two to ten bytes, and larger ones choose between a
//! dense and a gap-encoded sparse payload, whichever is smaller.
//!
//! # Recording and querying
//!
//! A histogram is created over a layout. [`LogQuadraticLayout`](layout::LogQuadraticLayout)
//! is a good default: close to the smallest possible bin count for a given relative
//! error, at a few arithmetic operations per update.
//!
//! ```
//! use dynahist::layout::LogQuadraticLayout;
//! use dynahist::{DynamicHistogram, Histogram};
//!
//! // Track values between 1 microsecond and 1 hour (in seconds) within 1%.
//! let layout = LogQuadraticLayout::new(1e-6, 1e-2, 0.0, 3600.0).unwrap();
//! let mut histogram = DynamicHistogram::new(layout);
//!
//! histogram.add(0.0034).unwrap();
//! histogram.add(0.0012).unwrap();
//! histogram.add_with_count(0.0090, 3).unwrap();
//!
//! assert_eq!(histogram.total_count(), 5);
//! assert_eq!(histogram.min(), 0.0012);
//! assert_eq!(histogram.max(), 0.0090);
//! let median = histogram.value_at_quantile(0.5).unwrap();
//! assert!(median >= 0.0034 * 0.99 && median <= 0.0090 * 1.01);
//! ```
//!
//! Values outside the layout's chosen range are not lost: they land in the two
//! unbounded underflow/overflow bins, infinities included. Only NaN is rejected.
//!
//! # Representations
//!
//! [`DynamicHistogram`] is the general-purpose representation described above.
//! [`StaticHistogram`] allocates every bin of the layout up front at 64 bits, which
//! wastes memory but never allocates while recording — useful when updates must not
//! stall. [`PreprocessedHistogram`] is an immutable snapshot with cumulative counts:
//! rank and quantile queries cost `O(log N)` instead of a scan, and it is the natural
//! form for analysis after recording has finished. All three answer the same
//! [`Histogram`] query trait and serialize identically.
//!
//! # Merging and serialization
//!
//! Histograms recorded independently (per thread, per host) can be merged:
//! [`MutableHistogram::add_histogram`] is lossless between equal layouts and resamples
//! through estimated values otherwise. The wire format (see the [`serialization`]
//! module) does not embed the layout; producer and consumer agree on it like on any
//! other schema.
//!
//! ```
//! use dynahist::layout::LogQuadraticLayout;
//! use dynahist::{DynamicHistogram, Histogram};
//! use dynahist::serialization;
//!
//! let layout = LogQuadraticLayout::new(1e-6, 1e-2, 0.0, 3600.0).unwrap();
//! let mut recorded = DynamicHistogram::new(layout.clone());
//! for i in 1..=1000 {
//!     recorded.add(f64::from(i) * 1e-3).unwrap();
//! }
//!
//! let mut bytes = Vec::new();
//! recorded.write(&mut bytes).unwrap();
//!
//! let analyzed = serialization::read_as_preprocessed(layout, &mut bytes.as_slice()).unwrap();
//! assert_eq!(analyzed.total_count(), 1000);
//! assert_eq!(analyzed.min(), 0.001);
//! assert_eq!(analyzed.max(), 1.0);
//! ```
//!
//! # Limitations
//!
//! A histogram is single-owner: concurrent updates require external synchronization,
//! and none is provided here. The total count is capped at `i64::MAX`. Index
//! computation uses ordinary `f64` arithmetic, so producers and consumers running on
//! implementations with extended intermediate precision (x87, contracted FMA) could
//! disagree on bin boundaries by one bin in rare cases; IEEE-754 conformant scalar
//! arithmetic is assumed.

#![deny(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results,
    variant_size_differences
)]

mod algorithms;
pub mod bitio;
pub mod errors;
pub mod estimators;
mod histogram;
pub mod layout;
pub mod serialization;
pub mod store;

pub use errors::*;
pub use histogram::{
    Bin, DynamicHistogram, Histogram, MutableHistogram, NonEmptyBinsAscending,
    NonEmptyBinsDescending, PreprocessedHistogram, StaticHistogram,
};
