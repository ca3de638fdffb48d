//! Histogram representations and the shared read-only query surface.
//!
//! Three representations share one query contract: [`DynamicHistogram`] (bit-packed
//! counters that grow and widen on demand), [`StaticHistogram`] (full-range 64-bit
//! counters, allocation-free updates), and [`PreprocessedHistogram`] (an immutable
//! snapshot with cumulative counts and logarithmic rank lookup). The [`Histogram`]
//! trait carries everything that only reads: tallies, min/max, bin navigation, rank and
//! quantile queries, and serialization.

use crate::errors::{QueryError, SerializeError};
use crate::estimators::{QuantileEstimator, SciPyQuantileEstimator, ValueEstimator};
use crate::layout::Layout;
use crate::serialization;
use std::io::Write;

mod mutable;
mod preprocessed;

pub use self::mutable::{DynamicHistogram, MutableHistogram, StaticHistogram};
pub use self::preprocessed::PreprocessedHistogram;

/// The read-only surface shared by all histogram representations.
pub trait Histogram {
    /// The layout type this histogram bins values with.
    type Layout: Layout;

    /// The layout this histogram bins values with.
    fn layout(&self) -> &Self::Layout;

    /// The total number of recorded samples, at most `i64::MAX`.
    fn total_count(&self) -> u64;

    /// The number of samples in the underflow bin.
    fn underflow_count(&self) -> u64;

    /// The number of samples in the overflow bin.
    fn overflow_count(&self) -> u64;

    /// The smallest recorded value in the sign-aware order that places `-0.0` below
    /// `+0.0`; `+∞` when the histogram is empty.
    fn min(&self) -> f64;

    /// The largest recorded value in the sign-aware order; `-∞` when the histogram is
    /// empty.
    fn max(&self) -> f64;

    /// The count at the given bin index. Indices at or below the underflow index
    /// return the underflow count, indices at or above the overflow index the overflow
    /// count.
    fn count(&self, bin_index: i32) -> u64;

    /// The narrowest range of regular bin indices outside of which every regular count
    /// is zero, or `None` if no regular bin is backed. The range itself may still
    /// contain zero counts.
    fn regular_window(&self) -> Option<(i32, i32)>;

    /// Returns true if this histogram has no recorded values.
    fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// The first (lowest-index) non-empty bin, or `None` if the histogram is empty.
    fn first_non_empty_bin(&self) -> Option<Bin<'_, Self>>
    where
        Self: Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.underflow_count() > 0 {
            let count = self.underflow_count();
            return Some(Bin::new(
                self,
                self.layout().underflow_bin_index(),
                count,
                0,
                self.total_count() - count,
            ));
        }
        if let Some((first, last)) = self.regular_window() {
            for bin_index in first..=last {
                let count = self.count(bin_index);
                if count > 0 {
                    return Some(Bin::new(self, bin_index, count, 0, self.total_count() - count));
                }
            }
        }
        let count = self.overflow_count();
        debug_assert!(count > 0);
        Some(Bin::new(
            self,
            self.layout().overflow_bin_index(),
            count,
            self.total_count() - count,
            0,
        ))
    }

    /// The last (highest-index) non-empty bin, or `None` if the histogram is empty.
    fn last_non_empty_bin(&self) -> Option<Bin<'_, Self>>
    where
        Self: Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.overflow_count() > 0 {
            let count = self.overflow_count();
            return Some(Bin::new(
                self,
                self.layout().overflow_bin_index(),
                count,
                self.total_count() - count,
                0,
            ));
        }
        if let Some((first, last)) = self.regular_window() {
            for bin_index in (first..=last).rev() {
                let count = self.count(bin_index);
                if count > 0 {
                    return Some(Bin::new(self, bin_index, count, self.total_count() - count, 0));
                }
            }
        }
        let count = self.underflow_count();
        debug_assert!(count > 0);
        Some(Bin::new(
            self,
            self.layout().underflow_bin_index(),
            count,
            0,
            self.total_count() - count,
        ))
    }

    /// The bin containing the sample with the given zero-based rank.
    ///
    /// Scans non-empty bins from whichever end is nearer to the rank, so the worst
    /// case is linear in the number of bins. `PreprocessedHistogram` replaces this
    /// with a binary search.
    fn bin_by_rank(&self, rank: u64) -> Result<Bin<'_, Self>, QueryError>
    where
        Self: Sized,
    {
        let total = self.total_count();
        if rank >= total {
            return Err(QueryError::RankOutOfBounds);
        }
        if rank < total / 2 {
            let mut bin = self
                .first_non_empty_bin()
                .expect("histogram is non-empty since rank < total_count");
            while bin.less_count() + bin.bin_count() <= rank {
                bin = bin.next().expect("ranks above the current bin remain");
            }
            Ok(bin)
        } else {
            let from_end = total - 1 - rank;
            let mut bin = self
                .last_non_empty_bin()
                .expect("histogram is non-empty since rank < total_count");
            while bin.greater_count() + bin.bin_count() <= from_end {
                bin = bin.previous().expect("ranks below the current bin remain");
            }
            Ok(bin)
        }
    }

    /// Iterates over all non-empty bins from the lowest index to the highest.
    fn non_empty_bins_ascending(&self) -> NonEmptyBinsAscending<'_, Self>
    where
        Self: Sized,
    {
        NonEmptyBinsAscending(self.first_non_empty_bin())
    }

    /// Iterates over all non-empty bins from the highest index to the lowest.
    fn non_empty_bins_descending(&self) -> NonEmptyBinsDescending<'_, Self>
    where
        Self: Sized,
    {
        NonEmptyBinsDescending(self.last_non_empty_bin())
    }

    /// An estimate of the sample value with the given zero-based rank, using the
    /// default (uniform) value estimator.
    ///
    /// Rank 0 yields the exact minimum and rank `total_count - 1` the exact maximum.
    fn value_at_rank(&self, rank: u64) -> Result<f64, QueryError>
    where
        Self: Sized,
    {
        self.value_at_rank_with(rank, ValueEstimator::default())
    }

    /// Like [`value_at_rank`](Histogram::value_at_rank) with an explicit estimator.
    fn value_at_rank_with(
        &self,
        rank: u64,
        value_estimator: ValueEstimator,
    ) -> Result<f64, QueryError>
    where
        Self: Sized,
    {
        value_estimator.estimate(self, rank)
    }

    /// An estimate of the given quantile with the default estimators.
    ///
    /// Returns NaN for an empty histogram and an error for quantiles outside
    /// `[0, 1]`.
    fn value_at_quantile(&self, quantile: f64) -> Result<f64, QueryError>
    where
        Self: Sized,
    {
        self.value_at_quantile_with(
            quantile,
            &SciPyQuantileEstimator::default(),
            ValueEstimator::default(),
        )
    }

    /// Like [`value_at_quantile`](Histogram::value_at_quantile) with explicit
    /// quantile and value estimators.
    fn value_at_quantile_with<Q: QuantileEstimator>(
        &self,
        quantile: f64,
        quantile_estimator: &Q,
        value_estimator: ValueEstimator,
    ) -> Result<f64, QueryError>
    where
        Self: Sized,
    {
        if !(quantile >= 0.0 && quantile <= 1.0) {
            return Err(QueryError::InvalidQuantile);
        }
        if self.is_empty() {
            return Ok(f64::NAN);
        }
        Ok(quantile_estimator.estimate_quantile(
            quantile,
            |rank| {
                value_estimator
                    .estimate(self, rank)
                    .expect("quantile estimators only request ranks below the total count")
            },
            self.total_count(),
        ))
    }

    /// An immutable snapshot of this histogram with cumulative counts and
    /// logarithmic-time rank lookup. Preprocessing a preprocessed histogram yields an
    /// identical snapshot.
    fn preprocess(&self) -> PreprocessedHistogram<Self::Layout>
    where
        Self: Sized,
        Self::Layout: Clone,
    {
        PreprocessedHistogram::of(self)
    }

    /// Serializes this histogram in the most recent (V1) wire format.
    ///
    /// The layout is not part of the encoding; the reader must be given an equal
    /// layout for the counts to keep their meaning.
    fn write<W: Write>(&self, sink: &mut W) -> Result<(), SerializeError>
    where
        Self: Sized,
    {
        serialization::write_v1(self, sink)
    }
}

/// A view of one non-empty histogram bin, carrying the counts below, inside and above
/// it.
pub struct Bin<'a, H> {
    histogram: &'a H,
    bin_index: i32,
    bin_count: u64,
    less_count: u64,
    greater_count: u64,
}

impl<'a, H> Clone for Bin<'a, H> {
    fn clone(&self) -> Bin<'a, H> {
        *self
    }
}

impl<'a, H> Copy for Bin<'a, H> {}

impl<'a, H> std::fmt::Debug for Bin<'a, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bin")
            .field("bin_index", &self.bin_index)
            .field("bin_count", &self.bin_count)
            .field("less_count", &self.less_count)
            .field("greater_count", &self.greater_count)
            .finish()
    }
}

impl<'a, H: Histogram> Bin<'a, H> {
    pub(crate) fn new(
        histogram: &'a H,
        bin_index: i32,
        bin_count: u64,
        less_count: u64,
        greater_count: u64,
    ) -> Bin<'a, H> {
        debug_assert!(bin_count > 0);
        debug_assert_eq!(
            less_count + bin_count + greater_count,
            histogram.total_count()
        );
        Bin {
            histogram,
            bin_index,
            bin_count,
            less_count,
            greater_count,
        }
    }

    /// The index of this bin.
    pub fn bin_index(&self) -> i32 {
        self.bin_index
    }

    /// The number of samples in this bin.
    pub fn bin_count(&self) -> u64 {
        self.bin_count
    }

    /// The number of samples in bins below this one.
    pub fn less_count(&self) -> u64 {
        self.less_count
    }

    /// The number of samples in bins above this one.
    pub fn greater_count(&self) -> u64 {
        self.greater_count
    }

    /// Whether this is the underflow bin.
    pub fn is_underflow(&self) -> bool {
        self.bin_index <= self.histogram.layout().underflow_bin_index()
    }

    /// Whether this is the overflow bin.
    pub fn is_overflow(&self) -> bool {
        self.bin_index >= self.histogram.layout().overflow_bin_index()
    }

    /// The lower bound of this bin, clamped to the histogram's recorded minimum so it
    /// is finite whenever the histogram holds no infinite samples.
    pub fn lower_bound(&self) -> f64 {
        let layout_bound = self.histogram.layout().bin_lower_bound(self.bin_index);
        let min = self.histogram.min();
        if layout_bound < min {
            min
        } else {
            layout_bound
        }
    }

    /// The upper bound of this bin, clamped to the histogram's recorded maximum.
    pub fn upper_bound(&self) -> f64 {
        let layout_bound = self.histogram.layout().bin_upper_bound(self.bin_index);
        let max = self.histogram.max();
        if layout_bound > max {
            max
        } else {
            layout_bound
        }
    }

    /// The next non-empty bin above this one, if any.
    pub fn next(self) -> Option<Bin<'a, H>> {
        if self.greater_count == 0 {
            return None;
        }
        let h = self.histogram;
        let less_count = self.less_count + self.bin_count;
        if let Some((first, last)) = h.regular_window() {
            let start = first.max(self.bin_index + 1);
            for bin_index in start..=last {
                let count = h.count(bin_index);
                if count > 0 {
                    return Some(Bin::new(
                        h,
                        bin_index,
                        count,
                        less_count,
                        self.greater_count - count,
                    ));
                }
            }
        }
        let count = h.overflow_count();
        debug_assert_eq!(count, self.greater_count);
        Some(Bin::new(
            h,
            h.layout().overflow_bin_index(),
            count,
            less_count,
            0,
        ))
    }

    /// The next non-empty bin below this one, if any.
    pub fn previous(self) -> Option<Bin<'a, H>> {
        if self.less_count == 0 {
            return None;
        }
        let h = self.histogram;
        let greater_count = self.greater_count + self.bin_count;
        if let Some((first, last)) = h.regular_window() {
            let end = last.min(self.bin_index - 1);
            if end >= first {
                for bin_index in (first..=end).rev() {
                    let count = h.count(bin_index);
                    if count > 0 {
                        return Some(Bin::new(
                            h,
                            bin_index,
                            count,
                            self.less_count - count,
                            greater_count,
                        ));
                    }
                }
            }
        }
        let count = h.underflow_count();
        debug_assert_eq!(count, self.less_count);
        Some(Bin::new(
            h,
            h.layout().underflow_bin_index(),
            count,
            0,
            greater_count,
        ))
    }
}

/// Iterator over non-empty bins in ascending index order; see
/// [`Histogram::non_empty_bins_ascending`].
pub struct NonEmptyBinsAscending<'a, H>(Option<Bin<'a, H>>);

impl<'a, H: Histogram> Iterator for NonEmptyBinsAscending<'a, H> {
    type Item = Bin<'a, H>;

    fn next(&mut self) -> Option<Bin<'a, H>> {
        let current = self.0?;
        self.0 = current.next();
        Some(current)
    }
}

/// Iterator over non-empty bins in descending index order; see
/// [`Histogram::non_empty_bins_descending`].
pub struct NonEmptyBinsDescending<'a, H>(Option<Bin<'a, H>>);

impl<'a, H: Histogram> Iterator for NonEmptyBinsDescending<'a, H> {
    type Item = Bin<'a, H>;

    fn next(&mut self) -> Option<Bin<'a, H>> {
        let current = self.0?;
        self.0 = current.previous();
        Some(current)
    }
}
