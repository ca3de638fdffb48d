//! The recordable histogram representations.

use super::{Histogram, PreprocessedHistogram};
use crate::algorithms::find_first;
use crate::errors::RecordError;
use crate::estimators::ValueEstimator;
use crate::layout::Layout;
use crate::store::{CounterStore, DynamicCounterStore, StaticCounterStore};

const NEGATIVE_ZERO_BITS: u64 = 0x8000_0000_0000_0000;
const POSITIVE_ZERO_BITS: u64 = 0x0000_0000_0000_0000;

/// A histogram over a dynamically growing, bit-packed counter store. Updates are
/// constant-time except when the store has to widen, which happens at most once per
/// update.
pub type DynamicHistogram<L> = MutableHistogram<L, DynamicCounterStore>;

/// A histogram with the whole regular bin range allocated up front, one 64-bit counter
/// per bin. Updates never allocate, at the price of a memory footprint proportional to
/// the layout's bin count.
pub type StaticHistogram<L> = MutableHistogram<L, StaticCounterStore>;

/// A recordable histogram, generic over its counter store. Use through the
/// [`DynamicHistogram`] and [`StaticHistogram`] aliases.
#[derive(Debug, Clone)]
pub struct MutableHistogram<L, S> {
    layout: L,
    total_count: u64,
    underflow_count: u64,
    overflow_count: u64,
    min: f64,
    max: f64,
    store: S,
}

impl<L: Layout, S: CounterStore> MutableHistogram<L, S> {
    /// Creates an empty histogram over the given layout.
    pub fn new(layout: L) -> MutableHistogram<L, S> {
        let store = S::new(layout.underflow_bin_index(), layout.overflow_bin_index());
        MutableHistogram {
            layout,
            total_count: 0,
            underflow_count: 0,
            overflow_count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            store,
        }
    }

    /// Records a single value.
    ///
    /// Returns an error for NaN values and when the total count would exceed
    /// `i64::MAX`; the histogram is left unchanged on error.
    pub fn add(&mut self, value: f64) -> Result<(), RecordError> {
        self.add_with_count(value, 1)
    }

    /// Records a value `count` times.
    ///
    /// Returns an error for NaN values and when the total count would exceed
    /// `i64::MAX`; the histogram is left unchanged on error.
    pub fn add_with_count(&mut self, value: f64, count: u64) -> Result<(), RecordError> {
        if value.is_nan() {
            return Err(RecordError::ValueIsNan);
        }
        let new_total_count = self
            .total_count
            .checked_add(count)
            .filter(|&t| t <= i64::MAX as u64)
            .ok_or(RecordError::TotalCountOverflow)?;
        if count == 0 {
            return Ok(());
        }
        let bin_index = self.layout.map_to_bin_index(value);
        if bin_index <= self.layout.underflow_bin_index() {
            self.underflow_count += count;
        } else if bin_index >= self.layout.overflow_bin_index() {
            self.overflow_count += count;
        } else {
            self.store.increase(bin_index, count);
        }
        self.update_min_max(value);
        self.total_count = new_total_count;
        Ok(())
    }

    /// Records `length` values of a monotonically non-decreasing sequence, given as a
    /// function from the zero-based sequence index to the value.
    ///
    /// Runs of values falling into the same bin are located with a galloping binary
    /// search and recorded as one bulk update, so the cost grows with the number of
    /// distinct bins touched rather than with `length`.
    pub fn add_ascending_sequence<F: FnMut(u64) -> f64>(
        &mut self,
        mut value_at: F,
        length: u64,
    ) -> Result<(), RecordError> {
        if length == 0 {
            return Ok(());
        }
        if self
            .total_count
            .checked_add(length)
            .filter(|&t| t <= i64::MAX as u64)
            .is_none()
        {
            return Err(RecordError::TotalCountOverflow);
        }
        // The last element goes first so the maximum is an exact sample.
        self.add_with_count(value_at(length - 1), 1)?;
        let limit = (length - 1) as i64;
        let mut index: i64 = 0;
        let mut previous_run: i64 = 1;
        while index < limit {
            let value = value_at(index as u64);
            let bin_index = self.layout.map_to_bin_index(value);
            let layout = &self.layout;
            let next = find_first(
                |i| i == limit || layout.map_to_bin_index(value_at(i as u64)) > bin_index,
                index,
                limit,
                (index + previous_run).min(limit).max(index),
            );
            self.add_with_count(value, (next - index) as u64)?;
            previous_run = next - index;
            index = next;
        }
        Ok(())
    }

    /// Adds all samples of another histogram over the same layout type, using the
    /// default (uniform) value estimator if resampling is needed.
    pub fn add_histogram<H>(&mut self, other: &H) -> Result<(), RecordError>
    where
        H: Histogram<Layout = L>,
        L: PartialEq + Clone,
    {
        self.add_histogram_with(other, ValueEstimator::default())
    }

    /// Adds all samples of another histogram over the same layout type.
    ///
    /// When the layouts are equal the bins are merged count-for-count and the other
    /// histogram's exact minimum and maximum are folded in, so the merge is lossless
    /// and independent of merge order. When the layouts differ, the other histogram is
    /// resampled through its preprocessed copy: each of its samples is re-recorded at
    /// the value the estimator reconstructs for its rank.
    pub fn add_histogram_with<H>(
        &mut self,
        other: &H,
        value_estimator: ValueEstimator,
    ) -> Result<(), RecordError>
    where
        H: Histogram<Layout = L>,
        L: PartialEq + Clone,
    {
        if other.is_empty() {
            return Ok(());
        }
        if self.layout == *other.layout() {
            let new_total_count = self
                .total_count
                .checked_add(other.total_count())
                .filter(|&t| t <= i64::MAX as u64)
                .ok_or(RecordError::TotalCountOverflow)?;
            self.underflow_count += other.underflow_count();
            self.overflow_count += other.overflow_count();
            if let Some((first, last)) = other.regular_window() {
                for bin_index in first..=last {
                    let count = other.count(bin_index);
                    if count > 0 {
                        self.store.increase(bin_index, count);
                    }
                }
            }
            self.update_min_max(other.min());
            self.update_min_max(other.max());
            self.total_count = new_total_count;
            Ok(())
        } else {
            let copy = other.preprocess();
            self.add_ascending_sequence(
                |rank| {
                    copy.value_at_rank_with(rank, value_estimator)
                        .expect("rank is below the copy's total count")
                },
                other.total_count(),
            )
        }
    }

    /// Updates min and max by raw bit comparison where ordinary comparison cannot
    /// distinguish the operands, so that `-0.0` and `+0.0` keep their identity.
    fn update_min_max(&mut self, value: f64) {
        if value <= self.min && (value < self.min || value.to_bits() == NEGATIVE_ZERO_BITS) {
            self.min = value;
        }
        if value >= self.max && (value > self.max || value.to_bits() == POSITIVE_ZERO_BITS) {
            self.max = value;
        }
    }

    pub(crate) fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub(crate) fn set_state(
        &mut self,
        total_count: u64,
        underflow_count: u64,
        overflow_count: u64,
        min: f64,
        max: f64,
    ) {
        self.total_count = total_count;
        self.underflow_count = underflow_count;
        self.overflow_count = overflow_count;
        self.min = min;
        self.max = max;
    }
}

impl<L: Layout, S: CounterStore> Histogram for MutableHistogram<L, S> {
    type Layout = L;

    fn layout(&self) -> &L {
        &self.layout
    }

    fn total_count(&self) -> u64 {
        self.total_count
    }

    fn underflow_count(&self) -> u64 {
        self.underflow_count
    }

    fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    fn min(&self) -> f64 {
        self.min
    }

    fn max(&self) -> f64 {
        self.max
    }

    fn count(&self, bin_index: i32) -> u64 {
        if bin_index <= self.layout.underflow_bin_index() {
            self.underflow_count
        } else if bin_index >= self.layout.overflow_bin_index() {
            self.overflow_count
        } else {
            self.store.count(bin_index)
        }
    }

    fn regular_window(&self) -> Option<(i32, i32)> {
        self.store.window()
    }
}

impl<L, S> PartialEq for MutableHistogram<L, S>
where
    L: Layout + PartialEq,
    S: CounterStore,
{
    fn eq(&self, other: &MutableHistogram<L, S>) -> bool {
        if self.layout != other.layout
            || self.total_count != other.total_count
            || self.underflow_count != other.underflow_count
            || self.overflow_count != other.overflow_count
            || self.min.to_bits() != other.min.to_bits()
            || self.max.to_bits() != other.max.to_bits()
        {
            return false;
        }
        // Equal logical counts may sit in differently sized backing windows.
        let ranges = (self.store.window(), other.store.window());
        let (first, last) = match ranges {
            (None, None) => return true,
            (Some(a), None) | (None, Some(a)) => a,
            (Some(a), Some(b)) => (a.0.min(b.0), a.1.max(b.1)),
        };
        (first..=last).all(|i| self.store.count(i) == other.store.count(i))
    }
}
