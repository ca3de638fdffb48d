//! The immutable, query-optimized histogram representation.

use super::{Bin, Histogram};
use crate::errors::QueryError;
use crate::layout::Layout;

/// An immutable histogram snapshot holding its non-empty bins as index and cumulative
/// count arrays.
///
/// Rank lookups binary-search the cumulative counts, so
/// [`bin_by_rank`](Histogram::bin_by_rank) and everything built on it (value and
/// quantile queries) cost `O(log N)` in the number of non-empty bins instead of the
/// mutable representations' linear scan. The snapshot cannot record values; it is
/// freely shareable and preprocessing it again yields an identical snapshot.
#[derive(Debug, Clone)]
pub struct PreprocessedHistogram<L> {
    layout: L,
    total_count: u64,
    underflow_count: u64,
    overflow_count: u64,
    min: f64,
    max: f64,
    // Non-empty bins in ascending index order; parallel arrays, the second holding
    // inclusive cumulative counts.
    bin_indices: Vec<i32>,
    accumulated_counts: Vec<u64>,
}

impl<L: Layout + Clone> PreprocessedHistogram<L> {
    /// Snapshots any histogram into the preprocessed representation.
    pub fn of<H: Histogram<Layout = L>>(histogram: &H) -> PreprocessedHistogram<L> {
        let mut bin_indices = Vec::new();
        let mut accumulated_counts = Vec::new();
        let mut running_total = 0u64;
        for bin in histogram.non_empty_bins_ascending() {
            running_total += bin.bin_count();
            bin_indices.push(bin.bin_index());
            accumulated_counts.push(running_total);
        }
        PreprocessedHistogram {
            layout: histogram.layout().clone(),
            total_count: histogram.total_count(),
            underflow_count: histogram.underflow_count(),
            overflow_count: histogram.overflow_count(),
            min: histogram.min(),
            max: histogram.max(),
            bin_indices,
            accumulated_counts,
        }
    }
}

impl<L: Layout> PreprocessedHistogram<L> {
    fn entry(&self, position: usize) -> Bin<'_, PreprocessedHistogram<L>> {
        let accumulated = self.accumulated_counts[position];
        let less_count = if position == 0 {
            0
        } else {
            self.accumulated_counts[position - 1]
        };
        Bin::new(
            self,
            self.bin_indices[position],
            accumulated - less_count,
            less_count,
            self.total_count - accumulated,
        )
    }
}

impl<L: Layout> Histogram for PreprocessedHistogram<L> {
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
            match self.bin_indices.binary_search(&bin_index) {
                Ok(position) => {
                    let less_count = if position == 0 {
                        0
                    } else {
                        self.accumulated_counts[position - 1]
                    };
                    self.accumulated_counts[position] - less_count
                }
                Err(_) => 0,
            }
        }
    }

    fn regular_window(&self) -> Option<(i32, i32)> {
        let underflow_bin_index = self.layout.underflow_bin_index();
        let overflow_bin_index = self.layout.overflow_bin_index();
        let is_regular = |i: i32| i > underflow_bin_index && i < overflow_bin_index;
        let first = self.bin_indices.iter().copied().find(|&i| is_regular(i))?;
        let last = self
            .bin_indices
            .iter()
            .rev()
            .copied()
            .find(|&i| is_regular(i))?;
        Some((first, last))
    }

    fn first_non_empty_bin(&self) -> Option<Bin<'_, PreprocessedHistogram<L>>> {
        if self.is_empty() {
            None
        } else {
            Some(self.entry(0))
        }
    }

    fn last_non_empty_bin(&self) -> Option<Bin<'_, PreprocessedHistogram<L>>> {
        if self.is_empty() {
            None
        } else {
            Some(self.entry(self.bin_indices.len() - 1))
        }
    }

    fn bin_by_rank(&self, rank: u64) -> Result<Bin<'_, PreprocessedHistogram<L>>, QueryError> {
        if rank >= self.total_count {
            return Err(QueryError::RankOutOfBounds);
        }
        let position = self.accumulated_counts.partition_point(|&c| c <= rank);
        Ok(self.entry(position))
    }
}

impl<L: Layout + PartialEq> PartialEq for PreprocessedHistogram<L> {
    fn eq(&self, other: &PreprocessedHistogram<L>) -> bool {
        self.layout == other.layout
            && self.total_count == other.total_count
            && self.underflow_count == other.underflow_count
            && self.overflow_count == other.overflow_count
            && self.min.to_bits() == other.min.to_bits()
            && self.max.to_bits() == other.max.to_bits()
            && self.bin_indices == other.bin_indices
            && self.accumulated_counts == other.accumulated_counts
    }
}
