//! Serialization/deserialization support.
//!
//! Histograms encode into a compact, self-descriptive binary format intended for
//! archival or transmission to other systems for further analysis. A typical use case
//! is to periodically serialize a histogram, ship it somewhere central, and merge many
//! deserialized histograms for aggregate analysis: unlike stored quantiles, merged
//! histograms still answer quantile queries correctly over the whole population.
//!
//! Two format versions exist, distinguished by their first byte. Version 1 is what
//! [`Histogram::write`] emits; version 0 is the predecessor, kept so that previously
//! stored histograms remain readable, and both stay covered by the same round-trip
//! tests. The reader dispatches on the version byte, so one set of read functions
//! handles either format.
//!
//! Both versions share the same core tricks:
//!
//! - The exact minimum and maximum are stored as raw binary64 values and their two
//!   contributions are *subtracted* from their buckets, so the common cases "empty",
//!   "one sample" and "two samples" collapse into a couple of bytes and every reader
//!   can restore exact min/max.
//! - Counter payloads are bit-packed at a width derived from the largest count that
//!   actually occurs, not the counter width in memory.
//! - Version 1 additionally costs a dense encoding (every bucket in the covered
//!   range) against a sparse one (only non-zero buckets plus their index gaps) and
//!   picks whichever is smaller in bits.
//!
//! The layout is deliberately *not* part of the encoding. The caller supplies a layout
//! when reading, and only counts are transported; producer and consumer must agree on
//! the layout for bin indices to keep their meaning, though total count, minimum and
//! maximum survive reading under any layout.
//!
//! # Examples
//!
//! ```
//! use dynahist::layout::LogQuadraticLayout;
//! use dynahist::{DynamicHistogram, Histogram};
//! use dynahist::serialization;
//!
//! let layout = LogQuadraticLayout::new(1e-5, 1e-2, 0.0, 1e6).unwrap();
//! let mut histogram = DynamicHistogram::new(layout.clone());
//! histogram.add(42.0).unwrap();
//! histogram.add(1234.5).unwrap();
//!
//! let mut buf = Vec::new();
//! histogram.write(&mut buf).unwrap();
//!
//! let restored = serialization::read_as_dynamic(layout, &mut buf.as_slice()).unwrap();
//! assert_eq!(histogram, restored);
//! ```

use crate::errors::{DeserializeError, RecordError, SerializeError};
use crate::histogram::{DynamicHistogram, Histogram, MutableHistogram, PreprocessedHistogram, StaticHistogram};
use crate::layout::Layout;
use crate::store::CounterStore;
use byteorder::ReadBytesExt;
use std::io::{Read, Write};

mod v0;
mod v1;


pub(crate) const SERIAL_VERSION_V0: u8 = 0x00;
pub(crate) const SERIAL_VERSION_V1: u8 = 0x01;

/// Serializes a histogram in the version 0 wire format. Prefer
/// [`Histogram::write`]; this exists for compatibility with stored data and for
/// cross-version tests.
pub fn write_v0<H: Histogram, W: Write>(
    histogram: &H,
    sink: &mut W,
) -> Result<(), SerializeError> {
    v0::write(histogram, sink)
}

/// Serializes a histogram in the version 1 wire format, equivalent to
/// [`Histogram::write`].
pub fn write_v1<H: Histogram, W: Write>(
    histogram: &H,
    sink: &mut W,
) -> Result<(), SerializeError> {
    v1::write(histogram, sink)
}

/// Reads a histogram of either format version into a [`DynamicHistogram`] over the
/// given layout.
pub fn read_as_dynamic<L: Layout, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<DynamicHistogram<L>, DeserializeError> {
    read_into(layout, source)
}

/// Reads a histogram of either format version into a [`StaticHistogram`] over the
/// given layout.
pub fn read_as_static<L: Layout, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<StaticHistogram<L>, DeserializeError> {
    read_into(layout, source)
}

/// Reads a histogram of either format version into a [`PreprocessedHistogram`] over
/// the given layout.
pub fn read_as_preprocessed<L: Layout + Clone, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<PreprocessedHistogram<L>, DeserializeError> {
    Ok(read_as_dynamic(layout, source)?.preprocess())
}

fn read_into<L: Layout, S: CounterStore, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<MutableHistogram<L, S>, DeserializeError> {
    match source.read_u8()? {
        SERIAL_VERSION_V0 => v0::read_into(layout, source),
        SERIAL_VERSION_V1 => v1::read_into(layout, source),
        version => Err(DeserializeError::UnknownSerialVersion(version)),
    }
}

/// The encoder-side view of a non-special histogram with the min and max sample
/// contributions subtracted from their buckets.
pub(crate) struct EffectiveCounts<'a, H> {
    histogram: &'a H,
    min_bin_index: i32,
    max_bin_index: i32,
    effective_underflow_count: u64,
    effective_overflow_count: u64,
    effective_regular_total_count: u64,
}

impl<'a, H: Histogram> EffectiveCounts<'a, H> {
    /// Requires `histogram.total_count() >= 2` so that min and max are two
    /// subtractable sample contributions.
    pub(crate) fn of(histogram: &'a H) -> EffectiveCounts<'a, H> {
        debug_assert!(histogram.total_count() >= 2);
        let layout = histogram.layout();
        let underflow_bin_index = layout.underflow_bin_index();
        let overflow_bin_index = layout.overflow_bin_index();
        let min_bin_index = layout.map_to_bin_index(histogram.min());
        let max_bin_index = layout.map_to_bin_index(histogram.max());

        let in_underflow = |i: i32| i <= underflow_bin_index;
        let in_overflow = |i: i32| i >= overflow_bin_index;
        let effective_underflow_count = histogram.underflow_count()
            - u64::from(in_underflow(min_bin_index))
            - u64::from(in_underflow(max_bin_index));
        let effective_overflow_count = histogram.overflow_count()
            - u64::from(in_overflow(min_bin_index))
            - u64::from(in_overflow(max_bin_index));
        let regular_total_count =
            histogram.total_count() - histogram.underflow_count() - histogram.overflow_count();
        let effective_regular_total_count = regular_total_count
            - u64::from(!in_underflow(min_bin_index) && !in_overflow(min_bin_index))
            - u64::from(!in_underflow(max_bin_index) && !in_overflow(max_bin_index));

        EffectiveCounts {
            histogram,
            min_bin_index,
            max_bin_index,
            effective_underflow_count,
            effective_overflow_count,
            effective_regular_total_count,
        }
    }

    pub(crate) fn effective_underflow_count(&self) -> u64 {
        self.effective_underflow_count
    }

    pub(crate) fn effective_overflow_count(&self) -> u64 {
        self.effective_overflow_count
    }

    pub(crate) fn effective_regular_total_count(&self) -> u64 {
        self.effective_regular_total_count
    }

    /// The effective count of a regular bin: the raw count minus the min/max sample
    /// contributions. Bin indices never collide with the extreme bins routed to
    /// underflow or overflow, so no further routing check is needed here.
    pub(crate) fn count(&self, bin_index: i32) -> u64 {
        let mut count = self.histogram.count(bin_index);
        if bin_index == self.min_bin_index {
            count -= 1;
        }
        if bin_index == self.max_bin_index {
            count -= 1;
        }
        count
    }

    /// First and last regular bin index with a non-zero effective count; `None` when
    /// the effective regular total count is zero.
    pub(crate) fn first_and_last_index(&self) -> Option<(i32, i32)> {
        if self.effective_regular_total_count == 0 {
            return None;
        }
        let (window_first, window_last) = self
            .histogram
            .regular_window()
            .expect("a non-zero effective regular count requires backed regular bins");
        let first = (window_first..=window_last).find(|&i| self.count(i) > 0);
        let last = (window_first..=window_last).rev().find(|&i| self.count(i) > 0);
        match (first, last) {
            (Some(first), Some(last)) => Some((first, last)),
            _ => None,
        }
    }
}

/// Decoder-side helper: places a decoded bucket count under the *reader's* layout.
/// Bin indices that fall outside the reader's regular range (possible when reading
/// under a layout other than the writer's) route to the underflow/overflow tallies,
/// so the total count survives any layout change.
pub(crate) fn route_decoded_count<L: Layout, S: CounterStore>(
    histogram: &mut MutableHistogram<L, S>,
    bin_index: i32,
    count: u64,
    underflow_count: &mut u64,
    overflow_count: &mut u64,
) {
    if count == 0 {
        return;
    }
    if bin_index <= histogram.layout().underflow_bin_index() {
        *underflow_count = underflow_count.saturating_add(count);
    } else if bin_index >= histogram.layout().overflow_bin_index() {
        *overflow_count = overflow_count.saturating_add(count);
    } else {
        histogram.store_mut().increase(bin_index, count);
    }
}

/// Decoder-side helper: restores the two samples carried by the serialized min and
/// max, routing each to underflow, overflow or its regular bin. Regular re-increments
/// clip at the current counter capacity instead of widening, which keeps the decoder
/// byte-compatible with lenient historical readers of over-full version 0 payloads.
pub(crate) fn reincrement_extreme_bins<L: Layout, S: CounterStore>(
    histogram: &mut MutableHistogram<L, S>,
    bin_index: i32,
    underflow_count: &mut u64,
    overflow_count: &mut u64,
) {
    let underflow_bin_index = histogram.layout().underflow_bin_index();
    let overflow_bin_index = histogram.layout().overflow_bin_index();
    if bin_index <= underflow_bin_index {
        *underflow_count += 1;
    } else if bin_index >= overflow_bin_index {
        *overflow_count += 1;
    } else {
        histogram.store_mut().increase_saturating(bin_index, 1);
    }
}

/// Checks the serialized min/max pair: NaN never appears in a valid encoding, and the
/// pair must respect the sign-aware order.
pub(crate) fn check_extremes(min: f64, max: f64) -> Result<(), DeserializeError> {
    use crate::algorithms::map_double_to_long;
    if min.is_nan() || max.is_nan() || map_double_to_long(min) > map_double_to_long(max) {
        return Err(DeserializeError::InvalidHistogramState);
    }
    Ok(())
}

pub(crate) fn record_error_to_invalid_state(_: RecordError) -> DeserializeError {
    DeserializeError::InvalidHistogramState
}

/// Accumulates decoded counts, rejecting totals the histogram could never have
/// recorded.
pub(crate) fn checked_total(parts: &[u64]) -> Result<u64, DeserializeError> {
    let mut total: u64 = 0;
    for &part in parts {
        total = total
            .checked_add(part)
            .filter(|&t| t <= i64::MAX as u64)
            .ok_or(DeserializeError::InvalidHistogramState)?;
    }
    Ok(total)
}
