//! The version 1 wire format: dense/sparse-adaptive count payloads.
//!
//! Layout of an encoded histogram, after the version byte:
//!
//! ```text
//! info byte     bit 0: normal mode flag (0 = empty or single sample)
//!               bit 1: min < max flag (special mode: histogram non-empty)
//!               bits 2-3: effective regular count, saturating at 3
//!               bits 4-5: effective underflow count, saturating at 3
//!               bits 6-7: effective overflow count, saturating at 3
//! min           binary64, only when non-empty
//! max           binary64, only when min < max
//! underflow     unsigned varint of count - 3, only when saturated
//! overflow      unsigned varint of count - 3, only when saturated
//! bin indices   signed varints: (first, last) for the dense payload, (last, first)
//!               for the sparse one, a lone first when only 1 or 2 effective counts
//!               exist
//! payload       bit-packed: 6 bits count width, then either every bucket of the
//!               range (dense) or 5 bits gap width plus (gap - 1, count) pairs
//!               (sparse)
//! ```

use super::{
    check_extremes, checked_total, record_error_to_invalid_state, reincrement_extreme_bins,
    route_decoded_count, EffectiveCounts, SERIAL_VERSION_V1,
};
use crate::bitio::{
    read_signed_var_int, read_unsigned_var_long, write_signed_var_int, write_unsigned_var_long,
    BitReader, BitWriter,
};
use crate::errors::{DeserializeError, SerializeError};
use crate::histogram::{Histogram, MutableHistogram};
use crate::layout::Layout;
use crate::store::CounterStore;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

use crate::algorithms::map_double_to_long;

pub(crate) fn write<H: Histogram, W: Write>(
    histogram: &H,
    sink: &mut W,
) -> Result<(), SerializeError> {
    sink.write_u8(SERIAL_VERSION_V1)?;
    let total_count = histogram.total_count();
    if total_count == 0 {
        sink.write_u8(0x00)?;
        return Ok(());
    }
    if total_count == 1 {
        sink.write_u8(0x02)?;
        sink.write_f64::<BigEndian>(histogram.min())?;
        return Ok(());
    }

    let min = histogram.min();
    let max = histogram.max();
    let min_less_than_max = map_double_to_long(min) < map_double_to_long(max);
    let effective = EffectiveCounts::of(histogram);
    let effective_underflow = effective.effective_underflow_count();
    let effective_overflow = effective.effective_overflow_count();
    let effective_regular = effective.effective_regular_total_count();

    let info = 0x01
        | (u8::from(min_less_than_max) << 1)
        | ((effective_regular.min(3) as u8) << 2)
        | ((effective_underflow.min(3) as u8) << 4)
        | ((effective_overflow.min(3) as u8) << 6);
    sink.write_u8(info)?;
    sink.write_f64::<BigEndian>(min)?;
    if min_less_than_max {
        sink.write_f64::<BigEndian>(max)?;
    }
    if effective_underflow >= 3 {
        write_unsigned_var_long(sink, effective_underflow - 3)?;
    }
    if effective_overflow >= 3 {
        write_unsigned_var_long(sink, effective_overflow - 3)?;
    }

    if effective_regular == 0 {
        return Ok(());
    }
    let (first, last) = effective
        .first_and_last_index()
        .expect("effective regular counts exist");
    if effective_regular == 1 {
        write_signed_var_int(sink, first)?;
        return Ok(());
    }
    if effective_regular == 2 {
        write_signed_var_int(sink, first)?;
        write_signed_var_int(sink, last)?;
        return Ok(());
    }

    // Cost both payload encodings in bits and keep the smaller one.
    let mut max_count: u64 = 0;
    let mut non_zero_bins: u64 = 0;
    let mut max_gap_minus_one: u32 = 0;
    let mut previous_index: Option<i32> = None;
    for bin_index in first..=last {
        let count = effective.count(bin_index);
        if count > 0 {
            non_zero_bins += 1;
            max_count = max_count.max(count);
            if let Some(previous) = previous_index {
                let gap_minus_one = i64::from(bin_index) - i64::from(previous) - 1;
                max_gap_minus_one = max_gap_minus_one.max(gap_minus_one as u32);
            }
            previous_index = Some(bin_index);
        }
    }
    let bits_per_count = u64::from(64 - max_count.leading_zeros());
    let bits_for_diff_index = u64::from(32 - max_gap_minus_one.leading_zeros());
    let num_bins = (i64::from(last) - i64::from(first)) as u64 + 1;
    let dense_bits = 6 + num_bins * bits_per_count;
    let sparse_bits =
        6 + 5 + non_zero_bins * bits_per_count + (non_zero_bins - 1) * bits_for_diff_index;
    let dense = dense_bits <= sparse_bits;

    if dense {
        write_signed_var_int(sink, first)?;
        write_signed_var_int(sink, last)?;
    } else {
        // Reversed index order marks the sparse payload for the decoder.
        write_signed_var_int(sink, last)?;
        write_signed_var_int(sink, first)?;
    }
    let mut writer = BitWriter::new(sink);
    writer.write_bits(6, bits_per_count)?;
    if dense {
        for bin_index in first..=last {
            writer.write_bits(bits_per_count as u32, effective.count(bin_index))?;
        }
    } else {
        writer.write_bits(5, bits_for_diff_index)?;
        let mut previous_index: Option<i32> = None;
        for bin_index in first..=last {
            let count = effective.count(bin_index);
            if count == 0 {
                continue;
            }
            if let Some(previous) = previous_index {
                if bits_for_diff_index > 0 {
                    let gap_minus_one = i64::from(bin_index) - i64::from(previous) - 1;
                    writer.write_bits(bits_for_diff_index as u32, gap_minus_one as u64)?;
                }
            }
            writer.write_bits(bits_per_count as u32, count)?;
            previous_index = Some(bin_index);
        }
    }
    writer.finish()?;
    Ok(())
}

pub(crate) fn read_into<L: Layout, S: CounterStore, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<MutableHistogram<L, S>, DeserializeError> {
    let info = source.read_u8()?;
    let mut histogram = MutableHistogram::new(layout);
    if info & 0x01 == 0 {
        if info & 0x02 != 0 {
            let value = source.read_f64::<BigEndian>()?;
            histogram.add(value).map_err(record_error_to_invalid_state)?;
        }
        return Ok(histogram);
    }

    let min = source.read_f64::<BigEndian>()?;
    let max = if info & 0x02 != 0 {
        source.read_f64::<BigEndian>()?
    } else {
        min
    };
    check_extremes(min, max)?;

    let mut effective_underflow = u64::from((info >> 4) & 0x03);
    if effective_underflow == 3 {
        effective_underflow = 3u64
            .checked_add(read_unsigned_var_long(source)?)
            .ok_or(DeserializeError::InvalidHistogramState)?;
    }
    let mut effective_overflow = u64::from((info >> 6) & 0x03);
    if effective_overflow == 3 {
        effective_overflow = 3u64
            .checked_add(read_unsigned_var_long(source)?)
            .ok_or(DeserializeError::InvalidHistogramState)?;
    }

    let underflow_bin_index = histogram.layout().underflow_bin_index();
    let overflow_bin_index = histogram.layout().overflow_bin_index();
    let min_bin_index = histogram.layout().map_to_bin_index(min);
    let max_bin_index = histogram.layout().map_to_bin_index(max);

    let mut underflow_count = effective_underflow;
    let mut overflow_count = effective_overflow;
    let mut regular_sum: u64 = 0;
    match (info >> 2) & 0x03 {
        0 => {}
        1 => {
            let first = read_signed_var_int(source)?;
            route_decoded_count(
                &mut histogram,
                first,
                1,
                &mut underflow_count,
                &mut overflow_count,
            );
            regular_sum = 1;
        }
        2 => {
            let first = read_signed_var_int(source)?;
            let last = read_signed_var_int(source)?;
            if first > last {
                return Err(DeserializeError::InvalidHistogramState);
            }
            for bin_index in [first, last] {
                route_decoded_count(
                    &mut histogram,
                    bin_index,
                    1,
                    &mut underflow_count,
                    &mut overflow_count,
                );
            }
            regular_sum = 2;
        }
        _ => {
            let a = read_signed_var_int(source)?;
            let b = read_signed_var_int(source)?;
            // A reversed index pair marks the sparse payload.
            let dense = a <= b;
            let (first, last) = if dense { (a, b) } else { (b, a) };

            let mut reader = BitReader::new(source);
            let bits_per_count = reader.read_bits(6)? as u32;
            if bits_per_count == 0 {
                return Err(DeserializeError::InvalidHistogramState);
            }
            // Grow the store once, over the union of the payload range and the bins
            // that will take the min/max re-increments, clipped to the regular range.
            let alloc_first = first.min(min_bin_index).max(underflow_bin_index + 1);
            let alloc_last = last.max(max_bin_index).min(overflow_bin_index - 1);
            if alloc_first <= alloc_last {
                let max_representable = (1u64 << bits_per_count) - 1;
                histogram
                    .store_mut()
                    .reserve(alloc_first, alloc_last, max_representable);
            }

            if dense {
                for bin_index in first..=last {
                    let count = reader.read_bits(bits_per_count)?;
                    regular_sum = checked_total(&[regular_sum, count])?;
                    route_decoded_count(
                        &mut histogram,
                        bin_index,
                        count,
                        &mut underflow_count,
                        &mut overflow_count,
                    );
                }
            } else {
                let bits_for_diff_index = reader.read_bits(5)? as u32;
                let mut bin_index = first;
                let count = reader.read_bits(bits_per_count)?;
                regular_sum = checked_total(&[regular_sum, count])?;
                route_decoded_count(
                    &mut histogram,
                    bin_index,
                    count,
                    &mut underflow_count,
                    &mut overflow_count,
                );
                while bin_index < last {
                    let gap_minus_one = if bits_for_diff_index > 0 {
                        reader.read_bits(bits_for_diff_index)?
                    } else {
                        0
                    };
                    let next = i64::from(bin_index) + gap_minus_one as i64 + 1;
                    if next > i64::from(last) {
                        return Err(DeserializeError::InvalidHistogramState);
                    }
                    bin_index = next as i32;
                    let count = reader.read_bits(bits_per_count)?;
                    regular_sum = checked_total(&[regular_sum, count])?;
                    route_decoded_count(
                        &mut histogram,
                        bin_index,
                        count,
                        &mut underflow_count,
                        &mut overflow_count,
                    );
                }
            }
        }
    }

    reincrement_extreme_bins(
        &mut histogram,
        min_bin_index,
        &mut underflow_count,
        &mut overflow_count,
    );
    reincrement_extreme_bins(
        &mut histogram,
        max_bin_index,
        &mut underflow_count,
        &mut overflow_count,
    );
    let total_count = checked_total(&[effective_underflow, effective_overflow, regular_sum, 2])?;
    histogram.set_state(total_count, underflow_count, overflow_count, min, max);
    Ok(histogram)
}
