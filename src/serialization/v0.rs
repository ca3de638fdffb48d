//! The version 0 wire format: fixed-width count payloads.
//!
//! Layout of an encoded histogram, after the version byte:
//!
//! ```text
//! info byte     bits 0-2: 0 = special mode (empty or single sample), otherwise the
//!               payload counter mode + 1 (counters take 2^mode bits)
//!               bit 3: min < max flag (special mode: histogram non-empty)
//!               bits 4-5: effective regular count, saturating at 3
//!               bit 6: effective underflow count >= 1
//!               bit 7: effective overflow count >= 1
//! min           binary64, only when non-empty
//! max           binary64, only when min < max
//! underflow     unsigned varint of count - 1, only when flagged
//! overflow      unsigned varint of count - 1, only when flagged
//! bin indices   signed varints: first, then last when at least 2 effective counts
//!               exist
//! payload       every bucket of [first, last] at 2^mode bits per count, only when at
//!               least 3 effective counts exist
//! ```

use super::{
    check_extremes, checked_total, record_error_to_invalid_state, reincrement_extreme_bins,
    route_decoded_count, EffectiveCounts, SERIAL_VERSION_V0,
};
use crate::algorithms::map_double_to_long;
use crate::bitio::{
    read_signed_var_int, read_unsigned_var_long, write_signed_var_int, write_unsigned_var_long,
    BitReader, BitWriter,
};
use crate::errors::{DeserializeError, SerializeError};
use crate::histogram::{Histogram, MutableHistogram};
use crate::layout::Layout;
use crate::store::{determine_required_mode, CounterStore};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

pub(crate) fn write<H: Histogram, W: Write>(
    histogram: &H,
    sink: &mut W,
) -> Result<(), SerializeError> {
    sink.write_u8(SERIAL_VERSION_V0)?;
    let total_count = histogram.total_count();
    if total_count == 0 {
        sink.write_u8(0x00)?;
        return Ok(());
    }
    if total_count == 1 {
        sink.write_u8(0x08)?;
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

    let first_and_last = effective.first_and_last_index();
    let mode = match first_and_last {
        Some((first, last)) if effective_regular >= 3 => {
            let max_count = (first..=last)
                .map(|bin_index| effective.count(bin_index))
                .max()
                .unwrap_or(0);
            determine_required_mode(max_count)
        }
        _ => 0,
    };

    let info = (mode + 1)
        | (u8::from(min_less_than_max) << 3)
        | ((effective_regular.min(3) as u8) << 4)
        | (u8::from(effective_underflow >= 1) << 6)
        | (u8::from(effective_overflow >= 1) << 7);
    sink.write_u8(info)?;
    sink.write_f64::<BigEndian>(min)?;
    if min_less_than_max {
        sink.write_f64::<BigEndian>(max)?;
    }
    if effective_underflow >= 1 {
        write_unsigned_var_long(sink, effective_underflow - 1)?;
    }
    if effective_overflow >= 1 {
        write_unsigned_var_long(sink, effective_overflow - 1)?;
    }

    if let Some((first, last)) = first_and_last {
        write_signed_var_int(sink, first)?;
        if effective_regular >= 2 {
            write_signed_var_int(sink, last)?;
        }
        if effective_regular >= 3 {
            let bits_per_count = 1u32 << mode;
            let mut writer = BitWriter::new(sink);
            for bin_index in first..=last {
                writer.write_bits(bits_per_count, effective.count(bin_index))?;
            }
            writer.finish()?;
        }
    }
    Ok(())
}

pub(crate) fn read_into<L: Layout, S: CounterStore, R: Read>(
    layout: L,
    source: &mut R,
) -> Result<MutableHistogram<L, S>, DeserializeError> {
    let info = source.read_u8()?;
    let mut histogram = MutableHistogram::new(layout);
    if info & 0x07 == 0 {
        if info & 0x08 != 0 {
            let value = source.read_f64::<BigEndian>()?;
            histogram.add(value).map_err(record_error_to_invalid_state)?;
        }
        return Ok(histogram);
    }
    let mode = (info & 0x07) - 1;

    let min = source.read_f64::<BigEndian>()?;
    let max = if info & 0x08 != 0 {
        source.read_f64::<BigEndian>()?
    } else {
        min
    };
    check_extremes(min, max)?;

    let effective_underflow = if info & 0x40 != 0 {
        1u64.checked_add(read_unsigned_var_long(source)?)
            .ok_or(DeserializeError::InvalidHistogramState)?
    } else {
        0
    };
    let effective_overflow = if info & 0x80 != 0 {
        1u64.checked_add(read_unsigned_var_long(source)?)
            .ok_or(DeserializeError::InvalidHistogramState)?
    } else {
        0
    };

    let underflow_bin_index = histogram.layout().underflow_bin_index();
    let overflow_bin_index = histogram.layout().overflow_bin_index();
    let min_bin_index = histogram.layout().map_to_bin_index(min);
    let max_bin_index = histogram.layout().map_to_bin_index(max);

    let mut underflow_count = effective_underflow;
    let mut overflow_count = effective_overflow;
    let mut regular_sum: u64 = 0;
    match (info >> 4) & 0x03 {
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
            let first = read_signed_var_int(source)?;
            let last = read_signed_var_int(source)?;
            if first > last {
                return Err(DeserializeError::InvalidHistogramState);
            }
            let alloc_first = first.min(min_bin_index).max(underflow_bin_index + 1);
            let alloc_last = last.max(max_bin_index).min(overflow_bin_index - 1);
            let bits_per_count = 1u32 << mode;
            if alloc_first <= alloc_last {
                let max_representable = if mode >= 6 {
                    u64::MAX
                } else {
                    (1u64 << bits_per_count) - 1
                };
                histogram
                    .store_mut()
                    .reserve(alloc_first, alloc_last, max_representable);
            }
            let mut reader = BitReader::new(source);
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
