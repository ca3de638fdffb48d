//! Bin layouts: pure mappings between values and bin indices.
//!
//! A layout partitions the binary64 value line into a contiguous run of bins. Every
//! value maps to a signed 32-bit bin index; indices at or below the underflow index and
//! at or above the overflow index denote the two unbounded catch-all bins, everything
//! between them is a regular bin with a width guarantee. Layouts are immutable value
//! types: histograms keep a layout and never change it, and two histograms can only be
//! merged directly when their layouts compare equal.
//!
//! The log-family layouts ([`LogLinearLayout`], [`LogQuadraticLayout`],
//! [`LogOptimalLayout`]) derive the index from the raw bit pattern of the value, so the
//! hot mapping is a handful of integer and floating-point operations with no loops. The
//! price is that the *inverse* (the smallest value of a bin) cannot be computed in
//! closed form exactly: an analytic approximation is refined by a binary search over bit
//! patterns until it is exact. [`OpenTelemetryExponentialBucketsLayout`] instead walks a
//! precomputed mantissa boundary table, and [`CustomLayout`] a user-supplied boundary
//! array; both know their bounds exactly.

use crate::algorithms::{
    find_first, map_double_to_long, map_long_to_double, NEGATIVE_INFINITY_MAPPED_TO_LONG,
    POSITIVE_INFINITY_MAPPED_TO_LONG,
};
use crate::errors::{CreationError, DeserializeError};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::Read;

mod custom;
mod log_linear;
mod log_optimal;
mod log_quadratic;
mod otel;
mod otel_boundaries;

pub use self::custom::CustomLayout;
pub use self::log_linear::LogLinearLayout;
pub use self::log_optimal::LogOptimalLayout;
pub use self::log_quadratic::LogQuadraticLayout;
pub use self::otel::OpenTelemetryExponentialBucketsLayout;

/// A mapping between binary64 values and signed 32-bit bin indices.
///
/// Implementations must be total on binary64 (including ±∞ and NaN) and monotonically
/// non-decreasing with respect to the sign-aware value order that places `-0.0` below
/// `+0.0`. NaN must map at or below the underflow index, or at or above the overflow
/// index, so it can never land in a regular bin.
pub trait Layout {
    /// Maps a value to its bin index.
    fn map_to_bin_index(&self, value: f64) -> i32;

    /// The index of the underflow bin; all indices at or below it denote underflow.
    fn underflow_bin_index(&self) -> i32;

    /// The index of the overflow bin; all indices at or above it denote overflow.
    fn overflow_bin_index(&self) -> i32;

    /// An analytic approximation of the smallest value mapping to `bin_index`.
    ///
    /// Only consulted as the starting point of the exact search in
    /// [`bin_lower_bound`](Layout::bin_lower_bound); it must be within a few
    /// thousand ulps of the exact bound for regular indices so the search stays
    /// cheap, but any value is tolerated.
    fn bin_lower_bound_approximation(&self, bin_index: i32) -> f64;

    /// The smallest value mapping to `bin_index`, exact.
    ///
    /// For indices at or below the underflow index this is `-∞`. Indices at or
    /// above the overflow index are clipped to the overflow bin.
    fn bin_lower_bound(&self, bin_index: i32) -> f64 {
        if bin_index <= self.underflow_bin_index() {
            return f64::NEG_INFINITY;
        }
        let effective_index = bin_index.min(self.overflow_bin_index());
        let approximate = self.bin_lower_bound_approximation(effective_index);
        let guess = clamp_guess(
            map_double_to_long(approximate),
            NEGATIVE_INFINITY_MAPPED_TO_LONG,
            POSITIVE_INFINITY_MAPPED_TO_LONG,
        );
        map_long_to_double(find_first(
            |l| self.map_to_bin_index(map_long_to_double(l)) >= effective_index,
            NEGATIVE_INFINITY_MAPPED_TO_LONG,
            POSITIVE_INFINITY_MAPPED_TO_LONG,
            guess,
        ))
    }

    /// The largest value mapping to `bin_index`, exact.
    ///
    /// For indices at or above the overflow index this is `+∞`. Indices at or
    /// below the underflow index are clipped to the underflow bin.
    fn bin_upper_bound(&self, bin_index: i32) -> f64 {
        if bin_index >= self.overflow_bin_index() {
            return f64::INFINITY;
        }
        let effective_index = bin_index.max(self.underflow_bin_index());
        // The next bin's lower bound approximates this bin's upper bound; the search
        // runs on the reversed axis so the same find-first primitive applies.
        let approximate = self.bin_lower_bound_approximation(effective_index + 1);
        let guess = clamp_guess(
            !map_double_to_long(approximate),
            !POSITIVE_INFINITY_MAPPED_TO_LONG,
            !NEGATIVE_INFINITY_MAPPED_TO_LONG,
        );
        map_long_to_double(!find_first(
            |l| self.map_to_bin_index(map_long_to_double(!l)) <= effective_index,
            !POSITIVE_INFINITY_MAPPED_TO_LONG,
            !NEGATIVE_INFINITY_MAPPED_TO_LONG,
            guess,
        ))
    }
}

fn clamp_guess(guess: i64, min: i64, max: i64) -> i64 {
    guess.max(min).min(max)
}

/// Reads the 8-byte serial tag and verifies it matches the expected layout type.
pub(crate) fn check_serial_tag<R: Read>(
    source: &mut R,
    expected: u64,
) -> Result<(), DeserializeError> {
    let tag = source.read_u64::<BigEndian>()?;
    if tag != expected {
        return Err(DeserializeError::UnknownLayoutTag);
    }
    Ok(())
}

// ************************************************************************************
// Shared construction machinery of the log-family layouts.
//
// All three share the same two-regime structure: below the "unsigned normal limit" the
// index is linear in the value (absolute width bound), above it the index follows an
// approximation of the logarithm derived from the value's bit pattern (relative width
// bound). Negative values are mapped by bit complement of the positive index.
// ************************************************************************************

pub(crate) fn check_log_layout_arguments(
    absolute_bin_width_limit: f64,
    relative_bin_width_limit: f64,
    value_range_lower_bound: f64,
    value_range_upper_bound: f64,
) -> Result<(), CreationError> {
    if !absolute_bin_width_limit.is_finite() || absolute_bin_width_limit < f64::MIN_POSITIVE {
        return Err(CreationError::AbsoluteWidthOutOfRange);
    }
    if !relative_bin_width_limit.is_finite() || relative_bin_width_limit <= 0.0 {
        return Err(CreationError::RelativeWidthOutOfRange);
    }
    if !value_range_lower_bound.is_finite()
        || !value_range_upper_bound.is_finite()
        || value_range_lower_bound > value_range_upper_bound
    {
        return Err(CreationError::RangeInvalid);
    }
    Ok(())
}

pub(crate) fn check_index_range(
    value_range_lower_bound_bin_index: i32,
    value_range_upper_bound_bin_index: i32,
) -> Result<(i32, i32), CreationError> {
    if value_range_lower_bound_bin_index <= i32::MIN + 1
        || value_range_upper_bound_bin_index >= i32::MAX - 1
    {
        return Err(CreationError::IndexRangeTooLarge);
    }
    let underflow_bin_index = value_range_lower_bound_bin_index - 1;
    let overflow_bin_index = value_range_upper_bound_bin_index + 1;
    if i64::from(overflow_bin_index) - i64::from(underflow_bin_index) - 1
        > i64::from(i32::MAX)
    {
        return Err(CreationError::IndexRangeTooLarge);
    }
    Ok((underflow_bin_index, overflow_bin_index))
}

/// The smallest regular index served by the logarithmic regime; below it the linear
/// regime already meets the relative width limit on its own.
pub(crate) fn calculate_first_normal_index(relative_bin_width_limit: f64) -> i32 {
    (1.0 / relative_bin_width_limit).ceil() as i32
}

pub(crate) fn calculate_factor_subnormal(absolute_bin_width_limit: f64) -> f64 {
    1.0 / absolute_bin_width_limit
}

pub(crate) fn calculate_sub_normal_idx(unsigned_value_bits: u64, factor_subnormal: f64) -> i32 {
    (factor_subnormal * f64::from_bits(unsigned_value_bits)) as i32
}

/// The smallest unsigned bit pattern handled by the logarithmic regime: the exact
/// first pattern whose linear index reaches `first_normal_idx`.
pub(crate) fn calculate_unsigned_value_bits_normal_limit(
    factor_subnormal: f64,
    first_normal_idx: i32,
) -> u64 {
    let approximate = f64::from(first_normal_idx) / factor_subnormal;
    let guess = clamp_guess(
        map_double_to_long(approximate),
        0,
        f64::INFINITY.to_bits() as i64,
    );
    find_first(
        |l| calculate_sub_normal_idx(l as u64, factor_subnormal) >= first_normal_idx,
        0,
        f64::INFINITY.to_bits() as i64,
        guess,
    ) as u64
}

/// The additive offset of the logarithmic regime: the smallest value that makes the
/// regime start exactly at `first_normal_idx` when evaluated at the normal limit, so
/// the two regimes meet without a gap or an overlap.
pub(crate) fn calculate_offset(
    unsigned_value_bits_normal_limit: u64,
    map_to_bin_index_helper: fn(u64) -> f64,
    factor_normal: f64,
    first_normal_idx: i32,
) -> f64 {
    let approximate = f64::from(first_normal_idx)
        - factor_normal * map_to_bin_index_helper(unsigned_value_bits_normal_limit);
    let guess = clamp_guess(
        map_double_to_long(approximate),
        NEGATIVE_INFINITY_MAPPED_TO_LONG,
        POSITIVE_INFINITY_MAPPED_TO_LONG,
    );
    map_long_to_double(find_first(
        |l| {
            let offset_candidate = map_long_to_double(l);
            let index = (factor_normal
                * map_to_bin_index_helper(unsigned_value_bits_normal_limit)
                + offset_candidate) as i32;
            index >= first_normal_idx
        },
        NEGATIVE_INFINITY_MAPPED_TO_LONG,
        POSITIVE_INFINITY_MAPPED_TO_LONG,
        guess,
    ))
}
