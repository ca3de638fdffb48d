//! A histogram bin layout with a piecewise-linear approximation of the logarithm.

use super::{
    calculate_factor_subnormal, calculate_first_normal_index, calculate_offset,
    calculate_sub_normal_idx, calculate_unsigned_value_bits_normal_limit, check_index_range,
    check_log_layout_arguments, check_serial_tag, Layout,
};
use crate::algorithms::scalb;
use crate::errors::{CreationError, DeserializeError, SerializeError};
use crate::bitio::{read_signed_var_int, write_signed_var_int};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

/// A layout whose regular bins satisfy, bin by bin, an absolute width limit or a
/// relative width limit, whichever is less demanding at that magnitude.
///
/// For magnitudes below a cutover point the index is linear in the value (the absolute
/// regime); above it the index follows `mantissa + exponent` of the raw bit pattern, a
/// piecewise-linear approximation of `log2` (the relative regime). Negative values use
/// the bit complement of the positive index, so the whole mapping is a branch, a
/// multiply-add and a truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "LogLinearLayoutParams", into = "LogLinearLayoutParams")]
pub struct LogLinearLayout {
    absolute_bin_width_limit: f64,
    relative_bin_width_limit: f64,
    underflow_bin_index: i32,
    overflow_bin_index: i32,
    // Derived at construction, never serialized.
    factor_normal: f64,
    factor_subnormal: f64,
    offset: f64,
    unsigned_value_bits_normal_limit: u64,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename = "LogLinearLayout")]
struct LogLinearLayoutParams {
    absolute_bin_width_limit: f64,
    relative_bin_width_limit: f64,
    underflow_bin_index: i32,
    overflow_bin_index: i32,
}

impl LogLinearLayout {
    /// Stable 64-bit serial tag of this layout type.
    pub const SERIAL_VERSION: u64 = 0x9d36_115d_e11d_38d6;

    /// Creates a layout whose regular bins cover
    /// `[value_range_lower_bound, value_range_upper_bound]` with bins no wider than
    /// `absolute_bin_width_limit` *or* no wider than `relative_bin_width_limit`
    /// relative to their magnitude.
    ///
    /// Returns an error if the limits are not positive finite numbers, the range is
    /// not finite and ordered, or the resulting bin count exceeds the `i32` index
    /// space; see `CreationError`.
    pub fn new(
        absolute_bin_width_limit: f64,
        relative_bin_width_limit: f64,
        value_range_lower_bound: f64,
        value_range_upper_bound: f64,
    ) -> Result<LogLinearLayout, CreationError> {
        check_log_layout_arguments(
            absolute_bin_width_limit,
            relative_bin_width_limit,
            value_range_lower_bound,
            value_range_upper_bound,
        )?;
        let first_normal_idx = calculate_first_normal_index(relative_bin_width_limit);
        let factor_normal = calculate_factor_normal(relative_bin_width_limit);
        let factor_subnormal = calculate_factor_subnormal(absolute_bin_width_limit);
        let unsigned_value_bits_normal_limit =
            calculate_unsigned_value_bits_normal_limit(factor_subnormal, first_normal_idx);
        let offset = calculate_offset(
            unsigned_value_bits_normal_limit,
            map_to_bin_index_helper,
            factor_normal,
            first_normal_idx,
        );

        let value_range_lower_bound_bin_index = map_to_bin_index_internal(
            value_range_lower_bound,
            factor_normal,
            factor_subnormal,
            unsigned_value_bits_normal_limit,
            offset,
        );
        let value_range_upper_bound_bin_index = map_to_bin_index_internal(
            value_range_upper_bound,
            factor_normal,
            factor_subnormal,
            unsigned_value_bits_normal_limit,
            offset,
        );
        let (underflow_bin_index, overflow_bin_index) = check_index_range(
            value_range_lower_bound_bin_index,
            value_range_upper_bound_bin_index,
        )?;

        Ok(LogLinearLayout {
            absolute_bin_width_limit,
            relative_bin_width_limit,
            underflow_bin_index,
            overflow_bin_index,
            factor_normal,
            factor_subnormal,
            offset,
            unsigned_value_bits_normal_limit,
        })
    }

    /// Reconstructs a layout from width limits and explicit distinguished indices, as
    /// found on the wire.
    fn with_indices(
        absolute_bin_width_limit: f64,
        relative_bin_width_limit: f64,
        underflow_bin_index: i32,
        overflow_bin_index: i32,
    ) -> Result<LogLinearLayout, CreationError> {
        check_log_layout_arguments(absolute_bin_width_limit, relative_bin_width_limit, 0.0, 0.0)?;
        if underflow_bin_index >= overflow_bin_index {
            return Err(CreationError::RangeInvalid);
        }
        let first_normal_idx = calculate_first_normal_index(relative_bin_width_limit);
        let factor_normal = calculate_factor_normal(relative_bin_width_limit);
        let factor_subnormal = calculate_factor_subnormal(absolute_bin_width_limit);
        let unsigned_value_bits_normal_limit =
            calculate_unsigned_value_bits_normal_limit(factor_subnormal, first_normal_idx);
        let offset = calculate_offset(
            unsigned_value_bits_normal_limit,
            map_to_bin_index_helper,
            factor_normal,
            first_normal_idx,
        );
        Ok(LogLinearLayout {
            absolute_bin_width_limit,
            relative_bin_width_limit,
            underflow_bin_index,
            overflow_bin_index,
            factor_normal,
            factor_subnormal,
            offset,
            unsigned_value_bits_normal_limit,
        })
    }

    /// The configured absolute bin width limit.
    pub fn absolute_bin_width_limit(&self) -> f64 {
        self.absolute_bin_width_limit
    }

    /// The configured relative bin width limit.
    pub fn relative_bin_width_limit(&self) -> f64 {
        self.relative_bin_width_limit
    }

    /// Writes the serial tag and the construction parameters.
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<(), SerializeError> {
        sink.write_u64::<BigEndian>(Self::SERIAL_VERSION)?;
        sink.write_f64::<BigEndian>(self.absolute_bin_width_limit)?;
        sink.write_f64::<BigEndian>(self.relative_bin_width_limit)?;
        write_signed_var_int(sink, self.underflow_bin_index)?;
        write_signed_var_int(sink, self.overflow_bin_index)?;
        Ok(())
    }

    /// Reads a layout written by [`write`](LogLinearLayout::write).
    pub fn read<R: Read>(source: &mut R) -> Result<LogLinearLayout, DeserializeError> {
        check_serial_tag(source, Self::SERIAL_VERSION)?;
        let absolute_bin_width_limit = source.read_f64::<BigEndian>()?;
        let relative_bin_width_limit = source.read_f64::<BigEndian>()?;
        let underflow_bin_index = read_signed_var_int(source)?;
        let overflow_bin_index = read_signed_var_int(source)?;
        LogLinearLayout::with_indices(
            absolute_bin_width_limit,
            relative_bin_width_limit,
            underflow_bin_index,
            overflow_bin_index,
        )
        .map_err(DeserializeError::from)
    }

    fn bin_lower_bound_approximation_helper(&self, abs_bin_index: i32) -> f64 {
        let x = f64::from(abs_bin_index) * self.absolute_bin_width_limit;
        if x < f64::from_bits(self.unsigned_value_bits_normal_limit) {
            x
        } else {
            let s = (f64::from(abs_bin_index) - self.offset) / self.factor_normal;
            let exponent = (s.floor() as i32) - 1;
            let mantissa_plus_one = s - f64::from(exponent);
            scalb(mantissa_plus_one, exponent - 1023)
        }
    }
}

/// `mantissa_plus_one + biased_exponent`, a piecewise-linear, monotone function of the
/// unsigned bit pattern that coincides with `log2(value) + 1024` at powers of two.
fn map_to_bin_index_helper(unsigned_value_bits: u64) -> f64 {
    let exponent = (unsigned_value_bits >> 52) as i32;
    let mantissa_plus_one =
        f64::from_bits((unsigned_value_bits & 0x000f_ffff_ffff_ffff) | 0x3ff0_0000_0000_0000);
    mantissa_plus_one + f64::from(exponent)
}

fn calculate_factor_normal(relative_bin_width_limit: f64) -> f64 {
    1.0 / relative_bin_width_limit.ln_1p()
}

fn map_to_bin_index_internal(
    value: f64,
    factor_normal: f64,
    factor_subnormal: f64,
    unsigned_value_bits_normal_limit: u64,
    offset: f64,
) -> i32 {
    let value_bits = value.to_bits();
    let unsigned_value_bits = value_bits & 0x7fff_ffff_ffff_ffff;
    let idx = if unsigned_value_bits >= unsigned_value_bits_normal_limit {
        (factor_normal * map_to_bin_index_helper(unsigned_value_bits) + offset) as i32
    } else {
        calculate_sub_normal_idx(unsigned_value_bits, factor_subnormal)
    };
    if (value_bits as i64) >= 0 {
        idx
    } else {
        !idx
    }
}

impl Layout for LogLinearLayout {
    #[inline]
    fn map_to_bin_index(&self, value: f64) -> i32 {
        map_to_bin_index_internal(
            value,
            self.factor_normal,
            self.factor_subnormal,
            self.unsigned_value_bits_normal_limit,
            self.offset,
        )
    }

    fn underflow_bin_index(&self) -> i32 {
        self.underflow_bin_index
    }

    fn overflow_bin_index(&self) -> i32 {
        self.overflow_bin_index
    }

    fn bin_lower_bound_approximation(&self, bin_index: i32) -> f64 {
        if bin_index >= 0 {
            self.bin_lower_bound_approximation_helper(bin_index)
        } else {
            -self.bin_lower_bound_approximation_helper(-bin_index)
        }
    }
}

impl PartialEq for LogLinearLayout {
    fn eq(&self, other: &LogLinearLayout) -> bool {
        self.absolute_bin_width_limit.to_bits() == other.absolute_bin_width_limit.to_bits()
            && self.relative_bin_width_limit.to_bits() == other.relative_bin_width_limit.to_bits()
            && self.underflow_bin_index == other.underflow_bin_index
            && self.overflow_bin_index == other.overflow_bin_index
    }
}

impl Eq for LogLinearLayout {}

impl Hash for LogLinearLayout {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.absolute_bin_width_limit.to_bits().hash(state);
        self.relative_bin_width_limit.to_bits().hash(state);
        self.underflow_bin_index.hash(state);
        self.overflow_bin_index.hash(state);
    }
}

impl TryFrom<LogLinearLayoutParams> for LogLinearLayout {
    type Error = CreationError;

    fn try_from(params: LogLinearLayoutParams) -> Result<LogLinearLayout, CreationError> {
        LogLinearLayout::with_indices(
            params.absolute_bin_width_limit,
            params.relative_bin_width_limit,
            params.underflow_bin_index,
            params.overflow_bin_index,
        )
    }
}

impl From<LogLinearLayout> for LogLinearLayoutParams {
    fn from(layout: LogLinearLayout) -> LogLinearLayoutParams {
        LogLinearLayoutParams {
            absolute_bin_width_limit: layout.absolute_bin_width_limit,
            relative_bin_width_limit: layout.relative_bin_width_limit,
            underflow_bin_index: layout.underflow_bin_index,
            overflow_bin_index: layout.overflow_bin_index,
        }
    }
}
