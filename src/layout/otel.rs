//! A histogram bin layout matching OpenTelemetry exponential bucket boundaries.

use super::otel_boundaries::MANTISSA_BOUNDARIES_PRECISION_10;
use super::{check_serial_tag, Layout};
use crate::errors::{CreationError, DeserializeError, SerializeError};
use byteorder::{ReadBytesExt, WriteBytesExt};
use byteorder::BigEndian;
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::OnceLock;

const MAX_PRECISION: u32 = 10;
const EXPONENT_BITS_MASK: u64 = 0x7ff0_0000_0000_0000;
const MANTISSA_BITS_MASK: u64 = 0x000f_ffff_ffff_ffff;

/// A layout whose regular bins are the exponential buckets of the OpenTelemetry
/// metrics data model: for precision `p`, consecutive bin boundaries have an exact
/// ratio of at most `2^(2^-p)`.
///
/// Each octave of the value range is split into `2^p` sub-buckets along a precomputed
/// mantissa boundary table, so mapping a value is a shift plus a binary search over at
/// most 1024 entries. Subnormal values occupy a contiguous stretch of bins next to the
/// zero bin (index 0, holding exactly `-0.0` and `+0.0`), without a ratio guarantee;
/// negative values mirror the positive bins via negation. Instances are cached per
/// precision, so repeated construction is cheap and idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "OpenTelemetryLayoutParams", into = "OpenTelemetryLayoutParams")]
pub struct OpenTelemetryExponentialBucketsLayout {
    precision: u32,
    boundaries: Arc<[u64]>,
    overflow_bin_index: i32,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename = "OpenTelemetryExponentialBucketsLayout")]
struct OpenTelemetryLayoutParams {
    precision: u32,
}

impl OpenTelemetryExponentialBucketsLayout {
    /// Stable 64-bit serial tag of this layout type.
    pub const SERIAL_VERSION: u64 = 0xf6e7_17a1_6f0a_6a4a;

    /// Returns the layout for the given precision, which must be in `[0, 10]`.
    ///
    /// Layouts are cached process-wide per precision; calling this twice with the same
    /// precision yields equal layouts sharing one boundary table.
    pub fn with_precision(
        precision: u32,
    ) -> Result<OpenTelemetryExponentialBucketsLayout, CreationError> {
        if precision > MAX_PRECISION {
            return Err(CreationError::PrecisionOutOfRange);
        }
        const EMPTY: OnceLock<OpenTelemetryExponentialBucketsLayout> = OnceLock::new();
        static CACHE: [OnceLock<OpenTelemetryExponentialBucketsLayout>; 11] = [EMPTY; 11];
        Ok(CACHE[precision as usize]
            .get_or_init(|| OpenTelemetryExponentialBucketsLayout::build(precision))
            .clone())
    }

    fn build(precision: u32) -> OpenTelemetryExponentialBucketsLayout {
        // Lower precisions subsample the precision-10 table by a power of two, which
        // keeps the boundaries of nested precisions aligned.
        let step = 1usize << (MAX_PRECISION - precision);
        let boundaries: Vec<u64> = (0..(1usize << precision))
            .map(|k| MANTISSA_BOUNDARIES_PRECISION_10[k * step])
            .collect();
        OpenTelemetryExponentialBucketsLayout {
            precision,
            boundaries: boundaries.into(),
            overflow_bin_index: (2047 << precision) + 1,
        }
    }

    /// The precision this layout was built for.
    pub fn precision(&self) -> u32 {
        self.precision
    }

    /// Writes the serial tag and the precision.
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<(), SerializeError> {
        sink.write_u64::<BigEndian>(Self::SERIAL_VERSION)?;
        sink.write_u8(self.precision as u8)?;
        Ok(())
    }

    /// Reads a layout written by [`write`](OpenTelemetryExponentialBucketsLayout::write).
    pub fn read<R: Read>(
        source: &mut R,
    ) -> Result<OpenTelemetryExponentialBucketsLayout, DeserializeError> {
        check_serial_tag(source, Self::SERIAL_VERSION)?;
        let precision = source.read_u8()?;
        OpenTelemetryExponentialBucketsLayout::with_precision(u32::from(precision))
            .map_err(DeserializeError::from)
    }

    /// The bit pattern of the smallest positive value in regular bin `i`, `1 <= i <=
    /// overflow_bin_index`. Exact by construction of the boundary table.
    fn positive_lower_bound_bits(&self, bin_index: i32) -> u64 {
        let j = (bin_index - 1) as u64;
        let exponent = j >> self.precision;
        let k = (j & ((1u64 << self.precision) - 1)) as usize;
        let bits = (exponent << 52) | self.boundaries[k];
        if bits == 0 {
            // Bin 1 starts just above the zero bin.
            1
        } else {
            bits
        }
    }
}

impl Layout for OpenTelemetryExponentialBucketsLayout {
    fn map_to_bin_index(&self, value: f64) -> i32 {
        let value_bits = value.to_bits();
        let unsigned_value_bits = value_bits & 0x7fff_ffff_ffff_ffff;
        if unsigned_value_bits == 0 {
            return 0;
        }
        let exponent = (unsigned_value_bits & EXPONENT_BITS_MASK) >> 52;
        let mantissa = unsigned_value_bits & MANTISSA_BITS_MASK;
        let k = self.boundaries.partition_point(|&b| b <= mantissa) as i32 - 1;
        let idx = ((exponent as i32) << self.precision) + k + 1;
        if (value_bits as i64) >= 0 {
            idx
        } else {
            -idx
        }
    }

    fn underflow_bin_index(&self) -> i32 {
        -self.overflow_bin_index
    }

    fn overflow_bin_index(&self) -> i32 {
        self.overflow_bin_index
    }

    fn bin_lower_bound_approximation(&self, bin_index: i32) -> f64 {
        self.bin_lower_bound(bin_index)
    }

    fn bin_lower_bound(&self, bin_index: i32) -> f64 {
        if bin_index <= self.underflow_bin_index() {
            return f64::NEG_INFINITY;
        }
        let effective_index = bin_index.min(self.overflow_bin_index);
        if effective_index == 0 {
            return -0.0;
        }
        if effective_index > 0 {
            f64::from_bits(self.positive_lower_bound_bits(effective_index))
        } else {
            // The smallest value of a mirrored bin is the negated largest value of its
            // positive counterpart.
            -f64::from_bits(self.positive_lower_bound_bits(-effective_index + 1) - 1)
        }
    }

    fn bin_upper_bound(&self, bin_index: i32) -> f64 {
        if bin_index >= self.overflow_bin_index {
            return f64::INFINITY;
        }
        let effective_index = bin_index.max(self.underflow_bin_index());
        if effective_index == 0 {
            return 0.0;
        }
        if effective_index > 0 {
            f64::from_bits(self.positive_lower_bound_bits(effective_index + 1) - 1)
        } else {
            -f64::from_bits(self.positive_lower_bound_bits(-effective_index))
        }
    }
}

impl PartialEq for OpenTelemetryExponentialBucketsLayout {
    fn eq(&self, other: &OpenTelemetryExponentialBucketsLayout) -> bool {
        self.precision == other.precision
    }
}

impl Eq for OpenTelemetryExponentialBucketsLayout {}

impl Hash for OpenTelemetryExponentialBucketsLayout {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.precision.hash(state);
    }
}

impl TryFrom<OpenTelemetryLayoutParams> for OpenTelemetryExponentialBucketsLayout {
    type Error = CreationError;

    fn try_from(
        params: OpenTelemetryLayoutParams,
    ) -> Result<OpenTelemetryExponentialBucketsLayout, CreationError> {
        OpenTelemetryExponentialBucketsLayout::with_precision(params.precision)
    }
}

impl From<OpenTelemetryExponentialBucketsLayout> for OpenTelemetryLayoutParams {
    fn from(layout: OpenTelemetryExponentialBucketsLayout) -> OpenTelemetryLayoutParams {
        OpenTelemetryLayoutParams {
            precision: layout.precision,
        }
    }
}
