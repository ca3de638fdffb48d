//! A histogram bin layout over caller-chosen bin boundaries.

use super::{check_serial_tag, Layout};
use crate::algorithms::{map_double_to_long, map_long_to_double};
use crate::errors::{CreationError, DeserializeError, SerializeError};
use crate::bitio::{read_unsigned_var_long, write_unsigned_var_long};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::hash::{Hash, Hasher};
use std::io::{Read, Write};

/// A layout defined by an explicit, strictly increasing boundary sequence
/// `b_0 < b_1 < … < b_{n-1}` (in IEEE-754 bit order, so `-0.0 < +0.0`).
///
/// A value maps to the number of boundaries at or below it: everything below `b_0`
/// lands in the underflow bin at index 0, values in `[b_i, b_{i+1})` land at index
/// `i + 1`, and everything at or above `b_{n-1}` lands in the overflow bin at index
/// `n`. With a single boundary there are no regular bins at all, only the two
/// catch-all bins split at that boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CustomLayoutParams", into = "CustomLayoutParams")]
pub struct CustomLayout {
    sorted_bin_boundaries: Box<[f64]>,
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(rename = "CustomLayout")]
struct CustomLayoutParams {
    sorted_bin_boundaries: Vec<f64>,
}

impl CustomLayout {
    /// Stable 64-bit serial tag of this layout type.
    pub const SERIAL_VERSION: u64 = 0x7f86_2c38_08df_6fcd;

    /// Creates a layout from the given boundaries, which must be finite and strictly
    /// increasing in IEEE-754 bit order; at least one boundary is required.
    pub fn new(sorted_bin_boundaries: &[f64]) -> Result<CustomLayout, CreationError> {
        if sorted_bin_boundaries.is_empty() {
            return Err(CreationError::BoundariesEmpty);
        }
        if sorted_bin_boundaries.len() >= i32::MAX as usize {
            return Err(CreationError::IndexRangeTooLarge);
        }
        for boundary in sorted_bin_boundaries {
            if !boundary.is_finite() {
                return Err(CreationError::BoundariesNotSorted);
            }
        }
        for pair in sorted_bin_boundaries.windows(2) {
            if map_double_to_long(pair[0]) >= map_double_to_long(pair[1]) {
                return Err(CreationError::BoundariesNotSorted);
            }
        }
        Ok(CustomLayout {
            sorted_bin_boundaries: sorted_bin_boundaries.to_vec().into_boxed_slice(),
        })
    }

    /// The boundary sequence this layout was built from.
    pub fn sorted_bin_boundaries(&self) -> &[f64] {
        &self.sorted_bin_boundaries
    }

    /// Writes the serial tag and the boundary sequence.
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<(), SerializeError> {
        sink.write_u64::<BigEndian>(Self::SERIAL_VERSION)?;
        write_unsigned_var_long(sink, self.sorted_bin_boundaries.len() as u64)?;
        for &boundary in self.sorted_bin_boundaries.iter() {
            sink.write_f64::<BigEndian>(boundary)?;
        }
        Ok(())
    }

    /// Reads a layout written by [`write`](CustomLayout::write).
    pub fn read<R: Read>(source: &mut R) -> Result<CustomLayout, DeserializeError> {
        check_serial_tag(source, Self::SERIAL_VERSION)?;
        let len = read_unsigned_var_long(source)?;
        if len >= i32::MAX as u64 {
            return Err(DeserializeError::from(CreationError::IndexRangeTooLarge));
        }
        let mut boundaries = Vec::with_capacity(len as usize);
        for _ in 0..len {
            boundaries.push(source.read_f64::<BigEndian>()?);
        }
        CustomLayout::new(&boundaries).map_err(DeserializeError::from)
    }
}

impl Layout for CustomLayout {
    fn map_to_bin_index(&self, value: f64) -> i32 {
        let mapped = map_double_to_long(value);
        // Count of boundaries at or below the value; NaN bit patterns sit outside
        // [-inf, +inf] in the mapped order and fall into a catch-all bin.
        self.sorted_bin_boundaries
            .partition_point(|&b| map_double_to_long(b) <= mapped) as i32
    }

    fn underflow_bin_index(&self) -> i32 {
        0
    }

    fn overflow_bin_index(&self) -> i32 {
        self.sorted_bin_boundaries.len() as i32
    }

    fn bin_lower_bound_approximation(&self, bin_index: i32) -> f64 {
        self.bin_lower_bound(bin_index)
    }

    fn bin_lower_bound(&self, bin_index: i32) -> f64 {
        if bin_index <= 0 {
            return f64::NEG_INFINITY;
        }
        let effective_index = bin_index.min(self.overflow_bin_index());
        self.sorted_bin_boundaries[(effective_index - 1) as usize]
    }

    fn bin_upper_bound(&self, bin_index: i32) -> f64 {
        if bin_index >= self.overflow_bin_index() {
            return f64::INFINITY;
        }
        let effective_index = bin_index.max(0);
        // The largest value strictly below the next boundary, in bit order.
        map_long_to_double(
            map_double_to_long(self.sorted_bin_boundaries[effective_index as usize]) - 1,
        )
    }
}

impl PartialEq for CustomLayout {
    fn eq(&self, other: &CustomLayout) -> bool {
        self.sorted_bin_boundaries.len() == other.sorted_bin_boundaries.len()
            && self
                .sorted_bin_boundaries
                .iter()
                .zip(other.sorted_bin_boundaries.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

impl Eq for CustomLayout {}

impl Hash for CustomLayout {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for boundary in self.sorted_bin_boundaries.iter() {
            boundary.to_bits().hash(state);
        }
    }
}

impl TryFrom<CustomLayoutParams> for CustomLayout {
    type Error = CreationError;

    fn try_from(params: CustomLayoutParams) -> Result<CustomLayout, CreationError> {
        CustomLayout::new(&params.sorted_bin_boundaries)
    }
}

impl From<CustomLayout> for CustomLayoutParams {
    fn from(layout: CustomLayout) -> CustomLayoutParams {
        CustomLayoutParams {
            sorted_bin_boundaries: layout.sorted_bin_boundaries.into_vec(),
        }
    }
}
