//! Error types used throughout this library
use std::error::Error;
use std::fmt;
use std::io;

/// Errors that can occur when constructing a layout.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum CreationError {
    /// The absolute bin width limit must be a finite value that is at least
    /// `f64::MIN_POSITIVE` (the smallest positive normal value). Smaller limits would
    /// require more bins than the index space can address.
    AbsoluteWidthOutOfRange,
    /// The relative bin width limit must be a finite value that is >= 0.
    RelativeWidthOutOfRange,
    /// The value range bounds must both be finite, and the lower bound must be <= the
    /// upper bound.
    RangeInvalid,
    /// The requested value range maps to more bin indices than fit in the `i32` index
    /// space. Loosen the bin width limits or shrink the range.
    IndexRangeTooLarge,
    /// The precision of the OpenTelemetry exponential buckets layout must be in the
    /// range `[0, 10]`.
    PrecisionOutOfRange,
    /// A custom layout needs at least one boundary.
    BoundariesEmpty,
    /// Custom layout boundaries must be finite and strictly increasing in the IEEE-754
    /// bit order (which places `-0.0` below `+0.0`).
    BoundariesNotSorted,
}

impl fmt::Display for CreationError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CreationError::AbsoluteWidthOutOfRange => {
                write!(f, "Absolute bin width limit must be finite and >= `f64::MIN_POSITIVE`")
            }
            CreationError::RelativeWidthOutOfRange => {
                write!(f, "Relative bin width limit must be finite and >= 0")
            }
            CreationError::RangeInvalid => {
                write!(f, "Value range bounds must be finite with lower <= upper")
            }
            CreationError::IndexRangeTooLarge => {
                write!(f, "Value range maps to more bin indices than the `i32` index space holds")
            }
            CreationError::PrecisionOutOfRange => {
                write!(f, "Precision must be in the range `[0, 10]`")
            }
            CreationError::BoundariesEmpty => write!(f, "At least one boundary is required"),
            CreationError::BoundariesNotSorted => {
                write!(f, "Boundaries must be finite and strictly increasing in IEEE-754 bit order")
            }
        }
    }
}

impl Error for CreationError {}

/// Errors that can occur while recording values.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum RecordError {
    /// NaN cannot be recorded; it is not ordered with respect to any bin.
    ValueIsNan,
    /// Recording the given count would push the total count beyond `i64::MAX`, the
    /// largest total that the wire format and rank arithmetic can represent. The
    /// histogram is left unchanged.
    TotalCountOverflow,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RecordError::ValueIsNan => write!(f, "NaN values cannot be recorded"),
            RecordError::TotalCountOverflow => {
                write!(f, "The total count would exceed `i64::MAX`")
            }
        }
    }
}

impl Error for RecordError {}

/// Errors that can occur while querying order statistics.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum QueryError {
    /// The requested rank is not in `[0, total_count)`.
    RankOutOfBounds,
    /// The requested quantile is NaN or not in `[0, 1]`.
    InvalidQuantile,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryError::RankOutOfBounds => write!(f, "Rank must be in `[0, total_count)`"),
            QueryError::InvalidQuantile => write!(f, "Quantile must be in `[0, 1]`"),
        }
    }
}

impl Error for QueryError {}

/// Errors that occur during serialization.
#[derive(Debug)]
pub enum SerializeError {
    /// An i/o operation on the sink failed.
    IoError(io::Error),
}

impl From<io::Error> for SerializeError {
    fn from(e: io::Error) -> Self {
        SerializeError::IoError(e)
    }
}

impl fmt::Display for SerializeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SerializeError::IoError(e) => write!(f, "An i/o operation failed: {}", e),
        }
    }
}

impl Error for SerializeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SerializeError::IoError(e) => Some(e),
        }
    }
}

/// Errors that can happen during deserialization.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeserializeError {
    /// An i/o operation failed. Truncated input surfaces as
    /// `io::ErrorKind::UnexpectedEof`.
    IoError(io::ErrorKind),
    /// The first byte did not match any supported serial version.
    UnknownSerialVersion(u8),
    /// The serial type tag did not match the layout type being read.
    UnknownLayoutTag,
    /// The encoded layout parameters were rejected by the layout constructor.
    InvalidLayoutParameters(CreationError),
    /// The encoded histogram state is self-contradictory (e.g. bin indices outside the
    /// regular range, or counts that overflow the total).
    InvalidHistogramState,
}

impl From<io::Error> for DeserializeError {
    fn from(e: io::Error) -> Self {
        DeserializeError::IoError(e.kind())
    }
}

impl From<CreationError> for DeserializeError {
    fn from(e: CreationError) -> Self {
        DeserializeError::InvalidLayoutParameters(e)
    }
}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeserializeError::IoError(kind) => write!(f, "An i/o operation failed: {:?}", kind),
            DeserializeError::UnknownSerialVersion(v) => {
                write!(f, "Unknown serial version {}", v)
            }
            DeserializeError::UnknownLayoutTag => {
                write!(f, "Serial tag does not match the layout type")
            }
            DeserializeError::InvalidLayoutParameters(e) => {
                write!(f, "Encoded layout parameters are invalid: {}", e)
            }
            DeserializeError::InvalidHistogramState => {
                write!(f, "Encoded histogram state is self-contradictory")
            }
        }
    }
}

impl Error for DeserializeError {}
