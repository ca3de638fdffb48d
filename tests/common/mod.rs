//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use dynahist::layout::Layout;
use dynahist::Histogram;

/// A layout binning at integer boundaries: `idx = round(v)`, clamped to the
/// distinguished indices. Simple enough that tests can predict every index.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundingLayout {
    underflow_bin_index: i32,
    overflow_bin_index: i32,
}

impl RoundingLayout {
    pub fn new(underflow_bin_index: i32, overflow_bin_index: i32) -> RoundingLayout {
        RoundingLayout {
            underflow_bin_index,
            overflow_bin_index,
        }
    }
}

impl Layout for RoundingLayout {
    fn map_to_bin_index(&self, value: f64) -> i32 {
        if value.is_nan() {
            return self.underflow_bin_index;
        }
        value
            .round()
            .max(f64::from(self.underflow_bin_index))
            .min(f64::from(self.overflow_bin_index)) as i32
    }

    fn underflow_bin_index(&self) -> i32 {
        self.underflow_bin_index
    }

    fn overflow_bin_index(&self) -> i32 {
        self.overflow_bin_index
    }

    fn bin_lower_bound_approximation(&self, bin_index: i32) -> f64 {
        f64::from(bin_index) - 0.5
    }
}

/// Asserts that two histograms (of possibly different representations) hold the same
/// logical content: tallies, bit-exact min/max, and every bin count.
pub fn assert_same_content<A, B>(a: &A, b: &B)
where
    A: Histogram,
    B: Histogram,
{
    assert_eq!(a.total_count(), b.total_count(), "total count");
    assert_eq!(a.underflow_count(), b.underflow_count(), "underflow count");
    assert_eq!(a.overflow_count(), b.overflow_count(), "overflow count");
    assert_eq!(a.min().to_bits(), b.min().to_bits(), "min bits");
    assert_eq!(a.max().to_bits(), b.max().to_bits(), "max bits");
    let window = |first: Option<(i32, i32)>, second: Option<(i32, i32)>| match (first, second) {
        (None, None) => None,
        (Some(w), None) | (None, Some(w)) => Some(w),
        (Some(x), Some(y)) => Some((x.0.min(y.0), x.1.max(y.1))),
    };
    if let Some((first, last)) = window(a.regular_window(), b.regular_window()) {
        for bin_index in first..=last {
            assert_eq!(a.count(bin_index), b.count(bin_index), "bin {}", bin_index);
        }
    }
}
