//! Layout contract tests: exact bounds, monotonicity, approximation quality.

use dynahist::layout::{
    CustomLayout, Layout, LogLinearLayout, LogOptimalLayout, LogQuadraticLayout,
    OpenTelemetryExponentialBucketsLayout,
};
use dynahist::CreationError;
use ieee754::Ieee754;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rug::ops::Pow;
use rug::Integer;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Order-preserving f64 -> i64 mapping, for measuring bit distances in tests.
fn to_ordered_bits(value: f64) -> i64 {
    let bits = value.to_bits() as i64;
    (((bits >> 62) as u64 >> 1) as i64) ^ bits
}

/// Every regular bin index of the layout, thinned to at most `limit` samples.
fn regular_indices<L: Layout>(layout: &L, limit: usize) -> Vec<i32> {
    let first = layout.underflow_bin_index() + 1;
    let last = layout.overflow_bin_index() - 1;
    let span = i64::from(last) - i64::from(first) + 1;
    let step = ((span as usize) / limit).max(1) as i64;
    let mut indices: Vec<i32> = (0..)
        .map(|k| i64::from(first) + k * step)
        .take_while(|&i| i <= i64::from(last))
        .map(|i| i as i32)
        .collect();
    // The edges matter most.
    for &edge in &[first, first + 1, last - 1, last] {
        if edge >= first && edge <= last && !indices.contains(&edge) {
            indices.push(edge);
        }
    }
    indices.sort_unstable();
    indices
}

fn check_bound_consistency<L: Layout>(layout: &L) {
    assert!(layout.underflow_bin_index() < layout.overflow_bin_index());
    for &idx in regular_indices(layout, 2000).iter() {
        let lower = layout.bin_lower_bound(idx);
        assert_eq!(
            layout.map_to_bin_index(lower),
            idx,
            "lower bound of {} maps elsewhere",
            idx
        );
        assert_eq!(
            layout.map_to_bin_index(lower.prev()),
            idx - 1,
            "value below lower bound of {} maps elsewhere",
            idx
        );
        let upper = layout.bin_upper_bound(idx);
        assert_eq!(
            layout.map_to_bin_index(upper),
            idx,
            "upper bound of {} maps elsewhere",
            idx
        );
        if idx + 1 < layout.overflow_bin_index() {
            assert_eq!(
                layout.map_to_bin_index(upper.next()),
                idx + 1,
                "value above upper bound of {} maps elsewhere",
                idx
            );
        }
    }
    // Catch-all bins.
    assert_eq!(
        layout.bin_lower_bound(layout.underflow_bin_index()),
        f64::NEG_INFINITY
    );
    assert_eq!(
        layout.bin_upper_bound(layout.overflow_bin_index()),
        f64::INFINITY
    );
}

fn check_approximation_quality<L: Layout>(layout: &L) {
    for &idx in regular_indices(layout, 2000).iter() {
        let exact = layout.bin_lower_bound(idx);
        let approximate = layout.bin_lower_bound_approximation(idx);
        let distance = (to_ordered_bits(exact) - to_ordered_bits(approximate)).abs();
        assert!(
            distance <= 2000,
            "approximation of bin {} is {} ulps off",
            idx,
            distance
        );
    }
}

fn check_monotonicity<L: Layout>(layout: &L, seed: u64) {
    let mut rng = SmallRng::seed_from_u64(seed);
    for _ in 0..100_000 {
        let a = f64::from_bits(rng.gen());
        let b = f64::from_bits(rng.gen());
        if a.is_nan() || b.is_nan() {
            continue;
        }
        let (low, high) = if to_ordered_bits(a) <= to_ordered_bits(b) {
            (a, b)
        } else {
            (b, a)
        };
        assert!(
            layout.map_to_bin_index(low) <= layout.map_to_bin_index(high),
            "map not monotone between {:?} and {:?}",
            low,
            high
        );
    }
    // NaN must never land in a regular bin.
    for nan in [f64::NAN, -f64::NAN] {
        let idx = layout.map_to_bin_index(nan);
        assert!(
            idx <= layout.underflow_bin_index() || idx >= layout.overflow_bin_index(),
            "NaN mapped to regular bin {}",
            idx
        );
    }
}

fn check_width_guarantee<L: Layout>(layout: &L, absolute_limit: f64, relative_limit: f64) {
    for &idx in regular_indices(layout, 2000).iter() {
        let lower = layout.bin_lower_bound(idx);
        let upper = layout.bin_upper_bound(idx);
        let width = upper - lower;
        let magnitude = lower.abs().min(upper.abs());
        let tolerance = 1.0 + 1e-9;
        assert!(
            width <= absolute_limit * tolerance || width <= magnitude * relative_limit * tolerance,
            "bin {} spans [{}, {}], width {} beyond both limits",
            idx,
            lower,
            upper,
            width
        );
    }
}

#[test]
fn log_linear_contract() {
    let layout = LogLinearLayout::new(1e-1, 1e-1, -5.0, 5.0).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x11aa_0001);
    check_width_guarantee(&layout, 1e-1, 1e-1);
}

#[test]
fn log_linear_contract_wide_range() {
    let layout = LogLinearLayout::new(1e-8, 1e-2, -1e6, 1e6).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x11aa_0002);
    check_width_guarantee(&layout, 1e-8, 1e-2);
}

#[test]
fn log_quadratic_contract() {
    let layout = LogQuadraticLayout::new(1e-1, 1e-1, -5.0, 5.0).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x22bb_0001);
    check_width_guarantee(&layout, 1e-1, 1e-1);
}

#[test]
fn log_quadratic_contract_wide_range() {
    let layout = LogQuadraticLayout::new(1e-8, 1e-2, -1e6, 1e6).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x22bb_0002);
    check_width_guarantee(&layout, 1e-8, 1e-2);
}

#[test]
fn log_quadratic_needs_fewer_bins_than_log_linear() {
    let linear = LogLinearLayout::new(1e-8, 1e-2, -1e6, 1e6).unwrap();
    let quadratic = LogQuadraticLayout::new(1e-8, 1e-2, -1e6, 1e6).unwrap();
    let bins = |underflow: i32, overflow: i32| i64::from(overflow) - i64::from(underflow) - 1;
    let linear_bins = bins(linear.underflow_bin_index(), linear.overflow_bin_index());
    let quadratic_bins = bins(quadratic.underflow_bin_index(), quadratic.overflow_bin_index());
    // The quadratic approximation hugs log2 closely enough to save about a quarter of
    // the bins at the same relative width limit.
    assert!(
        quadratic_bins * 10 < linear_bins * 9,
        "{} quadratic vs {} linear bins",
        quadratic_bins,
        linear_bins
    );
}

#[test]
fn log_optimal_contract() {
    let layout = LogOptimalLayout::new(1e-1, 1e-1, -5.0, 5.0).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x33cc_0001);
    check_width_guarantee(&layout, 1e-1, 1e-1);
}

#[test]
fn log_optimal_contract_wide_range() {
    let layout = LogOptimalLayout::new(1e-8, 1e-2, -1e6, 1e6).unwrap();
    check_bound_consistency(&layout);
    check_approximation_quality(&layout);
    check_monotonicity(&layout, 0x33cc_0002);
    check_width_guarantee(&layout, 1e-8, 1e-2);
}

#[test]
fn log_layout_construction_errors() {
    assert_eq!(
        LogLinearLayout::new(0.0, 1e-2, 0.0, 1.0).unwrap_err(),
        CreationError::AbsoluteWidthOutOfRange
    );
    assert_eq!(
        LogLinearLayout::new(f64::NAN, 1e-2, 0.0, 1.0).unwrap_err(),
        CreationError::AbsoluteWidthOutOfRange
    );
    assert_eq!(
        LogQuadraticLayout::new(1e-2, 0.0, 0.0, 1.0).unwrap_err(),
        CreationError::RelativeWidthOutOfRange
    );
    assert_eq!(
        LogOptimalLayout::new(1e-2, -1.0, 0.0, 1.0).unwrap_err(),
        CreationError::RelativeWidthOutOfRange
    );
    assert_eq!(
        LogQuadraticLayout::new(1e-2, 1e-2, 2.0, 1.0).unwrap_err(),
        CreationError::RangeInvalid
    );
    assert_eq!(
        LogQuadraticLayout::new(1e-2, 1e-2, f64::NEG_INFINITY, 1.0).unwrap_err(),
        CreationError::RangeInvalid
    );
    assert_eq!(
        LogLinearLayout::new(f64::MIN_POSITIVE, 1e-300, -1e300, 1e300).unwrap_err(),
        CreationError::IndexRangeTooLarge
    );
}

#[test]
fn custom_layout_indexing() {
    let layout = CustomLayout::new(&[-2.0, 4.0, 5.0]).unwrap();
    assert_eq!(layout.underflow_bin_index(), 0);
    assert_eq!(layout.overflow_bin_index(), 3);
    assert_eq!(layout.map_to_bin_index(-3.0), 0);
    assert_eq!(layout.map_to_bin_index(-2.0), 1);
    assert_eq!(layout.map_to_bin_index(0.0), 1);
    assert_eq!(layout.map_to_bin_index(4.0), 2);
    assert_eq!(layout.map_to_bin_index(4.5), 2);
    assert_eq!(layout.map_to_bin_index(5.0), 3);
    assert_eq!(layout.map_to_bin_index(1e300), 3);
    assert_eq!(layout.map_to_bin_index(f64::NEG_INFINITY), 0);
    assert_eq!(layout.map_to_bin_index(f64::INFINITY), 3);

    assert_eq!(layout.bin_lower_bound(1), -2.0);
    assert_eq!(layout.bin_upper_bound(1), 4.0.prev());
    assert_eq!(layout.bin_lower_bound(0), f64::NEG_INFINITY);
    assert_eq!(layout.bin_upper_bound(0), (-2.0).prev());
    assert_eq!(layout.bin_lower_bound(3), 5.0);
    assert_eq!(layout.bin_upper_bound(3), f64::INFINITY);

    check_monotonicity(&layout, 0x44dd_0001);
}

#[test]
fn custom_layout_distinguishes_signed_zero() {
    let layout = CustomLayout::new(&[0.0]).unwrap();
    // -0.0 sorts below the +0.0 boundary.
    assert_eq!(layout.map_to_bin_index(-0.0), 0);
    assert_eq!(layout.map_to_bin_index(0.0), 1);

    let layout = CustomLayout::new(&[-0.0, 0.0]).unwrap();
    assert_eq!(layout.map_to_bin_index(-1e-300), 0);
    assert_eq!(layout.map_to_bin_index(-0.0), 1);
    assert_eq!(layout.map_to_bin_index(0.0), 2);
}

#[test]
fn custom_layout_single_boundary_has_no_regular_bins() {
    let layout = CustomLayout::new(&[1.0]).unwrap();
    assert_eq!(layout.underflow_bin_index(), 0);
    assert_eq!(layout.overflow_bin_index(), 1);
    assert_eq!(layout.map_to_bin_index(0.5), 0);
    assert_eq!(layout.map_to_bin_index(1.5), 1);
}

#[test]
fn custom_layout_rejects_bad_boundaries() {
    assert_eq!(
        CustomLayout::new(&[]).unwrap_err(),
        CreationError::BoundariesEmpty
    );
    assert_eq!(
        CustomLayout::new(&[1.0, 1.0]).unwrap_err(),
        CreationError::BoundariesNotSorted
    );
    assert_eq!(
        CustomLayout::new(&[2.0, 1.0]).unwrap_err(),
        CreationError::BoundariesNotSorted
    );
    assert_eq!(
        CustomLayout::new(&[1.0, f64::NAN]).unwrap_err(),
        CreationError::BoundariesNotSorted
    );
    assert_eq!(
        CustomLayout::new(&[f64::INFINITY]).unwrap_err(),
        CreationError::BoundariesNotSorted
    );
}

#[test]
fn otel_layout_contract() {
    for precision in [0, 1, 5, 10] {
        let layout = OpenTelemetryExponentialBucketsLayout::with_precision(precision).unwrap();
        check_bound_consistency(&layout);
        check_monotonicity(&layout, 0x55ee_0000 + u64::from(precision));
    }
    assert!(OpenTelemetryExponentialBucketsLayout::with_precision(11).is_err());
}

#[test]
fn otel_layout_is_cached_per_precision() {
    let a = OpenTelemetryExponentialBucketsLayout::with_precision(7).unwrap();
    let b = OpenTelemetryExponentialBucketsLayout::with_precision(7).unwrap();
    assert_eq!(a, b);
    let c = OpenTelemetryExponentialBucketsLayout::with_precision(8).unwrap();
    assert_ne!(a, c);
}

#[test]
fn otel_layout_mirrors_negative_values() {
    let layout = OpenTelemetryExponentialBucketsLayout::with_precision(10).unwrap();
    let mut rng = SmallRng::seed_from_u64(0x66ff_0001);
    for _ in 0..10_000 {
        let value = f64::from_bits(rng.gen::<u64>() & 0x7fff_ffff_ffff_ffff);
        if value.is_nan() {
            continue;
        }
        assert_eq!(
            layout.map_to_bin_index(-value),
            -layout.map_to_bin_index(value)
        );
    }
    assert_eq!(layout.map_to_bin_index(0.0), 0);
    assert_eq!(layout.map_to_bin_index(-0.0), 0);
    assert_eq!(layout.bin_lower_bound(0).to_bits(), (-0.0f64).to_bits());
    assert_eq!(layout.bin_upper_bound(0).to_bits(), 0.0f64.to_bits());
}

/// Extracts the mantissa boundary of sub-bucket `k` in the octave of 1.0 through the
/// public bound accessors.
fn otel_mantissa_boundary(layout: &OpenTelemetryExponentialBucketsLayout, k: u32) -> u64 {
    let base_index = layout.map_to_bin_index(1.0);
    let lower = layout.bin_lower_bound(base_index + k as i32);
    let bits = lower.to_bits();
    assert_eq!(bits >> 52, 1023, "sub-bucket {} left the octave", k);
    bits & 0x000f_ffff_ffff_ffff
}

#[test]
fn otel_boundaries_match_exact_arithmetic() {
    // The mantissa boundary of sub-bucket k must be the smallest m with
    // (2^52 + m)^1024 >= 2^(52 * 1024 + k); re-derive it with big integers.
    let layout = OpenTelemetryExponentialBucketsLayout::with_precision(10).unwrap();
    for k in 0..1024u32 {
        let mantissa = otel_mantissa_boundary(&layout, k);
        let scaled = Integer::from((1u64 << 52) + mantissa);
        let target = Integer::from(1) << (52 * 1024 + k);
        assert!(
            scaled.clone().pow(1024) >= target,
            "boundary {} is too small",
            k
        );
        if mantissa > 0 {
            assert!(
                (scaled - 1u32).pow(1024) < target,
                "boundary {} is not minimal",
                k
            );
        }
    }
}

#[test]
fn otel_bucket_ratio_is_bounded() {
    // Within an octave, upper/lower <= 2^(2^-p) exactly: (upper)^(2^p) <= 2 * (lower)^(2^p).
    for precision in [1u32, 4, 10] {
        let layout = OpenTelemetryExponentialBucketsLayout::with_precision(precision).unwrap();
        let base_index = layout.map_to_bin_index(1.0);
        let exponent = 1u32 << precision;
        for k in 0..exponent {
            let idx = base_index + k as i32;
            let lower = layout.bin_lower_bound(idx).to_bits();
            let upper = layout.bin_upper_bound(idx).to_bits();
            assert_eq!(lower >> 52, 1023);
            assert_eq!(upper >> 52, 1023);
            let lower_scaled = Integer::from((1u64 << 52) + (lower & 0x000f_ffff_ffff_ffff));
            let upper_scaled = Integer::from((1u64 << 52) + (upper & 0x000f_ffff_ffff_ffff));
            assert!(
                upper_scaled.pow(exponent) <= Integer::from(2) * lower_scaled.pow(exponent),
                "precision {} bucket {} ratio exceeds the bound",
                precision,
                k
            );
        }
    }
}

#[test]
fn otel_lower_precision_subsamples_higher() {
    let fine = OpenTelemetryExponentialBucketsLayout::with_precision(10).unwrap();
    for precision in [0u32, 3, 6] {
        let coarse = OpenTelemetryExponentialBucketsLayout::with_precision(precision).unwrap();
        let step = 1u32 << (10 - precision);
        for k in 0..(1u32 << precision) {
            assert_eq!(
                otel_mantissa_boundary(&coarse, k),
                otel_mantissa_boundary(&fine, k * step),
                "precision {} sub-bucket {}",
                precision,
                k
            );
        }
    }
}

#[test]
fn layouts_serialize_by_parameters() {
    let layout = LogQuadraticLayout::new(1e-4, 1e-2, -1e3, 1e3).unwrap();
    let mut bytes = Vec::new();
    layout.write(&mut bytes).unwrap();
    let restored = LogQuadraticLayout::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(layout, restored);
    // A tag of another layout type is rejected.
    assert!(LogLinearLayout::read(&mut bytes.as_slice()).is_err());

    let layout = CustomLayout::new(&[-2.0, -0.0, 0.0, 7.5]).unwrap();
    let mut bytes = Vec::new();
    layout.write(&mut bytes).unwrap();
    let restored = CustomLayout::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(layout, restored);

    let layout = OpenTelemetryExponentialBucketsLayout::with_precision(6).unwrap();
    let mut bytes = Vec::new();
    layout.write(&mut bytes).unwrap();
    let restored = OpenTelemetryExponentialBucketsLayout::read(&mut bytes.as_slice()).unwrap();
    assert_eq!(layout, restored);
}

#[test]
fn layouts_roundtrip_through_serde() {
    let layout = LogLinearLayout::new(1e-3, 1e-2, -10.0, 10.0).unwrap();
    let json = serde_json::to_string(&layout).unwrap();
    let restored: LogLinearLayout = serde_json::from_str(&json).unwrap();
    assert_eq!(layout, restored);

    let layout = LogOptimalLayout::new(1e-3, 1e-2, -10.0, 10.0).unwrap();
    let json = serde_json::to_string(&layout).unwrap();
    let restored: LogOptimalLayout = serde_json::from_str(&json).unwrap();
    assert_eq!(layout, restored);

    let layout = CustomLayout::new(&[1.0, 2.0, 3.0]).unwrap();
    let json = serde_json::to_string(&layout).unwrap();
    let restored: CustomLayout = serde_json::from_str(&json).unwrap();
    assert_eq!(layout, restored);

    let layout = OpenTelemetryExponentialBucketsLayout::with_precision(4).unwrap();
    let json = serde_json::to_string(&layout).unwrap();
    let restored: OpenTelemetryExponentialBucketsLayout = serde_json::from_str(&json).unwrap();
    assert_eq!(layout, restored);

    // Invalid parameters are rejected while deserializing.
    let bad = r#"{"absolute_bin_width_limit":0.0,"relative_bin_width_limit":0.01,
                  "underflow_bin_index":-5,"overflow_bin_index":5}"#;
    assert!(serde_json::from_str::<LogLinearLayout>(bad).is_err());
}

#[test]
fn equal_parameters_mean_equal_layouts_and_hashes() {
    let a = LogQuadraticLayout::new(1e-4, 1e-2, -1e3, 1e3).unwrap();
    let b = LogQuadraticLayout::new(1e-4, 1e-2, -1e3, 1e3).unwrap();
    let c = LogQuadraticLayout::new(1e-4, 1e-2, -1e3, 2e3).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let hash = |layout: &LogQuadraticLayout| {
        let mut hasher = DefaultHasher::new();
        layout.hash(&mut hasher);
        hasher.finish()
    };
    assert_eq!(hash(&a), hash(&b));
}
