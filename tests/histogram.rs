//! Recording and query contract tests over the mutable representations.

use dynahist::estimators::ValueEstimator;
use dynahist::layout::{Layout, LogQuadraticLayout};
use dynahist::{
    DynamicHistogram, Histogram, PreprocessedHistogram, QueryError, RecordError, StaticHistogram,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

mod common;
use common::{assert_same_content, RoundingLayout};

fn layout() -> RoundingLayout {
    RoundingLayout::new(-100, 100)
}

#[test]
fn empty_histogram() {
    let histogram = DynamicHistogram::new(layout());
    assert!(histogram.is_empty());
    assert_eq!(histogram.total_count(), 0);
    assert_eq!(histogram.underflow_count(), 0);
    assert_eq!(histogram.overflow_count(), 0);
    assert_eq!(histogram.min(), f64::INFINITY);
    assert_eq!(histogram.max(), f64::NEG_INFINITY);
    assert!(histogram.first_non_empty_bin().is_none());
    assert!(histogram.last_non_empty_bin().is_none());
    assert_eq!(histogram.bin_by_rank(0).unwrap_err(), QueryError::RankOutOfBounds);
    assert!(histogram.value_at_quantile(0.5).unwrap().is_nan());
}

#[test]
fn record_routes_to_bins() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add(10.4).unwrap();
    histogram.add(10.6).unwrap();
    histogram.add(-1000.0).unwrap();
    histogram.add(1000.0).unwrap();
    histogram.add_with_count(0.0, 5).unwrap();

    assert_eq!(histogram.total_count(), 9);
    assert_eq!(histogram.underflow_count(), 1);
    assert_eq!(histogram.overflow_count(), 1);
    assert_eq!(histogram.count(10), 1);
    assert_eq!(histogram.count(11), 1);
    assert_eq!(histogram.count(0), 5);
    assert_eq!(histogram.count(57), 0);
    assert_eq!(histogram.min(), -1000.0);
    assert_eq!(histogram.max(), 1000.0);
}

#[test]
fn infinities_are_valid_samples() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add(f64::INFINITY).unwrap();
    histogram.add(f64::NEG_INFINITY).unwrap();
    assert_eq!(histogram.underflow_count(), 1);
    assert_eq!(histogram.overflow_count(), 1);
    assert_eq!(histogram.min(), f64::NEG_INFINITY);
    assert_eq!(histogram.max(), f64::INFINITY);
    assert_eq!(histogram.value_at_rank(0).unwrap(), f64::NEG_INFINITY);
    assert_eq!(histogram.value_at_rank(1).unwrap(), f64::INFINITY);
}

#[test]
fn nan_is_rejected_and_leaves_state() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add(5.0).unwrap();
    let err = histogram.add(f64::NAN).unwrap_err();
    assert_eq!(err, RecordError::ValueIsNan);
    assert_eq!(histogram.total_count(), 1);
    assert_eq!(histogram.min(), 5.0);
    assert_eq!(histogram.max(), 5.0);
}

#[test]
fn zero_count_is_a_no_op() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add_with_count(5.0, 0).unwrap();
    assert!(histogram.is_empty());
    assert_eq!(histogram.min(), f64::INFINITY);
}

#[test]
fn signed_zeros_keep_their_identity() {
    let small = RoundingLayout::new(-1, 1);
    let mut histogram = DynamicHistogram::new(small);
    histogram.add(0.0).unwrap();
    histogram.add(-0.0).unwrap();
    assert_eq!(histogram.min().to_bits(), 0x8000_0000_0000_0000);
    assert_eq!(histogram.max().to_bits(), 0x0000_0000_0000_0000);

    // A single +0.0 must not report min as -0.0, and vice versa.
    let mut histogram = DynamicHistogram::new(RoundingLayout::new(-1, 1));
    histogram.add(0.0).unwrap();
    assert_eq!(histogram.min().to_bits(), 0);
    assert_eq!(histogram.max().to_bits(), 0);
    let mut histogram = DynamicHistogram::new(RoundingLayout::new(-1, 1));
    histogram.add(-0.0).unwrap();
    assert_eq!(histogram.min().to_bits(), 0x8000_0000_0000_0000);
    assert_eq!(histogram.max().to_bits(), 0x8000_0000_0000_0000);
}

#[test]
fn total_count_overflow_rolls_back() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add_with_count(10.0, i64::MAX as u64).unwrap();
    assert_eq!(histogram.total_count(), i64::MAX as u64);

    let err = histogram.add(90.0).unwrap_err();
    assert_eq!(err, RecordError::TotalCountOverflow);
    assert_eq!(histogram.total_count(), i64::MAX as u64);
    assert_eq!(histogram.count(90), 0);
    assert_eq!(histogram.max(), 10.0);

    let err = histogram
        .add_ascending_sequence(|_| 50.0, 2)
        .unwrap_err();
    assert_eq!(err, RecordError::TotalCountOverflow);
    assert_eq!(histogram.total_count(), i64::MAX as u64);
}

#[test]
fn count_sum_invariant_under_random_updates() {
    let mut rng = SmallRng::seed_from_u64(0x00c0_ffee);
    for _ in 0..50 {
        let mut histogram = DynamicHistogram::new(layout());
        let mut expected_total = 0u64;
        for _ in 0..rng.gen_range(1..100) {
            let value = rng.gen_range(-150.0..150.0);
            let count = rng.gen_range(1..1000u64);
            histogram.add_with_count(value, count).unwrap();
            expected_total += count;
        }
        assert_eq!(histogram.total_count(), expected_total);
        let bin_sum: u64 = histogram
            .non_empty_bins_ascending()
            .map(|bin| bin.bin_count())
            .sum();
        assert_eq!(bin_sum, expected_total);
        let regular_sum: u64 = histogram
            .regular_window()
            .map_or(0, |(first, last)| (first..=last).map(|i| histogram.count(i)).sum());
        assert_eq!(
            regular_sum,
            expected_total - histogram.underflow_count() - histogram.overflow_count()
        );
    }
}

#[test]
fn min_max_match_reference_under_random_updates() {
    let mut rng = SmallRng::seed_from_u64(0xfeed_f00d);
    for _ in 0..100 {
        let mut histogram = DynamicHistogram::new(layout());
        let mut values = Vec::new();
        for _ in 0..rng.gen_range(1..60) {
            let value: f64 = if rng.gen_bool(0.1) {
                if rng.gen_bool(0.5) {
                    0.0
                } else {
                    -0.0
                }
            } else {
                rng.gen_range(-200.0..200.0)
            };
            histogram.add(value).unwrap();
            values.push(value);
        }
        let to_ordered = |v: f64| {
            let bits = v.to_bits() as i64;
            (((bits >> 62) as u64 >> 1) as i64) ^ bits
        };
        let min = values.iter().copied().min_by_key(|&v| to_ordered(v)).unwrap();
        let max = values.iter().copied().max_by_key(|&v| to_ordered(v)).unwrap();
        assert_eq!(histogram.min().to_bits(), min.to_bits());
        assert_eq!(histogram.max().to_bits(), max.to_bits());
    }
}

#[test]
fn rank_endpoints_are_exact() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add(17.25).unwrap();
    histogram.add(-33.75).unwrap();
    histogram.add_with_count(2.5, 10).unwrap();
    let total = histogram.total_count();
    for estimator in [
        ValueEstimator::Uniform,
        ValueEstimator::LowerBound,
        ValueEstimator::UpperBound,
        ValueEstimator::MidPoint,
    ] {
        assert_eq!(histogram.value_at_rank_with(0, estimator).unwrap(), -33.75);
        assert_eq!(
            histogram.value_at_rank_with(total - 1, estimator).unwrap(),
            17.25
        );
    }
    assert_eq!(
        histogram.value_at_rank(total).unwrap_err(),
        QueryError::RankOutOfBounds
    );
}

#[test]
fn bin_by_rank_matches_model() {
    let mut rng = SmallRng::seed_from_u64(0x0b1b_5eed);
    for _ in 0..20 {
        let mut histogram = DynamicHistogram::new(layout());
        let mut model: Vec<(i32, u64)> = Vec::new();
        for _ in 0..rng.gen_range(1..40) {
            let value = rng.gen_range(-150.0..150.0);
            let count = rng.gen_range(1..50u64);
            histogram.add_with_count(value, count).unwrap();
        }
        for bin in histogram.non_empty_bins_ascending() {
            model.push((bin.bin_index(), bin.bin_count()));
        }
        let mut rank = 0u64;
        for &(bin_index, bin_count) in &model {
            for _ in 0..bin_count {
                let bin = histogram.bin_by_rank(rank).unwrap();
                assert_eq!(bin.bin_index(), bin_index, "rank {}", rank);
                assert_eq!(bin.bin_count(), bin_count);
                rank += 1;
            }
        }
    }
}

#[test]
fn bin_iteration_is_consistent_both_ways() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add_with_count(-500.0, 2).unwrap();
    histogram.add_with_count(-7.0, 3).unwrap();
    histogram.add_with_count(12.0, 1).unwrap();
    histogram.add_with_count(900.0, 4).unwrap();

    let ascending: Vec<(i32, u64, u64, u64)> = histogram
        .non_empty_bins_ascending()
        .map(|b| (b.bin_index(), b.bin_count(), b.less_count(), b.greater_count()))
        .collect();
    assert_eq!(
        ascending,
        vec![
            (-100, 2, 0, 8),
            (-7, 3, 2, 5),
            (12, 1, 5, 4),
            (100, 4, 6, 0),
        ]
    );
    let mut descending: Vec<(i32, u64, u64, u64)> = histogram
        .non_empty_bins_descending()
        .map(|b| (b.bin_index(), b.bin_count(), b.less_count(), b.greater_count()))
        .collect();
    descending.reverse();
    assert_eq!(ascending, descending);

    let first = histogram.first_non_empty_bin().unwrap();
    assert!(first.is_underflow());
    let last = histogram.last_non_empty_bin().unwrap();
    assert!(last.is_overflow());
}

#[test]
fn ascending_sequence_equals_element_wise_adds() {
    let mut rng = SmallRng::seed_from_u64(0xa5ce_0001);
    for _ in 0..50 {
        let mut values: Vec<f64> = (0..rng.gen_range(1..500))
            .map(|_| rng.gen_range(-150.0..150.0))
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let mut bulk = DynamicHistogram::new(layout());
        bulk.add_ascending_sequence(|i| values[i as usize], values.len() as u64)
            .unwrap();

        let mut reference = DynamicHistogram::new(layout());
        for &value in &values {
            reference.add(value).unwrap();
        }
        assert_eq!(bulk, reference);
    }
}

#[test]
fn ascending_sequence_with_many_duplicates_touches_few_bins() {
    let mut histogram = DynamicHistogram::new(layout());
    // 1e6 samples over 3 distinct values; must finish quickly despite the length.
    let length = 1_000_000u64;
    histogram
        .add_ascending_sequence(
            |i| {
                if i < 300_000 {
                    -20.0
                } else if i < 900_000 {
                    0.25
                } else {
                    63.0
                }
            },
            length,
        )
        .unwrap();
    assert_eq!(histogram.total_count(), length);
    assert_eq!(histogram.count(-20), 300_000);
    assert_eq!(histogram.count(0), 600_000);
    assert_eq!(histogram.count(63), 100_000);
    assert_eq!(histogram.min(), -20.0);
    assert_eq!(histogram.max(), 63.0);
}

#[test]
fn merge_equals_element_wise_adds() {
    let mut rng = SmallRng::seed_from_u64(0x3e6e_0001);
    for _ in 0..30 {
        let mut a = DynamicHistogram::new(layout());
        let mut b = DynamicHistogram::new(layout());
        let mut reference = DynamicHistogram::new(layout());
        for _ in 0..rng.gen_range(0..50) {
            let value = rng.gen_range(-150.0..150.0);
            a.add(value).unwrap();
            reference.add(value).unwrap();
        }
        for _ in 0..rng.gen_range(0..50) {
            let value = rng.gen_range(-150.0..150.0);
            b.add(value).unwrap();
            reference.add(value).unwrap();
        }
        let mut merged = DynamicHistogram::new(layout());
        merged.add_histogram(&a).unwrap();
        merged.add_histogram(&b).unwrap();
        assert_eq!(merged, reference);

        // Commutativity.
        let mut reversed = DynamicHistogram::new(layout());
        reversed.add_histogram(&b).unwrap();
        reversed.add_histogram(&a).unwrap();
        assert_eq!(merged, reversed);
    }
}

#[test]
fn merge_across_layout_parameters_preserves_totals_and_extremes() {
    let coarse = LogQuadraticLayout::new(1e-2, 1e-1, -100.0, 100.0).unwrap();
    let fine = LogQuadraticLayout::new(1e-4, 1e-3, -100.0, 100.0).unwrap();

    let mut source = DynamicHistogram::new(fine);
    let mut rng = SmallRng::seed_from_u64(0x3e6e_0002);
    for _ in 0..500 {
        source.add(rng.gen_range(-90.0..90.0)).unwrap();
    }

    let mut target = DynamicHistogram::new(coarse);
    target.add(3.5).unwrap();
    target.add_histogram(&source).unwrap();

    assert_eq!(target.total_count(), source.total_count() + 1);
    assert_eq!(target.min().to_bits(), source.min().min(3.5).to_bits());
    assert_eq!(target.max().to_bits(), source.max().max(3.5).to_bits());
}

#[test]
fn static_histogram_matches_dynamic() {
    let mut rng = SmallRng::seed_from_u64(0x57a7_0001);
    let mut dynamic = DynamicHistogram::new(layout());
    let mut fixed = StaticHistogram::new(layout());
    for _ in 0..300 {
        let value = rng.gen_range(-150.0..150.0);
        let count = rng.gen_range(1..10u64);
        dynamic.add_with_count(value, count).unwrap();
        fixed.add_with_count(value, count).unwrap();
    }
    assert_same_content(&dynamic, &fixed);
    for rank in [0, 1, 77, dynamic.total_count() - 1] {
        assert_eq!(
            dynamic.value_at_rank(rank).unwrap().to_bits(),
            fixed.value_at_rank(rank).unwrap().to_bits()
        );
    }
}

#[test]
fn preprocessed_agrees_with_source_and_is_idempotent() {
    let mut rng = SmallRng::seed_from_u64(0x9e9e_0001);
    let mut histogram = DynamicHistogram::new(layout());
    for _ in 0..200 {
        histogram
            .add_with_count(rng.gen_range(-150.0..150.0), rng.gen_range(1..5u64))
            .unwrap();
    }
    let preprocessed = histogram.preprocess();
    assert_same_content(&histogram, &preprocessed);

    let again: PreprocessedHistogram<_> = preprocessed.preprocess();
    assert_eq!(preprocessed, again);

    for rank in 0..histogram.total_count() {
        assert_eq!(
            histogram.bin_by_rank(rank).unwrap().bin_index(),
            preprocessed.bin_by_rank(rank).unwrap().bin_index(),
            "rank {}",
            rank
        );
        assert_eq!(
            histogram.value_at_rank(rank).unwrap().to_bits(),
            preprocessed.value_at_rank(rank).unwrap().to_bits(),
            "rank {}",
            rank
        );
    }
}

#[test]
fn value_estimates_stay_inside_bins() {
    let mut histogram = DynamicHistogram::new(layout());
    histogram.add_with_count(-20.3, 4).unwrap();
    histogram.add_with_count(5.2, 7).unwrap();
    histogram.add_with_count(40.9, 2).unwrap();
    let layout = layout();

    for rank in 1..histogram.total_count() - 1 {
        let bin = histogram.bin_by_rank(rank).unwrap();
        let lower = layout.bin_lower_bound(bin.bin_index()).max(histogram.min());
        let upper = layout.bin_upper_bound(bin.bin_index()).min(histogram.max());
        let low_estimate = histogram
            .value_at_rank_with(rank, ValueEstimator::LowerBound)
            .unwrap();
        let high_estimate = histogram
            .value_at_rank_with(rank, ValueEstimator::UpperBound)
            .unwrap();
        let mid_estimate = histogram
            .value_at_rank_with(rank, ValueEstimator::MidPoint)
            .unwrap();
        let uniform_estimate = histogram
            .value_at_rank_with(rank, ValueEstimator::Uniform)
            .unwrap();
        assert_eq!(low_estimate, lower);
        assert_eq!(high_estimate, upper);
        assert!(mid_estimate >= lower && mid_estimate <= upper);
        assert!(uniform_estimate >= lower && uniform_estimate <= upper);
    }

    // Uniform estimates are non-decreasing in rank.
    let mut previous = f64::NEG_INFINITY;
    for rank in 0..histogram.total_count() {
        let estimate = histogram.value_at_rank(rank).unwrap();
        assert!(estimate >= previous, "rank {}", rank);
        previous = estimate;
    }
}
