//! Counter stores: the bin-indexed count arrays behind a histogram.
//!
//! The dynamic store packs counters as bit fields whose width adapts to the largest
//! count seen, so a histogram tracking millions of bins with small counts costs a few
//! bits per bin. The static store trades memory for strictly allocation-free updates by
//! laying out one 64-bit counter per regular bin up front.

/// How a counter store reacts when asked to count beyond its current capacity.
///
/// Implemented by [`DynamicCounterStore`] and [`StaticCounterStore`]; the mutable
/// histogram is generic over this trait so recording, merging and deserialization are
/// written once.
pub trait CounterStore {
    /// Creates an empty store for the regular index range
    /// `(underflow_bin_index, overflow_bin_index)`, exclusive on both sides.
    fn new(underflow_bin_index: i32, overflow_bin_index: i32) -> Self;

    /// The count at the given absolute bin index, 0 outside the backed range.
    fn count(&self, bin_index: i32) -> u64;

    /// The narrowest index range outside of which every count is zero, or `None` if
    /// nothing has been counted yet. The range may include zero counts.
    fn window(&self) -> Option<(i32, i32)>;

    /// Adds `count` to the counter at `bin_index`, growing the backing storage as
    /// needed. The index must lie strictly between the underflow and overflow indices
    /// the store was created with.
    fn increase(&mut self, bin_index: i32, count: u64);

    /// Like [`increase`](CounterStore::increase), but clips at the largest value the
    /// current counter width can hold instead of widening. Only the deserializer uses
    /// this, to stay wire-compatible when re-adding the min/max samples.
    fn increase_saturating(&mut self, bin_index: i32, count: u64);

    /// Pre-sizes the store so that counts up to `max_count` can be recorded anywhere
    /// in `[first_bin_index, last_bin_index]` without further reallocation.
    fn reserve(&mut self, first_bin_index: i32, last_bin_index: i32, max_count: u64);

    /// The absolute index of the first non-zero counter.
    fn first_non_zero_index(&self) -> Option<i32> {
        let (first, last) = self.window()?;
        (first..=last).find(|&i| self.count(i) > 0)
    }

    /// The absolute index of the last non-zero counter.
    fn last_non_zero_index(&self) -> Option<i32> {
        let (first, last) = self.window()?;
        (first..=last).rev().find(|&i| self.count(i) > 0)
    }
}

/// Fraction of the current counter range by which a growing reallocation overshoots,
/// so that a drifting distribution does not reallocate on every new bin.
const GROW_FACTOR: f64 = 0.25;

/// Returns the smallest mode (log2 of the counter bit width) whose counters can hold
/// `value`.
pub(crate) fn determine_required_mode(value: u64) -> u8 {
    if value <= 1 {
        0
    } else if value <= 3 {
        1
    } else if value <= 15 {
        2
    } else if value <= 255 {
        3
    } else if value <= 65535 {
        4
    } else if value <= 4_294_967_295 {
        5
    } else {
        6
    }
}

fn counter_mask(mode: u8) -> u64 {
    if mode >= 6 {
        u64::MAX
    } else {
        (1u64 << (1u32 << mode)) - 1
    }
}

/// A bit-packed, mode-adaptive counter array.
///
/// Counter position `p` (relative to `index_offset`) occupies the bit range
/// `[(p << mode) mod 64, ((p + 1) << mode) mod 64)` of word `p >> (6 - mode)`, so a
/// word holds `2^(6 - mode)` counters of `2^mode` bits each. Recording a count that no
/// longer fits the current width, or an index outside the current range, allocates one
/// fresh buffer, re-packs every counter, and swaps it in; counts are never lost and a
/// single update reallocates at most once.
#[derive(Debug, Clone)]
pub struct DynamicCounterStore {
    index_offset: i32,
    mode: u8,
    number_of_unused_counters: u8,
    counters: Vec<u64>,
    // Regular range the store may cover, exclusive bounds.
    underflow_bin_index: i32,
    overflow_bin_index: i32,
}

impl DynamicCounterStore {
    fn num_counters(&self) -> i64 {
        let slots = (self.counters.len() as i64) << (6 - self.mode);
        slots - i64::from(self.number_of_unused_counters)
    }

    fn get_packed(counters: &[u64], mode: u8, position: i64) -> u64 {
        let word = (position >> (6 - mode)) as usize;
        let shift = ((position << mode) & 63) as u32;
        (counters[word] >> shift) & counter_mask(mode)
    }

    fn set_packed(counters: &mut [u64], mode: u8, position: i64, value: u64) {
        debug_assert!(value <= counter_mask(mode));
        let word = (position >> (6 - mode)) as usize;
        let shift = ((position << mode) & 63) as u32;
        counters[word] &= !(counter_mask(mode) << shift);
        counters[word] |= value << shift;
    }

    /// Grows the index range and/or the counter width so that `min_bin_index` through
    /// `max_bin_index` are backed and a counter can hold values of `required_mode`.
    /// Existing counts carry over; at most one allocation happens.
    fn ensure(&mut self, min_bin_index: i32, max_bin_index: i32, required_mode: u8) {
        debug_assert!(min_bin_index <= max_bin_index);
        debug_assert!(min_bin_index > self.underflow_bin_index);
        debug_assert!(max_bin_index < self.overflow_bin_index);

        let new_mode = self.mode.max(required_mode);
        let (new_min, new_max) = if self.counters.is_empty() {
            (i64::from(min_bin_index), i64::from(max_bin_index))
        } else {
            let current_min = i64::from(self.index_offset);
            let current_max = current_min + self.num_counters() - 1;
            let growth = (self.num_counters() as f64 * GROW_FACTOR).ceil() as i64;
            let new_min = if i64::from(min_bin_index) < current_min {
                i64::from(self.underflow_bin_index + 1)
                    .max(i64::from(min_bin_index).min(current_min - growth))
            } else {
                current_min
            };
            let new_max = if i64::from(max_bin_index) > current_max {
                i64::from(self.overflow_bin_index - 1)
                    .min(i64::from(max_bin_index).max(current_max + growth))
            } else {
                current_max
            };
            (new_min, new_max)
        };

        let unchanged = !self.counters.is_empty()
            && new_mode == self.mode
            && new_min == i64::from(self.index_offset)
            && new_max == i64::from(self.index_offset) + self.num_counters() - 1;
        if unchanged {
            return;
        }

        let new_num_counters = new_max - new_min + 1;
        let counters_per_word = 1i64 << (6 - new_mode);
        let num_words = (new_num_counters + counters_per_word - 1) >> (6 - new_mode);
        let number_of_unused_counters = (num_words * counters_per_word - new_num_counters) as u8;

        let mut new_counters = vec![0u64; num_words as usize];
        if !self.counters.is_empty() {
            let old_min = i64::from(self.index_offset);
            for position in 0..self.num_counters() {
                let value = Self::get_packed(&self.counters, self.mode, position);
                if value != 0 {
                    Self::set_packed(
                        &mut new_counters,
                        new_mode,
                        old_min - new_min + position,
                        value,
                    );
                }
            }
        }

        self.counters = new_counters;
        self.index_offset = new_min as i32;
        self.mode = new_mode;
        self.number_of_unused_counters = number_of_unused_counters;
    }

    fn increase_inner(&mut self, bin_index: i32, count: u64, saturate: bool) {
        if count == 0 {
            return;
        }
        debug_assert!(
            bin_index > self.underflow_bin_index && bin_index < self.overflow_bin_index
        );
        let current = self.count(bin_index);
        let new_value = current.saturating_add(count);
        let required_mode = determine_required_mode(new_value);
        let position = i64::from(bin_index) - i64::from(self.index_offset);
        let in_range =
            !self.counters.is_empty() && position >= 0 && position < self.num_counters();
        if !in_range || required_mode > self.mode {
            if saturate && in_range {
                Self::set_packed(&mut self.counters, self.mode, position, counter_mask(self.mode));
                return;
            }
            self.ensure(bin_index, bin_index, required_mode);
        }
        let position = i64::from(bin_index) - i64::from(self.index_offset);
        Self::set_packed(&mut self.counters, self.mode, position, new_value);
    }

    #[cfg(test)]
    fn mode(&self) -> u8 {
        self.mode
    }

    #[cfg(test)]
    fn index_offset(&self) -> i32 {
        self.index_offset
    }
}

impl CounterStore for DynamicCounterStore {
    fn new(underflow_bin_index: i32, overflow_bin_index: i32) -> DynamicCounterStore {
        debug_assert!(underflow_bin_index < overflow_bin_index);
        DynamicCounterStore {
            index_offset: 0,
            mode: 0,
            number_of_unused_counters: 0,
            counters: Vec::new(),
            underflow_bin_index,
            overflow_bin_index,
        }
    }

    fn count(&self, bin_index: i32) -> u64 {
        if self.counters.is_empty() {
            return 0;
        }
        let position = i64::from(bin_index) - i64::from(self.index_offset);
        if position < 0 || position >= self.num_counters() {
            return 0;
        }
        Self::get_packed(&self.counters, self.mode, position)
    }

    fn window(&self) -> Option<(i32, i32)> {
        if self.counters.is_empty() {
            None
        } else {
            let first = self.index_offset;
            let last = i64::from(self.index_offset) + self.num_counters() - 1;
            Some((first, last as i32))
        }
    }

    fn increase(&mut self, bin_index: i32, count: u64) {
        self.increase_inner(bin_index, count, false);
    }

    fn increase_saturating(&mut self, bin_index: i32, count: u64) {
        self.increase_inner(bin_index, count, true);
    }

    fn reserve(&mut self, first_bin_index: i32, last_bin_index: i32, max_count: u64) {
        self.ensure(
            first_bin_index,
            last_bin_index,
            determine_required_mode(max_count),
        );
    }
}

/// A counter store with the whole regular index range allocated at creation, one
/// 64-bit counter per bin. Recording never allocates.
#[derive(Debug, Clone)]
pub struct StaticCounterStore {
    index_offset: i32,
    counters: Vec<u64>,
}

impl CounterStore for StaticCounterStore {
    fn new(underflow_bin_index: i32, overflow_bin_index: i32) -> StaticCounterStore {
        debug_assert!(underflow_bin_index < overflow_bin_index);
        let num_counters = i64::from(overflow_bin_index) - i64::from(underflow_bin_index) - 1;
        StaticCounterStore {
            index_offset: underflow_bin_index + 1,
            counters: vec![0u64; num_counters as usize],
        }
    }

    fn count(&self, bin_index: i32) -> u64 {
        let position = i64::from(bin_index) - i64::from(self.index_offset);
        if position < 0 || position >= self.counters.len() as i64 {
            return 0;
        }
        self.counters[position as usize]
    }

    fn window(&self) -> Option<(i32, i32)> {
        if self.counters.is_empty() {
            None
        } else {
            let last = i64::from(self.index_offset) + self.counters.len() as i64 - 1;
            Some((self.index_offset, last as i32))
        }
    }

    fn increase(&mut self, bin_index: i32, count: u64) {
        let position = (i64::from(bin_index) - i64::from(self.index_offset)) as usize;
        self.counters[position] = self.counters[position].saturating_add(count);
    }

    fn increase_saturating(&mut self, bin_index: i32, count: u64) {
        self.increase(bin_index, count);
    }

    fn reserve(&mut self, _first_bin_index: i32, _last_bin_index: i32, _max_count: u64) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn required_mode_thresholds() {
        assert_eq!(determine_required_mode(0), 0);
        assert_eq!(determine_required_mode(1), 0);
        assert_eq!(determine_required_mode(2), 1);
        assert_eq!(determine_required_mode(3), 1);
        assert_eq!(determine_required_mode(4), 2);
        assert_eq!(determine_required_mode(15), 2);
        assert_eq!(determine_required_mode(16), 3);
        assert_eq!(determine_required_mode(255), 3);
        assert_eq!(determine_required_mode(256), 4);
        assert_eq!(determine_required_mode(65535), 4);
        assert_eq!(determine_required_mode(65536), 5);
        assert_eq!(determine_required_mode(4_294_967_295), 5);
        assert_eq!(determine_required_mode(4_294_967_296), 6);
        assert_eq!(determine_required_mode(u64::MAX), 6);
    }

    #[test]
    fn empty_store_reads_zero_everywhere() {
        let store = DynamicCounterStore::new(-100, 100);
        assert_eq!(store.count(-101), 0);
        assert_eq!(store.count(0), 0);
        assert_eq!(store.count(99), 0);
        assert_eq!(store.window(), None);
        assert_eq!(store.first_non_zero_index(), None);
    }

    #[test]
    fn single_increase_allocates_single_counter() {
        let mut store = DynamicCounterStore::new(-100, 100);
        store.increase(7, 1);
        assert_eq!(store.count(7), 1);
        assert_eq!(store.count(6), 0);
        assert_eq!(store.count(8), 0);
        assert_eq!(store.mode(), 0);
        assert_eq!(store.window(), Some((7, 7)));
    }

    #[test]
    fn widening_keeps_counts() {
        let mut store = DynamicCounterStore::new(-1000, 1000);
        for i in 0..50 {
            store.increase(i, (i as u64 % 3) + 1);
        }
        // Force mode 6.
        store.increase(10, u64::MAX / 2);
        assert_eq!(store.mode(), 6);
        for i in 0..50 {
            let expected = (i as u64 % 3) + 1 + if i == 10 { u64::MAX / 2 } else { 0 };
            assert_eq!(store.count(i), expected, "bin {}", i);
        }
    }

    #[test]
    fn grow_factor_overshoots_downwards_and_upwards() {
        let mut store = DynamicCounterStore::new(-1000, 1000);
        for i in 0..100 {
            store.increase(i, 1);
        }
        assert_eq!(store.window(), Some((0, 99)));
        // One index below the window grows by at least 25% of 100 counters.
        store.increase(-1, 1);
        let (first, _) = store.window().unwrap();
        assert!(first <= -25, "window start {}", first);
        assert_eq!(store.count(-1), 1);
        assert_eq!(store.count(first), 0);
    }

    #[test]
    fn growth_is_clipped_at_the_index_range() {
        let mut store = DynamicCounterStore::new(-4, 1000);
        for i in 0..100 {
            store.increase(i, 1);
        }
        store.increase(-3, 1);
        let (first, _) = store.window().unwrap();
        assert_eq!(first, -3);
        assert_eq!(store.count(-3), 1);
    }

    #[test]
    fn saturating_increase_clips_at_mode_ceiling() {
        let mut store = DynamicCounterStore::new(-10, 10);
        store.increase(3, 255);
        assert_eq!(store.mode(), 3);
        store.increase_saturating(3, 1);
        assert_eq!(store.count(3), 255);
        assert_eq!(store.mode(), 3);
        // The widening path is untouched.
        store.increase(3, 1);
        assert_eq!(store.count(3), 256);
        assert_eq!(store.mode(), 4);
    }

    #[test]
    fn reserve_prevents_reallocation() {
        let mut store = DynamicCounterStore::new(-1000, 1000);
        store.reserve(-500, 500, 70000);
        assert_eq!(store.mode(), 5);
        let offset_before = store.index_offset();
        for i in -500..=500 {
            store.increase(i, 65000);
        }
        assert_eq!(store.index_offset(), offset_before);
        assert_eq!(store.mode(), 5);
    }

    #[test]
    fn random_against_reference_model() {
        let mut rng = SmallRng::seed_from_u64(0x51ab_77d3);
        for _ in 0..50 {
            let mut store = DynamicCounterStore::new(-300, 300);
            let mut model = std::collections::HashMap::new();
            for _ in 0..500 {
                let idx = rng.gen_range(-299..300);
                let count = match rng.gen_range(0..4) {
                    0 => 1,
                    1 => rng.gen_range(1..4u64),
                    2 => rng.gen_range(1..300u64),
                    _ => rng.gen_range(1..100_000u64),
                };
                store.increase(idx, count);
                *model.entry(idx).or_insert(0u64) += count;
            }
            for idx in -299..300 {
                assert_eq!(store.count(idx), model.get(&idx).copied().unwrap_or(0));
            }
            assert_eq!(
                store.first_non_zero_index(),
                model.keys().min().copied(),
            );
            assert_eq!(
                store.last_non_zero_index(),
                model.keys().max().copied(),
            );
        }
    }

    #[test]
    fn static_store_covers_full_range() {
        let mut store = StaticCounterStore::new(-5, 5);
        assert_eq!(store.window(), Some((-4, 4)));
        store.increase(-4, 3);
        store.increase(4, u64::MAX);
        store.increase(4, 10);
        assert_eq!(store.count(-4), 3);
        assert_eq!(store.count(4), u64::MAX);
        assert_eq!(store.count(5), 0);
        assert_eq!(store.first_non_zero_index(), Some(-4));
        assert_eq!(store.last_non_zero_index(), Some(4));
    }
}
