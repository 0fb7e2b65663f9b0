//! Pass scheduling.
//!
//! A reduction over `N` elements is a sequence of device dispatches, each one
//! shrinking the active range until a single element remains. This module
//! computes that sequence without touching a device: [`PassSchedule`] is an
//! iterator of [`PassDescriptor`]s, one per dispatch. The engine walks it and
//! issues the passes.
//!
//! # Per-strategy state machine
//!
//! | strategy | threads | stride / param | next active |
//! |---|---|---|---|
//! | interleaved | `ceil(a/2)` | 1, 2, 4, ... | `ceil(a/2)` |
//! | sequential | `floor(a/2)` | `ceil(a/2)` | `ceil(a/2)` |
//! | decomposition | `groups * L` | `a` | `ceil(a / 2L)` |
//! | decomposition unrolled | `groups * L` | `a` | `ceil(a / 2L*UNROLL_FACTOR)` |
//!
//! Ceiling division keeps non-power-of-two sizes exact and never produces an
//! empty active range, so every schedule ends with exactly one element.

use serde::{Deserialize, Serialize};

use crate::strategy::Strategy;

/// Element pairs each thread of the unrolled decomposition accumulates
/// before the in-group tree.
pub const UNROLL_FACTOR: usize = 4;

/// Width of the warp-synchronous tail of the unrolled decomposition.
pub const WARP_SIZE: usize = 32;

/// Bytes of scratch memory per work-group thread.
pub const SCRATCH_ELEMENT_BYTES: usize = std::mem::size_of::<u32>();

/// Launch geometry and arguments of one reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassDescriptor {
    /// Zero-based position in the schedule.
    pub index: usize,
    /// Threads that do useful work in this pass.
    pub global_threads: usize,
    /// Work-group size, never larger than `global_threads`.
    pub local_size: usize,
    /// Stride for the addressing strategies, active length for the
    /// decomposition strategies.
    pub param: u32,
    /// Active elements before the pass.
    pub active_in: usize,
    /// Active elements after the pass.
    pub active_out: usize,
    /// Dynamic scratch memory per work group (0 for in-place passes).
    pub scratch_bytes: usize,
}

impl PassDescriptor {
    /// Number of work groups needed to cover `global_threads`.
    pub fn groups(&self) -> usize {
        self.global_threads.div_ceil(self.local_size)
    }
}

/// Iterator over the passes reducing `len` elements to one.
#[derive(Debug, Clone)]
pub struct PassSchedule {
    strategy: Strategy,
    base_group_size: usize,
    active: usize,
    stride: usize,
    index: usize,
}

impl PassSchedule {
    /// Create the schedule for `strategy`.
    ///
    /// `base_group_size` is the configured work-group size; it is clamped
    /// per pass. An empty input is treated like a single element.
    pub fn new(strategy: Strategy, len: usize, base_group_size: usize) -> Self {
        Self {
            strategy,
            base_group_size: base_group_size.max(1),
            active: len.max(1),
            stride: 1,
            index: 0,
        }
    }

    /// Strategy this schedule drives.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Active elements before the next pass.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Number of passes remaining.
    pub fn pass_count(&self) -> usize {
        self.clone().count()
    }

    fn interleaved(&mut self) -> PassDescriptor {
        let threads = self.active.div_ceil(2);
        let pass = PassDescriptor {
            index: self.index,
            global_threads: threads,
            local_size: self.base_group_size.min(threads),
            param: self.stride as u32,
            active_in: self.active,
            active_out: threads,
            scratch_bytes: 0,
        };
        self.stride *= 2;
        pass
    }

    fn sequential(&mut self) -> PassDescriptor {
        let stride = self.active.div_ceil(2);
        let threads = self.active - stride;
        PassDescriptor {
            index: self.index,
            global_threads: threads,
            local_size: self.base_group_size.min(threads),
            param: stride as u32,
            active_in: self.active,
            active_out: stride,
            scratch_bytes: 0,
        }
    }

    fn decomposition(&mut self, elements_per_thread: usize) -> PassDescriptor {
        // The in-group tree halves the step each round, so the group size
        // stays a power of two.
        let wanted = self.active.div_ceil(elements_per_thread).next_power_of_two();
        let local = prev_power_of_two(self.base_group_size).min(wanted);
        let groups = self.active.div_ceil(local * elements_per_thread);
        PassDescriptor {
            index: self.index,
            global_threads: groups * local,
            local_size: local,
            param: self.active as u32,
            active_in: self.active,
            active_out: groups,
            scratch_bytes: local * SCRATCH_ELEMENT_BYTES,
        }
    }
}

impl Iterator for PassSchedule {
    type Item = PassDescriptor;

    fn next(&mut self) -> Option<PassDescriptor> {
        if self.active <= 1 {
            return None;
        }

        let pass = match self.strategy {
            Strategy::InterleavedAddressing => self.interleaved(),
            Strategy::SequentialAddressing => self.sequential(),
            Strategy::Decomposition => self.decomposition(2),
            Strategy::DecompositionUnrolled => self.decomposition(2 * UNROLL_FACTOR),
        };

        debug_assert!(pass.local_size <= pass.global_threads);
        debug_assert!(pass.active_out < pass.active_in);

        self.active = pass.active_out.max(1);
        self.index += 1;
        Some(pass)
    }
}

/// Largest power of two not greater than `n` (`n >= 1`).
pub fn prev_power_of_two(n: usize) -> usize {
    if n == 0 {
        return 1;
    }
    1 << (usize::BITS - 1 - n.leading_zeros())
}

/// Upper bound on the pass count of any strategy: `ceil(log2(len))`.
pub fn max_passes(len: usize) -> usize {
    if len <= 1 {
        0
    } else {
        (usize::BITS - (len - 1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(strategy: Strategy, len: usize, group: usize) -> Vec<PassDescriptor> {
        strategy.schedule(len, group).collect()
    }

    #[test]
    fn test_single_element_has_no_passes() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.schedule(1, 256).pass_count(), 0);
            assert_eq!(strategy.schedule(0, 256).pass_count(), 0);
        }
    }

    #[test]
    fn test_interleaved_power_of_two() {
        let passes = collect(Strategy::InterleavedAddressing, 16, 4);
        let strides: Vec<u32> = passes.iter().map(|p| p.param).collect();
        let threads: Vec<usize> = passes.iter().map(|p| p.global_threads).collect();
        let locals: Vec<usize> = passes.iter().map(|p| p.local_size).collect();

        assert_eq!(strides, vec![1, 2, 4, 8]);
        assert_eq!(threads, vec![8, 4, 2, 1]);
        assert_eq!(locals, vec![4, 4, 2, 1]);
    }

    #[test]
    fn test_sequential_power_of_two() {
        let passes = collect(Strategy::SequentialAddressing, 16, 256);
        let strides: Vec<u32> = passes.iter().map(|p| p.param).collect();
        let threads: Vec<usize> = passes.iter().map(|p| p.global_threads).collect();

        assert_eq!(strides, vec![8, 4, 2, 1]);
        assert_eq!(threads, vec![8, 4, 2, 1]);
        assert!(passes.iter().all(|p| p.local_size == p.global_threads));
    }

    #[test]
    fn test_sequential_odd_length() {
        // 7 -> 4 -> 2 -> 1
        let passes = collect(Strategy::SequentialAddressing, 7, 256);
        let shape: Vec<(u32, usize, usize)> = passes
            .iter()
            .map(|p| (p.param, p.global_threads, p.active_out))
            .collect();
        assert_eq!(shape, vec![(4, 3, 4), (2, 2, 2), (1, 1, 1)]);
    }

    #[test]
    fn test_interleaved_odd_length() {
        // 5 -> 3 -> 2 -> 1 with strides 1, 2, 4
        let passes = collect(Strategy::InterleavedAddressing, 5, 256);
        let shape: Vec<(u32, usize)> = passes.iter().map(|p| (p.param, p.active_out)).collect();
        assert_eq!(shape, vec![(1, 3), (2, 2), (4, 1)]);
    }

    #[test]
    fn test_decomposition_shrinks_by_group_fan_in() {
        let passes = collect(Strategy::Decomposition, 1 << 20, 256);
        let actives: Vec<usize> = passes.iter().map(|p| p.active_out).collect();
        assert_eq!(actives, vec![2048, 4, 1]);

        let last = passes.last().unwrap();
        assert_eq!(last.local_size, 2);
        assert_eq!(last.global_threads, 2);
        assert_eq!(last.scratch_bytes, 2 * SCRATCH_ELEMENT_BYTES);
        assert!(passes.iter().all(|p| p.param as usize == p.active_in));
    }

    #[test]
    fn test_unrolled_uses_fewer_passes() {
        let len = 1 << 20;
        let plain = Strategy::Decomposition.schedule(len, 128).pass_count();
        let unrolled = Strategy::DecompositionUnrolled.schedule(len, 128).pass_count();
        assert!(unrolled < plain, "{unrolled} >= {plain}");

        let passes = collect(Strategy::DecompositionUnrolled, len, 128);
        assert_eq!(passes[0].active_out, len / (128 * 2 * UNROLL_FACTOR));
    }

    #[test]
    fn test_decomposition_rounds_base_group_down() {
        let passes = collect(Strategy::Decomposition, 10_000, 100);
        assert_eq!(passes[0].local_size, 64);
        assert!(passes.iter().all(|p| p.local_size.is_power_of_two()));
    }

    #[test]
    fn test_pass_count_bounded() {
        for len in [2usize, 3, 17, 1000, 4097, 1 << 16, 1_000_003] {
            for strategy in Strategy::ALL {
                let count = strategy.schedule(len, 64).pass_count();
                assert!(count >= 1);
                assert!(
                    count <= max_passes(len),
                    "{strategy} len={len}: {count} > {}",
                    max_passes(len)
                );
            }
        }
    }

    #[test]
    fn test_prev_power_of_two() {
        assert_eq!(prev_power_of_two(1), 1);
        assert_eq!(prev_power_of_two(3), 2);
        assert_eq!(prev_power_of_two(256), 256);
        assert_eq!(prev_power_of_two(1000), 512);
    }

    #[test]
    fn test_max_passes() {
        assert_eq!(max_passes(1), 0);
        assert_eq!(max_passes(2), 1);
        assert_eq!(max_passes(5), 3);
        assert_eq!(max_passes(16), 4);
        assert_eq!(max_passes(17), 5);
    }
}
