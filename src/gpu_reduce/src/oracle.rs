//! Sequential host reference for validating device results.

use serde::{Deserialize, Serialize};

use crate::timing::{Throughput, Timer};

/// Ground-truth sum with the time it took to compute.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OracleResult {
    /// Wrapping sum of the input.
    pub sum: u32,
    /// Number of timed trials.
    pub trials: u32,
    /// Average latency and throughput over the trials.
    pub timing: Throughput,
}

/// Serial summation, repeated to get a stable timing.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceOracle {
    trials: u32,
}

impl ReferenceOracle {
    pub fn new(trials: u32) -> Self {
        Self {
            trials: trials.max(1),
        }
    }

    /// Serial wrapping sum. Overflow wraps the same way device `u32` adds do.
    pub fn sum(input: &[u32]) -> u32 {
        input.iter().fold(0u32, |acc, &x| acc.wrapping_add(x))
    }

    /// Sum `input` once per trial and report the average time.
    pub fn compute(&self, input: &[u32]) -> OracleResult {
        let mut sum = 0;
        let mut timer = Timer::start();
        for _ in 0..self.trials {
            sum = std::hint::black_box(Self::sum(std::hint::black_box(input)));
        }
        timer.stop();

        OracleResult {
            sum,
            trials: self.trials,
            timing: Throughput::from_total(input.len(), self.trials, timer.elapsed_ms()),
        }
    }
}

impl Default for ReferenceOracle {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sum_wraps() {
        assert_eq!(ReferenceOracle::sum(&[u32::MAX, 2]), 1);
        assert_eq!(ReferenceOracle::sum(&[]), 0);
        assert_eq!(ReferenceOracle::sum(&[7]), 7);
    }

    #[test]
    fn test_compute_is_idempotent() {
        let input: Vec<u32> = (0..10_000).map(|i| i & 15).collect();
        let snapshot = input.clone();
        let oracle = ReferenceOracle::new(3);

        let first = oracle.compute(&input);
        let second = oracle.compute(&input);
        assert_eq!(first.sum, second.sum);
        assert_eq!(first.trials, 3);
        assert_eq!(input, snapshot);
        assert!(first.timing.avg_ms > 0.0);
    }

    #[test]
    fn test_zero_trials_runs_once() {
        let result = ReferenceOracle::new(0).compute(&[1, 2, 3]);
        assert_eq!(result.sum, 6);
        assert_eq!(result.trials, 1);
    }
}
