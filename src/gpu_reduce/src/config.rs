//! Reduction task configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ReductionError, Result};
use crate::strategy::Strategy;

/// How the input array is filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPattern {
    /// Pseudo-random values in `[0, 16)`.
    #[default]
    Random,
    /// Every element is 1, so the expected sum is the length.
    Ones,
}

/// Configuration for a [`ReductionTask`](crate::task::ReductionTask).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Number of input elements.
    pub array_size: usize,

    /// Work-group size while the active range is large.
    ///
    /// Must be a power of two no larger than the device limit. Passes clamp
    /// it down once fewer threads remain.
    pub local_size: usize,

    /// Strategies to run, in order.
    pub strategies: Vec<Strategy>,

    /// Input generation pattern.
    pub pattern: InputPattern,

    /// Seed for [`InputPattern::Random`]. `None` draws from entropy.
    pub seed: Option<u64>,

    /// Repetitions of the serial oracle.
    pub oracle_trials: u32,

    /// Whether to run the performance probe after each correctness run.
    pub measure_performance: bool,

    /// Repetitions inside the probe's timed region.
    pub perf_iterations: u32,

    /// Kernel source overriding the built-in program (CUDA backend).
    pub kernel_source: Option<PathBuf>,

    /// CUDA device ordinal (CUDA backend).
    pub device_ordinal: usize,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            array_size: 1 << 20,
            local_size: 256,
            strategies: Strategy::ALL.to_vec(),
            pattern: InputPattern::Random,
            seed: None,
            oracle_trials: 10,
            measure_performance: true,
            perf_iterations: 100,
            kernel_source: None,
            device_ordinal: 0,
        }
    }
}

impl ReductionConfig {
    /// Create a builder starting from the defaults.
    pub fn builder() -> ReductionConfigBuilder {
        ReductionConfigBuilder::new()
    }

    /// Check the device-independent constraints.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(ReductionError::InvalidConfig(msg));

        if self.array_size == 0 {
            return invalid("array size must be at least 1".into());
        }
        // Pass arguments are 32-bit on the device.
        if self.array_size > u32::MAX as usize {
            return invalid(format!(
                "array size {} does not fit 32-bit kernel arguments",
                self.array_size
            ));
        }
        if !self.local_size.is_power_of_two() {
            return invalid(format!(
                "work-group size {} is not a power of two",
                self.local_size
            ));
        }
        if self.strategies.is_empty() {
            return invalid("no strategies selected".into());
        }
        let mut seen = self.strategies.clone();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != self.strategies.len() {
            return invalid("a strategy is selected more than once".into());
        }
        if self.oracle_trials == 0 {
            return invalid("oracle needs at least one trial".into());
        }
        if self.measure_performance && self.perf_iterations == 0 {
            return invalid("performance probe needs at least one iteration".into());
        }
        Ok(())
    }

    /// Check the constraints that depend on the device's limits.
    pub fn validate_for_device(&self, max_group_size: usize) -> Result<()> {
        self.validate()?;
        if self.local_size > max_group_size {
            return Err(ReductionError::InvalidConfig(format!(
                "work-group size {} exceeds device limit {max_group_size}",
                self.local_size
            )));
        }
        Ok(())
    }
}

/// Builder for [`ReductionConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReductionConfigBuilder {
    config: ReductionConfig,
}

impl ReductionConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array_size(mut self, array_size: usize) -> Self {
        self.config.array_size = array_size;
        self
    }

    pub fn local_size(mut self, local_size: usize) -> Self {
        self.config.local_size = local_size;
        self
    }

    pub fn strategies(mut self, strategies: impl IntoIterator<Item = Strategy>) -> Self {
        self.config.strategies = strategies.into_iter().collect();
        self
    }

    pub fn pattern(mut self, pattern: InputPattern) -> Self {
        self.config.pattern = pattern;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn oracle_trials(mut self, trials: u32) -> Self {
        self.config.oracle_trials = trials;
        self
    }

    /// Enable or disable the performance probe.
    pub fn measure_performance(mut self, enabled: bool) -> Self {
        self.config.measure_performance = enabled;
        self
    }

    pub fn perf_iterations(mut self, iterations: u32) -> Self {
        self.config.perf_iterations = iterations;
        self
    }

    pub fn kernel_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.kernel_source = Some(path.into());
        self
    }

    pub fn device_ordinal(mut self, ordinal: usize) -> Self {
        self.config.device_ordinal = ordinal;
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<ReductionConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ReductionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.array_size, 1_048_576);
        assert_eq!(config.local_size, 256);
        assert_eq!(config.perf_iterations, 100);
        assert_eq!(config.oracle_trials, 10);
        assert_eq!(config.strategies, Strategy::ALL.to_vec());
    }

    #[test]
    fn test_builder() {
        let config = ReductionConfig::builder()
            .array_size(16)
            .local_size(4)
            .pattern(InputPattern::Ones)
            .seed(7)
            .strategies([Strategy::Decomposition])
            .measure_performance(false)
            .build()
            .unwrap();
        assert_eq!(config.array_size, 16);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.strategies, vec![Strategy::Decomposition]);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(ReductionConfig::builder().array_size(0).build().is_err());
        assert!(ReductionConfig::builder().local_size(96).build().is_err());
        assert!(ReductionConfig::builder().local_size(0).build().is_err());
        assert!(ReductionConfig::builder().strategies(Vec::new()).build().is_err());
        assert!(ReductionConfig::builder()
            .strategies([Strategy::Decomposition, Strategy::Decomposition])
            .build()
            .is_err());
        assert!(ReductionConfig::builder().perf_iterations(0).build().is_err());
        assert!(ReductionConfig::builder()
            .perf_iterations(0)
            .measure_performance(false)
            .build()
            .is_ok());
    }

    #[test]
    fn test_device_limit() {
        let config = ReductionConfig::builder().local_size(512).build().unwrap();
        assert!(config.validate_for_device(1024).is_ok());
        assert!(config.validate_for_device(256).is_err());
    }

    #[test]
    fn test_json_fills_defaults() {
        let config: ReductionConfig =
            serde_json::from_str(r#"{"array_size": 4096, "strategies": ["sequential_addressing"]}"#)
                .unwrap();
        assert_eq!(config.array_size, 4096);
        assert_eq!(config.local_size, 256);
        assert_eq!(config.strategies, vec![Strategy::SequentialAddressing]);
    }
}
