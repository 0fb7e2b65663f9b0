//! The reduction task: one input array, every strategy, one verdict.
//!
//! Lifecycle:
//! 1. [`ReductionTask::new`] validates the configuration, generates the
//!    input and allocates the ping/pong pair. Failures abort initialization.
//! 2. [`ReductionTask::compute_cpu`] runs the serial oracle.
//! 3. [`ReductionTask::compute_gpu`] runs each strategy to completion
//!    (upload, passes, read-back), then optionally its performance probe.
//!    Strategies never interleave.
//! 4. [`ReductionTask::validate`] compares every result to the oracle.
//!    A mismatch is recorded, not raised.
//!
//! Host and device resources are released when the task is dropped.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReductionConfig;
use crate::device::ReductionDevice;
use crate::engine::{Execution, ReductionEngine};
use crate::error::{ReductionError, Result};
use crate::oracle::{OracleResult, ReferenceOracle};
use crate::probe::{PerfReport, PerformanceProbe};
use crate::strategy::Strategy;
use crate::test_utils::generate_input;

/// Verdict for one strategy.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyOutcome {
    pub strategy: Strategy,
    pub kernel: &'static str,
    /// Value read back from the device.
    pub value: u32,
    /// Oracle sum.
    pub expected: u32,
    pub passed: bool,
    pub passes: usize,
    pub perf: Option<PerfReport>,
}

/// Result of [`ReductionTask::run`].
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub device: String,
    pub array_size: usize,
    pub local_size: usize,
    pub oracle: OracleResult,
    pub outcomes: Vec<StrategyOutcome>,
}

impl TaskSummary {
    /// Whether every strategy matched the oracle.
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }

    /// Strategies whose result differs from the oracle.
    pub fn failures(&self) -> Vec<Strategy> {
        self.outcomes
            .iter()
            .filter(|o| !o.passed)
            .map(|o| o.strategy)
            .collect()
    }

    pub fn outcome(&self, strategy: Strategy) -> Option<&StrategyOutcome> {
        self.outcomes.iter().find(|o| o.strategy == strategy)
    }
}

/// Owns the input array and the engine for one harness run.
pub struct ReductionTask<D: ReductionDevice> {
    config: ReductionConfig,
    input: Vec<u32>,
    engine: ReductionEngine<D>,
    oracle: Option<OracleResult>,
    executions: Vec<Execution>,
    perf: Vec<PerfReport>,
}

impl<D: ReductionDevice> ReductionTask<D> {
    /// Generate the input from `config` and allocate device resources.
    pub fn new(device: D, config: ReductionConfig) -> Result<Self> {
        config.validate_for_device(device.max_group_size())?;
        let input = generate_input(config.pattern, config.array_size, config.seed);
        Self::build(device, config, input)
    }

    /// Use a caller-provided input instead of generating one.
    ///
    /// `config.array_size` is replaced by the input length.
    pub fn with_input(device: D, mut config: ReductionConfig, input: Vec<u32>) -> Result<Self> {
        config.array_size = input.len();
        config.validate_for_device(device.max_group_size())?;
        Self::build(device, config, input)
    }

    fn build(device: D, config: ReductionConfig, input: Vec<u32>) -> Result<Self> {
        let engine = ReductionEngine::new(device, input.len(), config.local_size)?;
        info!(
            device = %engine.device().name(),
            elements = input.len(),
            local_size = config.local_size,
            "reduction task initialized"
        );

        Ok(Self {
            config,
            input,
            engine,
            oracle: None,
            executions: Vec::new(),
            perf: Vec::new(),
        })
    }

    pub fn config(&self) -> &ReductionConfig {
        &self.config
    }

    pub fn input(&self) -> &[u32] {
        &self.input
    }

    pub fn engine(&self) -> &ReductionEngine<D> {
        &self.engine
    }

    /// Run the serial oracle.
    pub fn compute_cpu(&mut self) -> OracleResult {
        let result = ReferenceOracle::new(self.config.oracle_trials).compute(&self.input);
        info!(
            sum = result.sum,
            avg_ms = result.timing.avg_ms,
            gelem_per_s = result.timing.gelem_per_s,
            "host reference"
        );
        self.oracle = Some(result);
        result
    }

    /// Run every configured strategy, then its probe when enabled.
    ///
    /// A dispatch or transfer failure aborts the task.
    pub fn compute_gpu(&mut self) -> Result<()> {
        self.executions.clear();
        self.perf.clear();

        let probe = PerformanceProbe::new(self.config.perf_iterations);
        for strategy in self.config.strategies.clone() {
            let execution = self.engine.execute(strategy, &self.input)?;
            info!(%strategy, value = execution.value, passes = execution.passes, "device result");
            self.executions.push(execution);

            if self.config.measure_performance {
                let report = probe.measure(&mut self.engine, strategy, &self.input)?;
                self.perf.push(report);
            }
        }
        Ok(())
    }

    /// Compare every device result to the oracle.
    pub fn validate(&self) -> Vec<StrategyOutcome> {
        let expected = self
            .oracle
            .map(|o| o.sum)
            .unwrap_or_else(|| ReferenceOracle::sum(&self.input));

        self.executions
            .iter()
            .map(|exec| {
                let passed = exec.value == expected;
                if !passed {
                    warn!(
                        strategy = %exec.strategy,
                        kernel = exec.strategy.kernel_name(),
                        result = exec.value,
                        expected,
                        "validation failed"
                    );
                }
                StrategyOutcome {
                    strategy: exec.strategy,
                    kernel: exec.strategy.kernel_name(),
                    value: exec.value,
                    expected,
                    passed,
                    passes: exec.passes,
                    perf: self
                        .perf
                        .iter()
                        .find(|p| p.strategy == exec.strategy)
                        .copied(),
                }
            })
            .collect()
    }

    /// Oracle, every strategy, validation.
    pub fn run(&mut self) -> Result<TaskSummary> {
        let oracle = self.compute_cpu();
        self.compute_gpu()?;
        let outcomes = self.validate();

        let summary = TaskSummary {
            device: self.engine.device().name(),
            array_size: self.input.len(),
            local_size: self.config.local_size,
            oracle,
            outcomes,
        };
        if summary.all_passed() {
            info!("all {} strategies match the host reference", summary.outcomes.len());
        }
        Ok(summary)
    }

    /// Reduce the task's input with a single strategy.
    pub fn execute(&mut self, strategy: Strategy) -> Result<Execution> {
        if self.input.is_empty() {
            return Err(ReductionError::InvalidConfig("empty input".into()));
        }
        self.engine.execute(strategy, &self.input)
    }
}
