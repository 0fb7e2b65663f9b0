//! Performance probe.
//!
//! Times a strategy's full pass sequence repeated back to back. The input is
//! uploaded once, before the timed region, and the region is bracketed by two
//! full pipeline drains; repetitions after the first reduce whatever the
//! previous one left behind, so the numbers cover dispatch and compute only,
//! not transfers.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::device::ReductionDevice;
use crate::engine::ReductionEngine;
use crate::error::{ReductionError, Result};
use crate::strategy::Strategy;
use crate::timing::{Throughput, Timer};

/// Timing of one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerfReport {
    pub strategy: Strategy,
    /// Elements reduced per repetition.
    pub elements: usize,
    /// Timed repetitions.
    pub iterations: u32,
    /// Passes issued per repetition.
    pub passes_per_run: usize,
    /// Average latency and throughput per repetition.
    pub timing: Throughput,
}

/// Repeats pass sequences inside a drained timing window.
#[derive(Debug, Clone, Copy)]
pub struct PerformanceProbe {
    iterations: u32,
}

impl PerformanceProbe {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Time `strategy` over `input`.
    pub fn measure<D: ReductionDevice>(
        &self,
        engine: &mut ReductionEngine<D>,
        strategy: Strategy,
        input: &[u32],
    ) -> Result<PerfReport> {
        if self.iterations == 0 {
            return Err(ReductionError::InvalidConfig(
                "performance probe needs at least one iteration".into(),
            ));
        }

        engine.upload(input)?;
        engine.device().synchronize()?;

        let mut timer = Timer::start();
        let mut passes_per_run = 0;
        for _ in 0..self.iterations {
            passes_per_run = engine.run_passes(strategy, input.len())?;
        }
        engine.device().synchronize()?;
        timer.stop();

        let timing = Throughput::from_total(input.len(), self.iterations, timer.elapsed_ms());
        info!(
            %strategy,
            avg_ms = timing.avg_ms,
            gelem_per_s = timing.gelem_per_s,
            "performance"
        );

        Ok(PerfReport {
            strategy,
            elements: input.len(),
            iterations: self.iterations,
            passes_per_run,
            timing,
        })
    }
}

impl Default for PerformanceProbe {
    fn default() -> Self {
        Self::new(100)
    }
}
