//! Reduction harness.
//!
//! Reduces one input array with every selected strategy, checks each result
//! against the serial host sum and reports per-strategy throughput.
//!
//! ```bash
//! # Host emulation, 1M random elements
//! reduction_harness --size 1048576 --local-size 256 --seed 42
//!
//! # CUDA backend, two strategies, JSON report
//! reduction_harness --backend cuda --strategy sequential \
//!     --strategy decomposition-unrolled --json report.json
//! ```
//!
//! The process exits non-zero when any strategy disagrees with the host sum.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gpu_reduce::{
    HostDevice, InputPattern, ReductionConfig, ReductionDevice, ReductionTask, Strategy,
    TaskSummary,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// CPU emulation of the kernels
    Host,
    /// NVRTC-compiled kernels (requires the `cuda` feature)
    Cuda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Pattern {
    Random,
    Ones,
}

impl From<Pattern> for InputPattern {
    fn from(p: Pattern) -> Self {
        match p {
            Pattern::Random => InputPattern::Random,
            Pattern::Ones => InputPattern::Ones,
        }
    }
}

/// Multi-pass GPU sum reduction harness
#[derive(Parser, Debug)]
#[command(name = "reduction_harness")]
#[command(version)]
struct Args {
    /// Number of input elements
    #[arg(short = 'n', long, default_value_t = 1 << 20)]
    size: usize,

    /// Work-group size (power of two)
    #[arg(short, long, default_value_t = 256)]
    local_size: usize,

    /// Timed repetitions per strategy
    #[arg(short, long, default_value_t = 100)]
    iterations: u32,

    /// Repetitions of the host reference sum
    #[arg(long, default_value_t = 10)]
    oracle_trials: u32,

    /// Seed for random input; entropy when omitted
    #[arg(long)]
    seed: Option<u64>,

    /// Input pattern
    #[arg(long, value_enum, default_value_t = Pattern::Random)]
    pattern: Pattern,

    /// Strategy to run; repeat to select several. Defaults to all four.
    #[arg(short, long = "strategy")]
    strategies: Vec<Strategy>,

    /// Execution backend
    #[arg(short, long, value_enum, default_value_t = Backend::Host)]
    backend: Backend,

    /// CUDA device ordinal
    #[arg(short, long, default_value_t = 0)]
    device: usize,

    /// Skip the performance probe
    #[arg(long)]
    no_perf: bool,

    /// Kernel source replacing the built-in program (CUDA backend)
    #[arg(long)]
    kernel_source: Option<PathBuf>,

    /// Write the summary as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,
}

impl Args {
    fn config(&self) -> Result<ReductionConfig> {
        let mut builder = ReductionConfig::builder()
            .array_size(self.size)
            .local_size(self.local_size)
            .perf_iterations(self.iterations)
            .oracle_trials(self.oracle_trials)
            .pattern(self.pattern.into())
            .measure_performance(!self.no_perf)
            .device_ordinal(self.device);
        if !self.strategies.is_empty() {
            builder = builder.strategies(self.strategies.iter().copied());
        }
        if let Some(seed) = self.seed {
            builder = builder.seed(seed);
        }
        if let Some(path) = &self.kernel_source {
            builder = builder.kernel_source(path);
        }
        builder.build().context("invalid configuration")
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = args.config()?;

    let summary = match args.backend {
        Backend::Host => run(HostDevice::new(), config)?,
        Backend::Cuda => run_cuda(config)?,
    };

    print_summary(&summary);

    if let Some(path) = &args.json {
        let json = serde_json::to_string_pretty(&summary)?;
        fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    if validation_passed(&summary) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Whether every strategy matched the host sum; logs the ones that did not.
fn validation_passed(summary: &TaskSummary) -> bool {
    let failures = summary.failures();
    if !failures.is_empty() {
        tracing::error!("Validation failed for: {:?}", failures);
    }
    failures.is_empty()
}

fn run<D: ReductionDevice>(device: D, config: ReductionConfig) -> Result<TaskSummary> {
    let mut task =
        ReductionTask::new(device, config).context("failed to initialize reduction task")?;
    task.run().context("reduction task failed")
}

#[cfg(feature = "cuda")]
fn run_cuda(config: ReductionConfig) -> Result<TaskSummary> {
    let device = gpu_reduce::CudaDevice::new(config.device_ordinal, config.kernel_source.as_deref())
        .with_context(|| format!("failed to open CUDA device {}", config.device_ordinal))?;
    run(device, config)
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_config: ReductionConfig) -> Result<TaskSummary> {
    anyhow::bail!("CUDA backend requested but reduction_harness was built without the `cuda` feature")
}

fn print_summary(summary: &TaskSummary) {
    println!("Device:        {}", summary.device);
    println!(
        "Elements:      {} (work group {})",
        summary.array_size, summary.local_size
    );
    println!(
        "Host sum:      {} ({:.4} ms, {:.3} GElem/s)",
        summary.oracle.sum, summary.oracle.timing.avg_ms, summary.oracle.timing.gelem_per_s
    );
    println!();
    println!(
        "{:<24} {:>12} {:>7} {:>12} {:>10}  status",
        "strategy", "result", "passes", "avg ms", "GElem/s"
    );
    for outcome in &summary.outcomes {
        let (avg_ms, gelem) = match &outcome.perf {
            Some(perf) => (
                format!("{:.4}", perf.timing.avg_ms),
                format!("{:.3}", perf.timing.gelem_per_s),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<24} {:>12} {:>7} {:>12} {:>10}  {}",
            outcome.strategy.label(),
            outcome.value,
            outcome.passes,
            avg_ms,
            gelem,
            if outcome.passed { "ok" } else { "MISMATCH" }
        );
    }
}
