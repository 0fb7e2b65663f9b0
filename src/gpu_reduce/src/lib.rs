//! Multi-pass parallel sum reduction on an accelerator.
//!
//! The crate reduces an array of `u32` to its wrapping sum with four
//! strategies and validates each against a serial host reference:
//!
//! - [`Strategy::InterleavedAddressing`]: in-place, doubling stride
//! - [`Strategy::SequentialAddressing`]: in-place, halving stride
//! - [`Strategy::Decomposition`]: per-group scratch-memory tree,
//!   ping/pong buffers
//! - [`Strategy::DecompositionUnrolled`]: as above with a multi-element
//!   load per thread and a warp-synchronous tail
//!
//! Work is issued through a [`ReductionDevice`]. [`HostDevice`] emulates the
//! kernels on the CPU; `CudaDevice` (feature `cuda`) runs them through
//! cudarc and NVRTC.
//!
//! # Example
//!
//! ```ignore
//! use gpu_reduce::{HostDevice, ReductionConfig, ReductionTask};
//!
//! let config = ReductionConfig::builder()
//!     .array_size(1 << 16)
//!     .local_size(128)
//!     .seed(42)
//!     .build()?;
//! let mut task = ReductionTask::new(HostDevice::new(), config)?;
//! let summary = task.run()?;
//! assert!(summary.all_passed());
//! ```

pub mod buffers;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod oracle;
pub mod probe;
pub mod schedule;
pub mod strategy;
pub mod task;
pub mod test_utils;
pub mod timing;

pub use buffers::{Designation, PingPongBuffers};
pub use config::{InputPattern, ReductionConfig, ReductionConfigBuilder};
pub use device::{HostDevice, PassIo, ReductionDevice};
pub use engine::{Execution, ReductionEngine};
pub use error::{ReductionError, Result};
pub use oracle::{OracleResult, ReferenceOracle};
pub use probe::{PerfReport, PerformanceProbe};
pub use schedule::{PassDescriptor, PassSchedule};
pub use strategy::Strategy;
pub use task::{ReductionTask, StrategyOutcome, TaskSummary};
pub use timing::{Throughput, Timer};

#[cfg(feature = "cuda")]
pub use device::{is_cuda_available, CudaDevice};
