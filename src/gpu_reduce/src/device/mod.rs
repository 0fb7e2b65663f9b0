//! Command-stream abstraction over the accelerator.
//!
//! The engine never talks to a driver directly. It allocates buffers, issues
//! uploads and kernel dispatches, reads back scalars and drains the pipeline
//! through [`ReductionDevice`].
//!
//! # Ordering contract
//!
//! A device is a single in-order command stream. Every operation issued
//! through it happens-after every operation issued earlier through the same
//! device: a pass observes the upload and all previous passes on the same
//! buffers without any explicit wait. Only [`ReductionDevice::read_scalar`]
//! and [`ReductionDevice::synchronize`] block the caller.
//!
//! Implementations:
//! - [`HostDevice`]: emulates the kernels on the CPU, always available.
//! - `CudaDevice` (feature `cuda`): NVRTC-compiled kernels on a CUDA stream.

mod host;

#[cfg(feature = "cuda")]
mod cuda;

pub use host::{HostBuffer, HostDevice, HostDeviceLimits, HostOp};

#[cfg(feature = "cuda")]
pub use cuda::{is_cuda_available, CudaDevice};

use crate::error::Result;
use crate::schedule::PassDescriptor;
use crate::strategy::Strategy;

/// Buffers bound to one pass.
pub enum PassIo<'a, B> {
    /// The pass reads and writes the same buffer.
    InPlace(&'a mut B),
    /// The pass reads `src` and writes one value per work group to `dst`.
    Split { src: &'a B, dst: &'a mut B },
}

/// An ordered device command stream with the four reduction kernels loaded.
pub trait ReductionDevice {
    /// Device-resident `u32` array.
    type Buffer;

    /// Human-readable device name.
    fn name(&self) -> String;

    /// Largest work group the device accepts.
    fn max_group_size(&self) -> usize;

    /// Allocate a zero-initialized buffer of `len` elements.
    fn alloc(&self, len: usize, what: &'static str) -> Result<Self::Buffer>;

    /// Enqueue a host-to-device copy of `host` into the front of `dst`.
    ///
    /// Does not wait for the copy to complete.
    fn upload(&self, dst: &mut Self::Buffer, host: &[u32]) -> Result<()>;

    /// Bind the per-pass arguments of `strategy`'s kernel and enqueue it.
    fn dispatch(
        &self,
        strategy: Strategy,
        pass: &PassDescriptor,
        io: PassIo<'_, Self::Buffer>,
    ) -> Result<()>;

    /// Read one element, blocking until every earlier operation finished.
    fn read_scalar(&self, src: &Self::Buffer, index: usize) -> Result<u32>;

    /// Block until every issued operation has completed.
    fn synchronize(&self) -> Result<()>;
}
