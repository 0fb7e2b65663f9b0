//! CUDA reduction device.
//!
//! The kernels in `kernels/reduction.cu` are compiled with NVRTC when the
//! device is created and launched on the context's default stream. CUDA
//! streams execute in issue order, so no event or wait is inserted between
//! passes.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use cudarc::driver::sys::CUdevice_attribute;
use cudarc::driver::{
    CudaContext, CudaFunction, CudaSlice, CudaStream, LaunchConfig, PushKernelArg,
};
use cudarc::nvrtc::compile_ptx;
use tracing::debug;

use super::{PassIo, ReductionDevice};
use crate::error::{ReductionError, Result};
use crate::schedule::PassDescriptor;
use crate::strategy::Strategy;

/// Built-in kernel program.
const REDUCTION_SOURCE: &str = include_str!("../../kernels/reduction.cu");

/// A CUDA device with the reduction program loaded.
pub struct CudaDevice {
    ctx: Arc<CudaContext>,
    stream: Arc<CudaStream>,
    kernels: HashMap<Strategy, CudaFunction>,
    max_group_size: usize,
}

impl CudaDevice {
    /// Open device `ordinal` and build the reduction program.
    ///
    /// `kernel_source` replaces the built-in program; it must export the
    /// four entry points with the same signatures.
    pub fn new(ordinal: usize, kernel_source: Option<&Path>) -> Result<Self> {
        let ctx = CudaContext::new(ordinal)?;
        let stream = ctx.default_stream();
        let max_group_size =
            ctx.attribute(CUdevice_attribute::CU_DEVICE_ATTRIBUTE_MAX_THREADS_PER_BLOCK)? as usize;

        let source = match kernel_source {
            Some(path) => std::fs::read_to_string(path).map_err(|source| {
                ReductionError::KernelSource {
                    path: path.to_path_buf(),
                    source,
                }
            })?,
            None => REDUCTION_SOURCE.to_string(),
        };

        let ptx = compile_ptx(source).map_err(|e| ReductionError::ProgramBuild(format!("{e:?}")))?;
        let module = ctx
            .load_module(ptx)
            .map_err(|e| ReductionError::ProgramBuild(e.to_string()))?;

        let mut kernels = HashMap::new();
        for strategy in Strategy::ALL {
            let kernel = strategy.kernel_name();
            let function =
                module
                    .load_function(kernel)
                    .map_err(|e| ReductionError::KernelCreation {
                        kernel,
                        reason: e.to_string(),
                    })?;
            kernels.insert(strategy, function);
        }

        debug!(ordinal, max_group_size, "reduction program built");
        Ok(Self {
            ctx,
            stream,
            kernels,
            max_group_size,
        })
    }

    fn kernel(&self, strategy: Strategy) -> Result<&CudaFunction> {
        self.kernels
            .get(&strategy)
            .ok_or_else(|| ReductionError::KernelCreation {
                kernel: strategy.kernel_name(),
                reason: "kernel not loaded".into(),
            })
    }

    fn launch_config(&self, kernel: &'static str, pass: &PassDescriptor) -> Result<LaunchConfig> {
        if pass.local_size == 0 || pass.local_size > self.max_group_size {
            return Err(ReductionError::Launch {
                kernel,
                reason: format!(
                    "work group of {} threads outside 1..={}",
                    pass.local_size, self.max_group_size
                ),
            });
        }
        Ok(LaunchConfig {
            grid_dim: (pass.groups() as u32, 1, 1),
            block_dim: (pass.local_size as u32, 1, 1),
            shared_mem_bytes: pass.scratch_bytes as u32,
        })
    }
}

impl ReductionDevice for CudaDevice {
    type Buffer = CudaSlice<u32>;

    fn name(&self) -> String {
        self.ctx
            .name()
            .unwrap_or_else(|_| format!("CUDA device {}", self.ctx.ordinal()))
    }

    fn max_group_size(&self) -> usize {
        self.max_group_size
    }

    fn alloc(&self, len: usize, what: &'static str) -> Result<CudaSlice<u32>> {
        self.stream
            .alloc_zeros::<u32>(len)
            .map_err(|e| ReductionError::Allocation {
                what,
                reason: e.to_string(),
            })
    }

    fn upload(&self, dst: &mut CudaSlice<u32>, host: &[u32]) -> Result<()> {
        if host.len() > dst.len() {
            return Err(ReductionError::Transfer {
                op: "upload",
                reason: format!("{} elements into a buffer of {}", host.len(), dst.len()),
            });
        }
        let mut front = dst.slice_mut(0..host.len());
        self.stream
            .memcpy_htod(host, &mut front)
            .map_err(|e| ReductionError::Transfer {
                op: "upload",
                reason: e.to_string(),
            })
    }

    fn dispatch(
        &self,
        strategy: Strategy,
        pass: &PassDescriptor,
        io: PassIo<'_, CudaSlice<u32>>,
    ) -> Result<()> {
        let kernel = strategy.kernel_name();
        let function = self.kernel(strategy)?;
        let cfg = self.launch_config(kernel, pass)?;

        let param = pass.param;
        let active = pass.active_in as u32;
        let threads = pass.global_threads as u32;

        let mut builder = self.stream.launch_builder(function);
        match (strategy, io) {
            (Strategy::InterleavedAddressing, PassIo::InPlace(data)) => {
                builder.arg(data).arg(&param).arg(&active);
            }
            (Strategy::SequentialAddressing, PassIo::InPlace(data)) => {
                builder.arg(data).arg(&param).arg(&threads);
            }
            (
                Strategy::Decomposition | Strategy::DecompositionUnrolled,
                PassIo::Split { src, dst },
            ) => {
                builder.arg(src).arg(dst).arg(&param);
            }
            _ => {
                return Err(ReductionError::Launch {
                    kernel,
                    reason: "buffer arguments do not match the kernel signature".into(),
                })
            }
        }

        // SAFETY: argument order and types match the kernel signatures in
        // reduction.cu, and the schedule keeps every index inside the bound
        // buffers.
        unsafe { builder.launch(cfg) }.map_err(|e| ReductionError::Launch {
            kernel,
            reason: e.to_string(),
        })?;
        Ok(())
    }

    fn read_scalar(&self, src: &CudaSlice<u32>, index: usize) -> Result<u32> {
        if index >= src.len() {
            return Err(ReductionError::Transfer {
                op: "read-back",
                reason: format!("index {index} out of bounds for {} elements", src.len()),
            });
        }
        let values = self
            .stream
            .memcpy_dtov(&src.slice(index..index + 1))
            .map_err(|e| ReductionError::Transfer {
                op: "read-back",
                reason: e.to_string(),
            })?;
        values.first().copied().ok_or_else(|| ReductionError::Transfer {
            op: "read-back",
            reason: "empty transfer".into(),
        })
    }

    fn synchronize(&self) -> Result<()> {
        self.stream.synchronize().map_err(|e| ReductionError::Transfer {
            op: "synchronize",
            reason: e.to_string(),
        })
    }
}

/// Check if a CUDA device can be opened.
pub fn is_cuda_available() -> bool {
    // The driver library is loaded lazily and panics when missing.
    std::panic::catch_unwind(|| CudaContext::new(0).is_ok()).unwrap_or(false)
}
