//! Pass scheduler and result extractor.
//!
//! [`ReductionEngine`] owns a device and its ping/pong buffer pair. For a
//! strategy it walks the [`PassSchedule`](crate::schedule::PassSchedule),
//! binds each pass's buffers and arguments, and issues one dispatch per pass.
//! Nothing between upload and read-back blocks: ordering comes from the
//! device's command stream.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::buffers::PingPongBuffers;
use crate::device::ReductionDevice;
use crate::error::{ReductionError, Result};
use crate::strategy::Strategy;

/// Outcome of one correctness run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub strategy: Strategy,
    /// Scalar read back from index 0 of the current buffer.
    pub value: u32,
    /// Number of dispatched passes.
    pub passes: usize,
}

/// Drives reductions of up to `capacity` elements on one device.
pub struct ReductionEngine<D: ReductionDevice> {
    device: D,
    buffers: PingPongBuffers<D::Buffer>,
    base_group_size: usize,
}

impl<D: ReductionDevice> ReductionEngine<D> {
    /// Allocate the buffer pair on `device`.
    ///
    /// `base_group_size` is the work-group size used while the active range
    /// is large enough; each pass clamps it to its own thread count.
    pub fn new(device: D, capacity: usize, base_group_size: usize) -> Result<Self> {
        if base_group_size == 0 || base_group_size > device.max_group_size() {
            return Err(ReductionError::InvalidConfig(format!(
                "work-group size {base_group_size} outside 1..={}",
                device.max_group_size()
            )));
        }
        // Lengths and strides are 32-bit kernel arguments.
        if capacity > u32::MAX as usize {
            return Err(ReductionError::InvalidConfig(format!(
                "capacity of {capacity} elements does not fit 32-bit kernel arguments"
            )));
        }

        let buffers = PingPongBuffers::new(&device, capacity)?;
        debug!(
            device = %device.name(),
            capacity,
            base_group_size,
            "allocated ping/pong buffers"
        );

        Ok(Self {
            device,
            buffers,
            base_group_size,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn buffers(&self) -> &PingPongBuffers<D::Buffer> {
        &self.buffers
    }

    pub fn base_group_size(&self) -> usize {
        self.base_group_size
    }

    /// Elements per buffer.
    pub fn capacity(&self) -> usize {
        self.buffers.capacity()
    }

    /// Enqueue an upload of `input` into the ping buffer.
    pub fn upload(&mut self, input: &[u32]) -> Result<()> {
        if input.len() > self.capacity() {
            return Err(ReductionError::InvalidConfig(format!(
                "input of {} elements exceeds buffer capacity {}",
                input.len(),
                self.capacity()
            )));
        }
        self.buffers.upload(&self.device, input)
    }

    /// Issue every pass reducing the first `len` elements of the current
    /// buffer to one.
    ///
    /// On return the result sits at index 0 of the current buffer once the
    /// stream has drained. Returns the number of passes issued. Any dispatch
    /// error aborts the sequence.
    pub fn run_passes(&mut self, strategy: Strategy, len: usize) -> Result<usize> {
        let mut issued = 0;

        for pass in strategy.schedule(len, self.base_group_size) {
            trace!(
                %strategy,
                pass = pass.index,
                threads = pass.global_threads,
                group = pass.local_size,
                param = pass.param,
                active = pass.active_in,
                "dispatch"
            );

            let io = if strategy.is_out_of_place() {
                self.buffers.split()
            } else {
                self.buffers.in_place()
            };
            self.device
                .dispatch(strategy, &pass, io)
                .map_err(|e| e.in_pass(strategy, pass.index))?;

            if strategy.is_out_of_place() {
                self.buffers.swap();
            }
            issued += 1;
        }

        Ok(issued)
    }

    /// Blocking read of the reduction result.
    pub fn read_result(&self) -> Result<u32> {
        self.buffers.read_scalar(&self.device, 0)
    }

    /// Upload `input`, reduce it with `strategy` and read back the sum.
    pub fn execute(&mut self, strategy: Strategy, input: &[u32]) -> Result<Execution> {
        if input.is_empty() {
            return Err(ReductionError::InvalidConfig(
                "cannot reduce an empty input".into(),
            ));
        }

        self.upload(input)?;
        let passes = self.run_passes(strategy, input.len())?;
        let value = self.read_result()?;

        debug!(%strategy, passes, value, "reduction finished");
        Ok(Execution {
            strategy,
            value,
            passes,
        })
    }
}
