//! Host-emulated reduction device.
//!
//! Runs the four reduction kernels on the CPU with the same per-thread and
//! per-group arithmetic as the device code in `kernels/reduction.cu`. Work
//! items of one pass are independent, so they are spread over the rayon pool;
//! passes themselves execute eagerly in issue order, which trivially honors
//! the in-order stream contract.
//!
//! Launch geometry is checked the way a driver would check it (group size
//! limit, scratch memory limit, buffer bounds), and every operation is
//! appended to an operation log that tests use to inspect what the engine
//! issued.

use parking_lot::Mutex;
use rayon::prelude::*;

use super::{PassIo, ReductionDevice};
use crate::error::{ReductionError, Result};
use crate::schedule::{PassDescriptor, SCRATCH_ELEMENT_BYTES, UNROLL_FACTOR};
use crate::strategy::Strategy;

/// Resource limits of the emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostDeviceLimits {
    /// Largest accepted work group.
    pub max_group_size: usize,
    /// Largest dynamic scratch allocation per work group, in bytes.
    pub max_scratch_bytes: usize,
    /// Largest buffer, in elements.
    pub max_buffer_elements: usize,
}

impl Default for HostDeviceLimits {
    fn default() -> Self {
        Self {
            max_group_size: 1024,
            max_scratch_bytes: 48 * 1024,
            max_buffer_elements: 1 << 30,
        }
    }
}

/// Buffer owned by a [`HostDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBuffer {
    data: Vec<u32>,
}

impl HostBuffer {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contents, for inspection in tests.
    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }
}

/// One operation issued to a [`HostDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Upload { len: usize },
    Dispatch { strategy: Strategy, pass: PassDescriptor },
    ReadScalar { index: usize },
    Synchronize,
}

/// CPU emulation of the reduction kernels.
pub struct HostDevice {
    limits: HostDeviceLimits,
    ops: Mutex<Vec<HostOp>>,
}

impl HostDevice {
    /// Create a device with default limits.
    pub fn new() -> Self {
        Self::with_limits(HostDeviceLimits::default())
    }

    /// Create a device with custom limits.
    pub fn with_limits(limits: HostDeviceLimits) -> Self {
        Self {
            limits,
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Device limits.
    pub fn limits(&self) -> HostDeviceLimits {
        self.limits
    }

    /// Snapshot of every operation issued so far.
    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.lock().clone()
    }

    /// Passes dispatched so far, in issue order.
    pub fn dispatched_passes(&self) -> Vec<(Strategy, PassDescriptor)> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                HostOp::Dispatch { strategy, pass } => Some((*strategy, *pass)),
                _ => None,
            })
            .collect()
    }

    /// Forget the operation log.
    pub fn clear_ops(&self) {
        self.ops.lock().clear();
    }

    fn record(&self, op: HostOp) {
        self.ops.lock().push(op);
    }

    fn check_geometry(&self, kernel: &'static str, pass: &PassDescriptor) -> Result<()> {
        let invalid = |reason: String| Err(ReductionError::Launch { kernel, reason });

        if pass.global_threads == 0 || pass.local_size == 0 {
            return invalid(format!(
                "empty launch ({} threads, group of {})",
                pass.global_threads, pass.local_size
            ));
        }
        if pass.local_size > self.limits.max_group_size {
            return invalid(format!(
                "work group of {} threads exceeds device limit {}",
                pass.local_size, self.limits.max_group_size
            ));
        }
        if pass.local_size > pass.global_threads {
            return invalid(format!(
                "work group of {} threads is larger than the {} launched threads",
                pass.local_size, pass.global_threads
            ));
        }
        if pass.scratch_bytes > self.limits.max_scratch_bytes {
            return invalid(format!(
                "{} bytes of scratch memory exceed device limit {}",
                pass.scratch_bytes, self.limits.max_scratch_bytes
            ));
        }
        Ok(())
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ReductionDevice for HostDevice {
    type Buffer = HostBuffer;

    fn name(&self) -> String {
        format!("host emulation ({} threads)", rayon::current_num_threads())
    }

    fn max_group_size(&self) -> usize {
        self.limits.max_group_size
    }

    fn alloc(&self, len: usize, what: &'static str) -> Result<HostBuffer> {
        if len == 0 || len > self.limits.max_buffer_elements {
            return Err(ReductionError::Allocation {
                what,
                reason: format!(
                    "{len} elements outside 1..={}",
                    self.limits.max_buffer_elements
                ),
            });
        }

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|e| ReductionError::Allocation {
                what,
                reason: e.to_string(),
            })?;
        data.resize(len, 0);
        Ok(HostBuffer { data })
    }

    fn upload(&self, dst: &mut HostBuffer, host: &[u32]) -> Result<()> {
        if host.len() > dst.len() {
            return Err(ReductionError::Transfer {
                op: "upload",
                reason: format!("{} elements into a buffer of {}", host.len(), dst.len()),
            });
        }
        dst.data[..host.len()].copy_from_slice(host);
        self.record(HostOp::Upload { len: host.len() });
        Ok(())
    }

    fn dispatch(
        &self,
        strategy: Strategy,
        pass: &PassDescriptor,
        io: PassIo<'_, HostBuffer>,
    ) -> Result<()> {
        let kernel = strategy.kernel_name();
        self.check_geometry(kernel, pass)?;

        match (strategy, io) {
            (Strategy::InterleavedAddressing, PassIo::InPlace(buf)) => {
                interleaved_pass(kernel, &mut buf.data, pass)?
            }
            (Strategy::SequentialAddressing, PassIo::InPlace(buf)) => {
                sequential_pass(kernel, &mut buf.data, pass)?
            }
            (Strategy::Decomposition, PassIo::Split { src, dst }) => {
                decomposition_pass(kernel, &src.data, &mut dst.data, pass, 2)?
            }
            (Strategy::DecompositionUnrolled, PassIo::Split { src, dst }) => {
                decomposition_pass(kernel, &src.data, &mut dst.data, pass, 2 * UNROLL_FACTOR)?
            }
            _ => {
                return Err(ReductionError::Launch {
                    kernel,
                    reason: "buffer arguments do not match the kernel signature".into(),
                })
            }
        }

        self.record(HostOp::Dispatch {
            strategy,
            pass: *pass,
        });
        Ok(())
    }

    fn read_scalar(&self, src: &HostBuffer, index: usize) -> Result<u32> {
        let value = src
            .data
            .get(index)
            .copied()
            .ok_or_else(|| ReductionError::Transfer {
                op: "read-back",
                reason: format!("index {index} out of bounds for {} elements", src.len()),
            })?;
        self.record(HostOp::ReadScalar { index });
        Ok(value)
    }

    fn synchronize(&self) -> Result<()> {
        self.record(HostOp::Synchronize);
        Ok(())
    }
}

fn out_of_bounds(kernel: &'static str, needed: usize, len: usize) -> ReductionError {
    ReductionError::Launch {
        kernel,
        reason: format!("pass touches {needed} elements of a {len}-element buffer"),
    }
}

/// Thread `t` adds element `2*t*stride + stride` into `2*t*stride`.
fn interleaved_pass(kernel: &'static str, data: &mut [u32], pass: &PassDescriptor) -> Result<()> {
    let stride = pass.param as usize;
    let active = pass.active_in;
    let needed = active.saturating_sub(1) * stride + 1;
    if stride == 0 || needed > data.len() {
        return Err(out_of_bounds(kernel, needed, data.len()));
    }

    data.par_chunks_mut(2 * stride)
        .take(pass.global_threads)
        .enumerate()
        .for_each(|(gid, chunk)| {
            if 2 * gid + 1 < active {
                chunk[0] = chunk[0].wrapping_add(chunk[stride]);
            }
        });
    Ok(())
}

/// Thread `t` adds element `t + stride` into `t`.
fn sequential_pass(kernel: &'static str, data: &mut [u32], pass: &PassDescriptor) -> Result<()> {
    let stride = pass.param as usize;
    let threads = pass.global_threads;
    if stride < threads || stride + threads > data.len() {
        return Err(out_of_bounds(kernel, stride + threads, data.len()));
    }

    let (low, high) = data.split_at_mut(stride);
    low[..threads]
        .par_iter_mut()
        .zip(high[..threads].par_iter())
        .for_each(|(dst, src)| *dst = dst.wrapping_add(*src));
    Ok(())
}

/// Work group `g` reduces `local * per_thread` consecutive elements into
/// `dst[g]`.
///
/// Thread `l` of the group first accumulates the elements at
/// `base + l + k * local` for `k < per_thread`, then the group folds its
/// scratch row with a halving tree. The device's warp-synchronous tail
/// performs the same additions as the tree rounds it replaces.
fn decomposition_pass(
    kernel: &'static str,
    src: &[u32],
    dst: &mut [u32],
    pass: &PassDescriptor,
    per_thread: usize,
) -> Result<()> {
    let local = pass.local_size;
    let len = pass.param as usize;
    let groups = pass.groups();

    if !local.is_power_of_two() {
        return Err(ReductionError::Launch {
            kernel,
            reason: format!("work group of {local} threads is not a power of two"),
        });
    }
    if pass.scratch_bytes < local * SCRATCH_ELEMENT_BYTES {
        return Err(ReductionError::Launch {
            kernel,
            reason: format!(
                "{} bytes of scratch memory for a group of {local}",
                pass.scratch_bytes
            ),
        });
    }
    if len > src.len() {
        return Err(out_of_bounds(kernel, len, src.len()));
    }
    if groups > dst.len() {
        return Err(out_of_bounds(kernel, groups, dst.len()));
    }

    let span = local * per_thread;
    dst[..groups]
        .par_iter_mut()
        .enumerate()
        .for_each(|(group, out)| {
            let base = group * span;
            let mut scratch: Vec<u32> = (0..local)
                .map(|lid| {
                    (0..per_thread)
                        .map(|k| base + lid + k * local)
                        .filter(|&i| i < len)
                        .fold(0u32, |acc, i| acc.wrapping_add(src[i]))
                })
                .collect();

            let mut step = local / 2;
            while step > 0 {
                for lid in 0..step {
                    scratch[lid] = scratch[lid].wrapping_add(scratch[lid + step]);
                }
                step /= 2;
            }
            *out = scratch[0];
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pass(global: usize, local: usize, param: u32, active_in: usize) -> PassDescriptor {
        PassDescriptor {
            index: 0,
            global_threads: global,
            local_size: local,
            param,
            active_in,
            active_out: 0,
            scratch_bytes: 0,
        }
    }

    fn buffer(device: &HostDevice, values: &[u32]) -> HostBuffer {
        let mut buf = device.alloc(values.len(), "test buffer").unwrap();
        device.upload(&mut buf, values).unwrap();
        buf
    }

    #[test]
    fn test_interleaved_pass_odd() {
        let device = HostDevice::new();
        let mut buf = buffer(&device, &[1, 2, 3, 4, 5]);

        let p = pass(3, 3, 1, 5);
        device
            .dispatch(Strategy::InterleavedAddressing, &p, PassIo::InPlace(&mut buf))
            .unwrap();
        assert_eq!(buf.as_slice(), &[3, 2, 7, 4, 5]);

        let p = pass(2, 2, 2, 3);
        device
            .dispatch(Strategy::InterleavedAddressing, &p, PassIo::InPlace(&mut buf))
            .unwrap();
        assert_eq!(buf.as_slice()[0], 10);
        assert_eq!(buf.as_slice()[4], 5);
    }

    #[test]
    fn test_sequential_pass() {
        let device = HostDevice::new();
        let mut buf = buffer(&device, &[1, 2, 3, 4, 5, 6, 7]);

        let p = pass(3, 3, 4, 7);
        device
            .dispatch(Strategy::SequentialAddressing, &p, PassIo::InPlace(&mut buf))
            .unwrap();
        assert_eq!(&buf.as_slice()[..4], &[6, 8, 10, 4]);
    }

    #[test]
    fn test_decomposition_pass_partial_group() {
        let device = HostDevice::new();
        let values: Vec<u32> = (1..=10).collect();
        let src = buffer(&device, &values);
        let mut dst = device.alloc(values.len(), "dst").unwrap();

        // Groups of 2 threads, 4 elements per group: [1..4], [5..8], [9, 10]
        let mut p = pass(6, 2, 10, 10);
        p.scratch_bytes = 2 * SCRATCH_ELEMENT_BYTES;
        device
            .dispatch(
                Strategy::Decomposition,
                &p,
                PassIo::Split {
                    src: &src,
                    dst: &mut dst,
                },
            )
            .unwrap();
        assert_eq!(&dst.as_slice()[..3], &[10, 26, 19]);
    }

    #[test]
    fn test_unrolled_pass_wraps() {
        let device = HostDevice::new();
        let values = vec![u32::MAX; 8];
        let src = buffer(&device, &values);
        let mut dst = device.alloc(8, "dst").unwrap();

        let mut p = pass(1, 1, 8, 8);
        p.scratch_bytes = SCRATCH_ELEMENT_BYTES;
        device
            .dispatch(
                Strategy::DecompositionUnrolled,
                &p,
                PassIo::Split {
                    src: &src,
                    dst: &mut dst,
                },
            )
            .unwrap();
        assert_eq!(dst.as_slice()[0], u32::MAX.wrapping_mul(8));
    }

    #[test]
    fn test_rejects_oversized_group() {
        let device = HostDevice::with_limits(HostDeviceLimits {
            max_group_size: 64,
            ..Default::default()
        });
        let mut buf = device.alloc(256, "buf").unwrap();
        let err = device
            .dispatch(
                Strategy::SequentialAddressing,
                &pass(128, 128, 128, 256),
                PassIo::InPlace(&mut buf),
            )
            .unwrap_err();
        assert!(matches!(err, ReductionError::Launch { .. }));
        assert!(device.dispatched_passes().is_empty());
    }

    #[test]
    fn test_rejects_mismatched_binding() {
        let device = HostDevice::new();
        let mut buf = device.alloc(4, "buf").unwrap();
        let err = device
            .dispatch(
                Strategy::Decomposition,
                &pass(2, 2, 4, 4),
                PassIo::InPlace(&mut buf),
            )
            .unwrap_err();
        assert!(err.to_string().contains("reduction_decomposition"));
    }

    #[test]
    fn test_alloc_limits() {
        let device = HostDevice::with_limits(HostDeviceLimits {
            max_buffer_elements: 16,
            ..Default::default()
        });
        assert!(device.alloc(16, "ok").is_ok());
        assert!(matches!(
            device.alloc(17, "too big"),
            Err(ReductionError::Allocation { what: "too big", .. })
        ));
        assert!(device.alloc(0, "empty").is_err());
    }

    #[test]
    fn test_upload_and_read_logged() {
        let device = HostDevice::new();
        let mut buf = device.alloc(4, "buf").unwrap();
        device.upload(&mut buf, &[9, 8]).unwrap();
        assert_eq!(device.read_scalar(&buf, 1).unwrap(), 8);
        assert!(device.read_scalar(&buf, 4).is_err());
        assert!(device.upload(&mut buf, &[0; 5]).is_err());
        device.synchronize().unwrap();

        assert_eq!(
            device.ops(),
            vec![
                HostOp::Upload { len: 2 },
                HostOp::ReadScalar { index: 1 },
                HostOp::Synchronize
            ]
        );
    }
}
