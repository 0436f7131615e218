//! Execution devices
//!
//! A [`Device`] is the host side of one command stream: allocate, upload,
//! launch, download, free, in that order, each step checked before the
//! next. Two implementations exist:
//!
//! - [`sim::SimDevice`]: runs each kernel's lane/subgroup/workgroup schedule
//!   on the host. Always available; used by the tests.
//! - `gpu::GpuDevice` (feature `gpu`): wgpu compute on Vulkan/Metal/DX12.

#[cfg(feature = "gpu")]
pub mod gpu;
pub mod sim;

use std::time::Duration;

use crate::error::DeviceError;
use crate::kernels::KernelDescriptor;
use crate::shape::ProblemProperties;

/// Handle to a device buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

/// Result of a device call
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Buffer bookkeeping, used to detect leaks across repeated runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AllocationStats {
    /// Buffers allocated since the device was opened
    pub allocated: u64,
    /// Buffers freed since the device was opened
    pub freed: u64,
}

impl AllocationStats {
    /// Buffers currently alive
    pub fn live(&self) -> u64 {
        self.allocated - self.freed
    }
}

/// One kernel launch over three operand buffers
#[derive(Debug, Clone, Copy)]
pub struct Launch<'a> {
    /// Kernel to run
    pub kernel: &'a KernelDescriptor,
    /// Problem instance (shapes and kinds)
    pub problem: &'a ProblemProperties,
    /// Left matrix, M×K
    pub a: BufferId,
    /// Right operand, N×K
    pub b: BufferId,
    /// Result, M×N
    pub c: BufferId,
}

/// Checks every device performs before a launch: the subgroup width the
/// kernel was generated for, and operand buffers large enough for the
/// problem. `capacity` reports the allocated size of a live buffer.
pub(crate) fn validate_launch(
    launch: &Launch<'_>,
    subgroup_size: Option<usize>,
    capacity: impl Fn(BufferId) -> Option<usize>,
) -> DeviceResult<()> {
    if let Some(width) = launch.kernel.variant.subgroup_size() {
        if subgroup_size != Some(width) {
            return Err(DeviceError::Unsupported(match subgroup_size {
                Some(have) => format!(
                    "{} needs {width}-lane subgroups, device has {have}",
                    launch.kernel.name
                ),
                None => format!(
                    "{} needs subgroup operations with a fixed width",
                    launch.kernel.name
                ),
            }));
        }
    }
    let problem = launch.problem;
    for (buffer, requested) in [
        (launch.a, problem.a_bytes()),
        (launch.b, problem.b_bytes()),
        (launch.c, problem.c_bytes()),
    ] {
        let capacity = capacity(buffer).ok_or(DeviceError::UnknownBuffer(buffer))?;
        if capacity < requested {
            return Err(DeviceError::SizeMismatch {
                buffer,
                capacity,
                requested,
            });
        }
    }
    Ok(())
}

/// Host-side view of an accelerator command stream
pub trait Device {
    /// Human-readable device name
    fn name(&self) -> String;

    /// Fixed subgroup width, or `None` when lane exchange is unavailable
    fn subgroup_size(&self) -> Option<usize>;

    /// Allocate `bytes` of device memory
    fn alloc(&mut self, label: &'static str, bytes: usize) -> DeviceResult<BufferId>;

    /// Copy `data` to the start of `buffer`
    fn upload(&mut self, buffer: BufferId, data: &[u8]) -> DeviceResult<()>;

    /// Copy the first `bytes` of `buffer` back to the host
    fn download(&mut self, buffer: BufferId, bytes: usize) -> DeviceResult<Vec<u8>>;

    /// Release `buffer`
    fn free(&mut self, buffer: BufferId) -> DeviceResult<()>;

    /// Run the kernel once and wait for completion
    fn launch(&mut self, launch: &Launch<'_>) -> DeviceResult<()>;

    /// Run the kernel `iterations` times back to back inside one timed
    /// region and return the region's duration
    fn launch_timed(&mut self, launch: &Launch<'_>, iterations: u32) -> DeviceResult<Duration>;

    /// Allocation counters
    fn stats(&self) -> AllocationStats;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_buffers() {
        let stats = AllocationStats {
            allocated: 6,
            freed: 4,
        };
        assert_eq!(stats.live(), 2);
        assert_eq!(AllocationStats::default().live(), 0);
    }
}
