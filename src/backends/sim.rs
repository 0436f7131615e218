//! Host emulation of the accelerator
//!
//! Buffers live in host memory and launches execute the kernel's own
//! schedule (`KernelDescriptor::emulate`): the same workgroup grid, the same
//! per-lane K slices, the same shuffle-down tree and staging step as the
//! WGSL source. Timing is host time around the emulated launches.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};

use super::{validate_launch, AllocationStats, BufferId, Device, DeviceResult, Launch};
use crate::error::DeviceError;

/// Largest single allocation the emulator accepts
pub const MAX_ALLOCATION: usize = 1 << 31;

/// Emulated device
#[derive(Debug)]
pub struct SimDevice {
    subgroup_size: usize,
    buffers: BTreeMap<BufferId, Vec<u8>>,
    next_id: u32,
    stats: AllocationStats,
}

impl SimDevice {
    /// Emulated device with `subgroup_size` lanes per subgroup
    ///
    /// # Panics
    ///
    /// If `subgroup_size` is not a power of two.
    pub fn new(subgroup_size: usize) -> Self {
        assert!(
            subgroup_size.is_power_of_two(),
            "subgroup size {subgroup_size} is not a power of two"
        );
        Self {
            subgroup_size,
            buffers: BTreeMap::new(),
            next_id: 0,
            stats: AllocationStats::default(),
        }
    }

    fn buffer(&self, id: BufferId) -> DeviceResult<&Vec<u8>> {
        self.buffers.get(&id).ok_or(DeviceError::UnknownBuffer(id))
    }

    fn check_launch(&self, launch: &Launch<'_>) -> DeviceResult<()> {
        validate_launch(launch, Some(self.subgroup_size), |id| {
            self.buffers.get(&id).map(Vec::len)
        })
    }

    fn execute(&mut self, launch: &Launch<'_>) -> DeviceResult<()> {
        // Take C out so A and B can stay borrowed from the map
        let mut c = std::mem::take(
            self.buffers
                .get_mut(&launch.c)
                .ok_or(DeviceError::UnknownBuffer(launch.c))?,
        );
        let result = match (self.buffers.get(&launch.a), self.buffers.get(&launch.b)) {
            (Some(a), Some(b)) => launch.kernel.emulate(launch.problem, a, b, &mut c),
            (None, _) => Err(DeviceError::UnknownBuffer(launch.a)),
            (_, None) => Err(DeviceError::UnknownBuffer(launch.b)),
        };
        if let Some(slot) = self.buffers.get_mut(&launch.c) {
            *slot = c;
        }
        result
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new(32)
    }
}

impl Device for SimDevice {
    fn name(&self) -> String {
        format!("host emulator ({}-lane subgroups)", self.subgroup_size)
    }

    fn subgroup_size(&self) -> Option<usize> {
        Some(self.subgroup_size)
    }

    fn alloc(&mut self, label: &'static str, bytes: usize) -> DeviceResult<BufferId> {
        if bytes == 0 || bytes > MAX_ALLOCATION {
            return Err(DeviceError::Allocation { label, bytes });
        }
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(id, vec![0u8; bytes]);
        self.stats.allocated += 1;
        debug!(?id, label, bytes, "alloc");
        Ok(id)
    }

    fn upload(&mut self, buffer: BufferId, data: &[u8]) -> DeviceResult<()> {
        let dst = self
            .buffers
            .get_mut(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        if data.len() > dst.len() {
            return Err(DeviceError::SizeMismatch {
                buffer,
                capacity: dst.len(),
                requested: data.len(),
            });
        }
        dst[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn download(&mut self, buffer: BufferId, bytes: usize) -> DeviceResult<Vec<u8>> {
        let src = self.buffer(buffer)?;
        if bytes > src.len() {
            return Err(DeviceError::SizeMismatch {
                buffer,
                capacity: src.len(),
                requested: bytes,
            });
        }
        Ok(src[..bytes].to_vec())
    }

    fn free(&mut self, buffer: BufferId) -> DeviceResult<()> {
        self.buffers
            .remove(&buffer)
            .ok_or(DeviceError::UnknownBuffer(buffer))?;
        self.stats.freed += 1;
        debug!(id = ?buffer, "free");
        Ok(())
    }

    #[instrument(skip_all, fields(kernel = %launch.kernel.name))]
    fn launch(&mut self, launch: &Launch<'_>) -> DeviceResult<()> {
        self.check_launch(launch)?;
        self.execute(launch)
    }

    #[instrument(skip(self, launch), fields(kernel = %launch.kernel.name))]
    fn launch_timed(&mut self, launch: &Launch<'_>, iterations: u32) -> DeviceResult<Duration> {
        self.check_launch(launch)?;
        let start = Instant::now();
        for _ in 0..iterations {
            self.execute(launch)?;
        }
        Ok(start.elapsed())
    }

    fn stats(&self) -> AllocationStats {
        self.stats
    }
}
