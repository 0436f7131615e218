//! Correctness checks and timing around a [`Device`]
//!
//! Both entry points follow the same command stream: generate operands,
//! allocate, upload, launch, download (check only), free. Buffers are owned
//! by the call that allocated them and released on every exit path.

pub mod bench;
pub mod check;

pub use bench::{benchmark, search_iterations, BenchReport, Measurement, MAX_ITERATIONS};
pub use check::{check, sampled_tiles, CheckReport};

use tracing::warn;

use crate::backends::{BufferId, Device, Launch};
use crate::device_call;
use crate::error::Result;
use crate::kernels::KernelDescriptor;
use crate::shape::ProblemProperties;

/// The three operand buffers of one problem instance
#[derive(Debug)]
pub struct OperandBuffers {
    /// Left matrix, M×K
    pub a: BufferId,
    /// Right operand, N×K
    pub b: BufferId,
    /// Result, M×N
    pub c: BufferId,
}

impl OperandBuffers {
    /// Allocate A, B and C for `problem`
    ///
    /// Buffers already allocated are released if a later allocation fails.
    pub fn allocate<D: Device + ?Sized>(device: &mut D, problem: &ProblemProperties) -> Result<Self> {
        let a = device_call!(device.alloc("A", problem.a_bytes()))?;
        let b = match device_call!(device.alloc("B", problem.b_bytes())) {
            Ok(b) => b,
            Err(e) => {
                release_all(device, &[a]);
                return Err(e);
            }
        };
        let c = match device_call!(device.alloc("C", problem.c_bytes())) {
            Ok(c) => c,
            Err(e) => {
                release_all(device, &[a, b]);
                return Err(e);
            }
        };
        Ok(Self { a, b, c })
    }

    /// Upload host operands, in A, B, C order
    pub fn upload<D: Device + ?Sized>(&self, device: &mut D, a: &[u8], b: &[u8], c: &[u8]) -> Result<()> {
        device_call!(device.upload(self.a, a))?;
        device_call!(device.upload(self.b, b))?;
        device_call!(device.upload(self.c, c))?;
        Ok(())
    }

    /// Launch description binding these buffers
    pub fn launch<'a>(&self, kernel: &'a KernelDescriptor, problem: &'a ProblemProperties) -> Launch<'a> {
        Launch {
            kernel,
            problem,
            a: self.a,
            b: self.b,
            c: self.c,
        }
    }

    /// Free all three buffers, logging failures instead of returning them
    pub fn release<D: Device + ?Sized>(self, device: &mut D) {
        release_all(device, &[self.a, self.b, self.c]);
    }
}

fn release_all<D: Device + ?Sized>(device: &mut D, buffers: &[BufferId]) {
    for &buffer in buffers {
        if let Err(e) = device.free(buffer) {
            warn!(?buffer, error = %e, "failed to free device buffer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sim::SimDevice;
    use crate::element::ElementKind;
    use crate::shape::{compute_problem, OperandKinds, Shape3D};

    fn problem(total: Shape3D) -> ProblemProperties {
        compute_problem(
            OperandKinds::widening(ElementKind::Int8),
            Shape3D::new(4, 1, 4),
            total,
        )
    }

    #[test]
    fn test_allocate_and_release() {
        let mut device = SimDevice::default();
        let buffers = OperandBuffers::allocate(&mut device, &problem(Shape3D::new(8, 1, 16))).unwrap();
        assert_eq!(device.stats().live(), 3);
        buffers.release(&mut device);
        assert_eq!(device.stats().live(), 0);
    }

    #[test]
    fn test_partial_allocation_is_rolled_back() {
        // N = 0 makes B and C zero-sized, so the second allocation fails
        let mut device = SimDevice::default();
        let err = OperandBuffers::allocate(&mut device, &problem(Shape3D::new(8, 0, 16))).unwrap_err();
        assert!(err.to_string().contains("alloc"), "{err}");
        assert_eq!(device.stats().allocated, 1);
        assert_eq!(device.stats().live(), 0);
    }
}
