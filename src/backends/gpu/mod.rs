//! wgpu compute backend
//!
//! Runs the generated WGSL on Vulkan/Metal/DX12. Every kernel shares one
//! bind group layout:
//!
//! | binding | resource                 |
//! |---------|--------------------------|
//! | 0       | A, `array<u32>`, read    |
//! | 1       | B, `array<u32>`, read    |
//! | 2       | C, `array<u32>`, write   |
//! | 3       | `Params { m, n, k, pad }`|

mod device;

pub use device::GpuDevice;

/// Uniform block mirrored by `struct Params` in the shader prelude
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct Params {
    pub m: u32,
    pub n: u32,
    pub k: u32,
    pub pad: u32,
}

/// Round `bytes` up to the 4-byte copy alignment, never below one word
pub(crate) fn padded_size(bytes: usize) -> u64 {
    (bytes.max(1).div_ceil(4) * 4) as u64
}
