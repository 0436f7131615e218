//! tilebench: correctness checks and micro-benchmarks for tiled GPU
//! matrix-vector and matrix-multiply kernels
//!
//! The crate computes `C = A · Bᵀ` with A stored M×K and B stored N×K, both
//! row-major, through a family of tiled kernels that differ only in how the
//! K reduction is distributed across the hardware:
//!
//! 1. **Naive** - one thread per output element
//! 2. **Subgroup** - lanes of one subgroup split K and fold with shuffles
//! 3. **Workgroup** - several subgroups split K, stage partials in shared
//!    memory, then fold again
//!
//! Every kernel exists twice: as generated WGSL for the wgpu backend
//! (feature `gpu`) and as a host emulation of exactly the same schedule,
//! so the checks and benchmarks run with or without a GPU.
//!
//! # Quick Start
//!
//! ```rust
//! use tilebench::backends::sim::SimDevice;
//! use tilebench::config::BenchConfig;
//! use tilebench::harness::check;
//! use tilebench::kernels::registry;
//! use tilebench::shape::Shape3D;
//!
//! let mut device = SimDevice::new(8);
//! let config = BenchConfig::default();
//! for kernel in registry(Some(8)) {
//!     let report = check(&mut device, &kernel, Shape3D::new(64, 1, 256), &config).unwrap();
//!     assert_eq!(report.kernel, kernel.name);
//! }
//! ```

pub mod backends;
pub mod config;
pub mod element;
pub mod error;
pub mod harness;
pub mod kernels;
pub mod random;
pub mod shape;

pub use backends::Device;
pub use config::BenchConfig;
pub use element::ElementKind;
pub use error::{BenchError, DeviceError, Result};
pub use kernels::{KernelDescriptor, KernelVariant};
pub use shape::{OperandKinds, ProblemProperties, Shape3D};
