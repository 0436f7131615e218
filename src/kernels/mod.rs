//! Kernel variants and their descriptors
//!
//! A [`KernelDescriptor`] says what a kernel needs (operand kinds, tile,
//! threads, shared memory, entry point); the harness never looks further.
//! The variant set is closed, so dispatch is a `match` over
//! [`KernelVariant`].
//!
//! ## Families
//!
//! - **Naive**: one thread per output element, serial K walk
//! - **Subgroup**: one subgroup per row block, lane-sliced K, shuffle reduction
//! - **Workgroup**: several subgroups per row block, staged two-level reduction

pub mod lanes;
pub mod naive;
pub mod operand;
pub mod subgroup;
pub mod wgsl;
pub mod workgroup;

use crate::element::{Accumulator, ElementKind};
use crate::error::{BenchError, DeviceError, Result};
use crate::shape::{compute_problem, OperandKinds, ProblemProperties, Shape3D};

pub use operand::{Operand, Output};
pub use subgroup::SubgroupParams;
pub use workgroup::WorkgroupParams;

/// Invocation limit per workgroup (wgpu default limits)
pub const MAX_WORKGROUP_INVOCATIONS: usize = 256;

/// Input kinds every family is instantiated for; each accumulates into its
/// wider kind
pub const WIDENING_INPUTS: [ElementKind; 4] = [
    ElementKind::Int8,
    ElementKind::Int16,
    ElementKind::Float16,
    ElementKind::Float32,
];

/// How a kernel distributes the reduction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelVariant {
    /// One thread per output element
    Naive {
        /// Output elements and K chunk per workgroup
        tile: Shape3D,
    },
    /// One subgroup per block of rows
    Subgroup(SubgroupParams),
    /// Several subgroups per block of rows, staged through shared memory
    Workgroup(WorkgroupParams),
}

impl KernelVariant {
    /// Tile one workgroup covers
    pub const fn tile(&self) -> Shape3D {
        match self {
            KernelVariant::Naive { tile } => *tile,
            KernelVariant::Subgroup(p) => p.tile(),
            KernelVariant::Workgroup(p) => p.tile(),
        }
    }

    /// Subgroup width the kernel was built for, if it uses lane exchange
    pub const fn subgroup_size(&self) -> Option<usize> {
        match self {
            KernelVariant::Naive { .. } => None,
            KernelVariant::Subgroup(p) => Some(p.subgroup_size),
            KernelVariant::Workgroup(p) => Some(p.subgroup_size),
        }
    }

    /// WGSL entry point
    pub const fn entry_point(&self) -> &'static str {
        match self {
            KernelVariant::Naive { .. } => naive::ENTRY_POINT,
            KernelVariant::Subgroup(_) => subgroup::ENTRY_POINT,
            KernelVariant::Workgroup(_) => workgroup::ENTRY_POINT,
        }
    }

    fn label(&self) -> String {
        match self {
            KernelVariant::Naive { tile } => format!("naive_{}x{}x{}", tile.m, tile.n, tile.k),
            KernelVariant::Subgroup(p) => {
                format!("subgroup_s{}_r{}_v{}", p.subgroup_size, p.rows, p.vector_width)
            }
            KernelVariant::Workgroup(p) => format!(
                "workgroup_g{}_s{}_r{}_v{}",
                p.groups, p.subgroup_size, p.rows, p.vector_width
            ),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let tile = self.tile();
        if tile.m == 0 || tile.n == 0 || tile.k == 0 {
            return Err(format!("tile {tile} has a zero extent"));
        }
        let sizes = match self {
            KernelVariant::Naive { .. } => None,
            KernelVariant::Subgroup(p) => Some((p.subgroup_size, 1)),
            KernelVariant::Workgroup(p) => Some((p.subgroup_size, p.groups)),
        };
        if let Some((width, groups)) = sizes {
            if !width.is_power_of_two() {
                return Err(format!("subgroup size {width} is not a power of two"));
            }
            if groups == 0 || groups > width {
                return Err(format!(
                    "{groups} subgroups cannot be folded by a {width}-lane subgroup"
                ));
            }
        }
        Ok(())
    }
}

/// Everything the harness knows about a kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDescriptor {
    /// Unique name, `<family params>_<kinds>`
    pub name: String,
    /// Operand element kinds
    pub kinds: OperandKinds,
    /// Distribution strategy and its parameters
    pub variant: KernelVariant,
}

impl KernelDescriptor {
    /// Describe `variant` over `kinds`
    pub fn new(variant: KernelVariant, kinds: OperandKinds) -> Result<Self> {
        let name = format!("{}_{}", variant.label(), kinds);
        let reject = |reason: String| BenchError::UnsupportedKernel {
            kernel: name.clone(),
            reason,
        };

        variant.validate().map_err(reject)?;
        if kinds.c != kinds.a.accumulator() || kinds.c != kinds.b.accumulator() {
            return Err(reject(format!(
                "{} and {} products must accumulate into {}",
                kinds.a,
                kinds.b,
                kinds.a.accumulator()
            )));
        }
        if variant.threads_per_workgroup() > MAX_WORKGROUP_INVOCATIONS {
            return Err(reject(format!(
                "{} threads per workgroup exceeds {MAX_WORKGROUP_INVOCATIONS}",
                variant.threads_per_workgroup()
            )));
        }

        Ok(Self {
            name,
            kinds,
            variant,
        })
    }

    /// Tile one workgroup covers
    pub fn tile(&self) -> Shape3D {
        self.variant.tile()
    }

    /// WGSL entry point
    pub fn entry_point(&self) -> &'static str {
        self.variant.entry_point()
    }

    /// Problem instance for `total` under this kernel's tile
    pub fn problem(&self, total: Shape3D) -> ProblemProperties {
        compute_problem(self.kinds, self.tile(), total)
    }

    /// `@workgroup_size` of the kernel
    pub fn workgroup_size(&self) -> [u32; 3] {
        match self.variant {
            KernelVariant::Naive { tile } => [tile.m as u32, tile.n as u32, 1],
            _ => [self.variant.threads_per_workgroup() as u32, 1, 1],
        }
    }

    /// Dispatch grid: one workgroup per outer (M, N) tile
    pub fn workgroups(&self, problem: &ProblemProperties) -> [u32; 3] {
        [problem.outer.m as u32, problem.outer.n as u32, 1]
    }

    /// Total threads a launch over `problem` occupies
    pub fn required_threads(&self, problem: &ProblemProperties) -> u64 {
        (problem.outer.m * problem.outer.n) as u64 * self.variant.threads_per_workgroup() as u64
    }

    /// Shared (workgroup) memory per workgroup in bytes
    pub fn shared_memory_bytes(&self, _problem: &ProblemProperties) -> usize {
        match self.variant {
            KernelVariant::Naive { .. } | KernelVariant::Subgroup(_) => 0,
            KernelVariant::Workgroup(p) => self.kinds.c.storage_bytes(p.staging_len()),
        }
    }

    /// Whether the kernel exchanges values between lanes
    pub fn needs_subgroups(&self) -> bool {
        self.variant.subgroup_size().is_some()
    }

    /// Complete WGSL module
    pub fn wgsl(&self) -> String {
        match self.variant {
            KernelVariant::Naive { tile } => naive::wgsl_source(tile, self.kinds),
            KernelVariant::Subgroup(p) => subgroup::wgsl_source(p, self.kinds),
            KernelVariant::Workgroup(p) => workgroup::wgsl_source(p, self.kinds),
        }
    }

    /// Run the kernel's schedule on the host over raw operand bytes
    pub fn emulate(
        &self,
        problem: &ProblemProperties,
        a: &[u8],
        b: &[u8],
        c: &mut [u8],
    ) -> std::result::Result<(), DeviceError> {
        match self.kinds.c {
            ElementKind::Int32 => self.emulate_as::<i32>(problem, a, b, c),
            ElementKind::Float32 => self.emulate_as::<f32>(problem, a, b, c),
            other => {
                return Err(DeviceError::Unsupported(format!(
                    "{other} is not an accumulator kind"
                )))
            }
        }
        Ok(())
    }

    fn emulate_as<Acc: Accumulator>(
        &self,
        problem: &ProblemProperties,
        a: &[u8],
        b: &[u8],
        c: &mut [u8],
    ) {
        let total = problem.total;
        let a = Operand::new(a, problem.kinds.a, total.m, total.k);
        let b = Operand::new(b, problem.kinds.b, total.n, total.k);
        let mut c = Output::new(c, problem.kinds.c, total.m, total.n);

        match self.variant {
            KernelVariant::Naive { .. } => naive::emulate::<Acc>(problem, &a, &b, &mut c),
            KernelVariant::Subgroup(p) => subgroup::emulate::<Acc>(problem, p, &a, &b, &mut c),
            KernelVariant::Workgroup(p) => workgroup::emulate::<Acc>(problem, p, &a, &b, &mut c),
        }
    }
}

impl KernelVariant {
    /// Threads per workgroup
    pub const fn threads_per_workgroup(&self) -> usize {
        match self {
            KernelVariant::Naive { tile } => tile.m * tile.n,
            KernelVariant::Subgroup(p) => p.subgroup_size,
            KernelVariant::Workgroup(p) => p.threads(),
        }
    }
}

/// Variant shapes instantiated by [`registry`], before element kinds
pub fn variant_shapes(subgroup_size: Option<usize>) -> Vec<KernelVariant> {
    let mut shapes = vec![
        KernelVariant::Naive {
            tile: Shape3D::new(64, 1, 4),
        },
        KernelVariant::Naive {
            tile: Shape3D::new(16, 16, 4),
        },
    ];
    if let Some(s) = subgroup_size {
        for rows in [1, 4] {
            shapes.push(KernelVariant::Subgroup(SubgroupParams {
                subgroup_size: s,
                rows,
                vector_width: 4,
            }));
        }
        for (rows, vector_width) in [(4, 4), (8, 2)] {
            shapes.push(KernelVariant::Workgroup(WorkgroupParams {
                subgroup_size: s,
                groups: 4,
                rows,
                vector_width,
            }));
        }
    }
    shapes
}

/// Every kernel variant runnable on a device with the given subgroup width
///
/// `None` leaves out the families that need lane exchange. Shapes the width
/// cannot support (e.g. more subgroups than lanes) are skipped.
pub fn registry(subgroup_size: Option<usize>) -> Vec<KernelDescriptor> {
    variant_shapes(subgroup_size)
        .into_iter()
        .flat_map(|variant| {
            WIDENING_INPUTS
                .into_iter()
                .filter_map(move |input| {
                    KernelDescriptor::new(variant, OperandKinds::widening(input)).ok()
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_names_are_unique() {
        let kernels = registry(Some(32));
        let names: HashSet<&str> = kernels.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names.len(), kernels.len());
        assert_eq!(kernels.len(), 6 * WIDENING_INPUTS.len());
    }

    #[test]
    fn test_registry_without_subgroups_is_naive_only() {
        let kernels = registry(None);
        assert_eq!(kernels.len(), 2 * WIDENING_INPUTS.len());
        assert!(kernels.iter().all(|k| !k.needs_subgroups()));
    }

    #[test]
    fn test_narrow_subgroup_drops_workgroup_family() {
        // 4 subgroups cannot be folded by 2 lanes
        let kernels = registry(Some(2));
        assert!(kernels
            .iter()
            .all(|k| !matches!(k.variant, KernelVariant::Workgroup(_))));
        assert!(kernels
            .iter()
            .any(|k| matches!(k.variant, KernelVariant::Subgroup(_))));
    }

    #[test]
    fn test_naive_descriptor() {
        let kernel = KernelDescriptor::new(
            KernelVariant::Naive {
                tile: Shape3D::new(64, 1, 4),
            },
            OperandKinds::widening(ElementKind::Int8),
        )
        .unwrap();
        assert_eq!(kernel.name, "naive_64x1x4_i8i8i32");
        assert_eq!(kernel.entry_point(), "naive_main");

        let problem = kernel.problem(Shape3D::new(1024, 1, 4096));
        assert_eq!(problem.outer, Shape3D::new(16, 1, 1024));
        assert_eq!(kernel.workgroup_size(), [64, 1, 1]);
        assert_eq!(kernel.workgroups(&problem), [16, 1, 1]);
        assert_eq!(kernel.required_threads(&problem), 1024);
        assert_eq!(kernel.shared_memory_bytes(&problem), 0);
    }

    #[test]
    fn test_workgroup_descriptor_shared_memory() {
        let kernel = KernelDescriptor::new(
            KernelVariant::Workgroup(WorkgroupParams {
                subgroup_size: 32,
                groups: 4,
                rows: 8,
                vector_width: 2,
            }),
            OperandKinds::widening(ElementKind::Float16),
        )
        .unwrap();
        assert_eq!(kernel.name, "workgroup_g4_s32_r8_v2_f16f16f32");

        let problem = kernel.problem(Shape3D::new(4096, 1, 4096));
        assert_eq!(problem.outer, Shape3D::new(512, 1, 16));
        assert_eq!(kernel.workgroup_size(), [128, 1, 1]);
        assert_eq!(kernel.required_threads(&problem), 512 * 128);
        assert_eq!(kernel.shared_memory_bytes(&problem), 8 * 4 * 4);
    }

    #[test]
    fn test_rejects_narrow_accumulator() {
        let err = KernelDescriptor::new(
            KernelVariant::Naive {
                tile: Shape3D::new(8, 1, 4),
            },
            OperandKinds {
                a: ElementKind::Int8,
                b: ElementKind::Int8,
                c: ElementKind::Int8,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BenchError::UnsupportedKernel { .. }), "{err}");
    }

    #[test]
    fn test_rejects_oversized_workgroup() {
        let err = KernelDescriptor::new(
            KernelVariant::Naive {
                tile: Shape3D::new(32, 32, 1),
            },
            OperandKinds::widening(ElementKind::Float32),
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds 256"), "{err}");
    }

    #[test]
    fn test_every_registered_kernel_has_wgsl_entry_point() {
        for kernel in registry(Some(32)) {
            let src = kernel.wgsl();
            assert!(
                src.contains(&format!("fn {}(", kernel.entry_point())),
                "{}",
                kernel.name
            );
            assert!(!src.contains('$'), "{}", kernel.name);
        }
    }
}
