//! Exact correctness check of one kernel against a host reference
//!
//! Operands are small integers (see [`crate::random`]), so every partial
//! sum is exactly representable in the result kind and device output must
//! match the reference bit for bit, independent of summation order.

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use super::OperandBuffers;
use crate::backends::Device;
use crate::config::{BenchConfig, CheckCoverage};
use crate::device_call;
use crate::element::{Accumulator, ElementKind};
use crate::error::{BenchError, Result};
use crate::kernels::{KernelDescriptor, Operand};
use crate::random::{fill, Lcg};
use crate::shape::{ProblemProperties, Shape3D};

/// Outcome of a passing check
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    /// Kernel name
    pub kernel: String,
    /// Problem the kernel ran on
    pub problem: ProblemProperties,
    /// Outer (M, N) tiles recomputed on the host
    pub tiles: usize,
    /// Output elements compared
    pub elements: usize,
}

/// Tile indices visited along one dimension with `count` outer tiles:
/// first, middle and last, deduplicated
pub fn sampled_tiles(count: usize) -> Vec<usize> {
    if count == 0 {
        return Vec::new();
    }
    let picks: BTreeSet<usize> = [0, count / 2, count - 1].into_iter().collect();
    picks.into_iter().collect()
}

fn tiles_along(count: usize, coverage: CheckCoverage) -> Vec<usize> {
    match coverage {
        CheckCoverage::Sampled => sampled_tiles(count),
        CheckCoverage::Exhaustive => (0..count).collect(),
    }
}

/// Random words for C so outputs the kernel never writes cannot match
fn garbage(bytes: usize, rng: &mut Lcg) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes + 4);
    while out.len() < bytes {
        out.extend_from_slice(&rng.next_u32().to_le_bytes());
    }
    out.truncate(bytes);
    out
}

/// Run `kernel` once over `total` and compare against the host reference
///
/// # Errors
///
/// [`BenchError::Device`] if any device call fails,
/// [`BenchError::Mismatch`] on the first element that differs.
#[instrument(skip(device, kernel, config), fields(kernel = %kernel.name))]
pub fn check<D: Device + ?Sized>(
    device: &mut D,
    kernel: &KernelDescriptor,
    total: Shape3D,
    config: &BenchConfig,
) -> Result<CheckReport> {
    let problem = kernel.problem(total);
    if config.debug {
        info!(kernel = %kernel.name, %problem, "checking");
    }

    let mut rng = Lcg::new(config.seed);
    let a = fill(problem.kinds.a, problem.a_elements(), &mut rng);
    let b = fill(problem.kinds.b, problem.b_elements(), &mut rng);
    let c = garbage(problem.c_bytes(), &mut rng);

    let buffers = OperandBuffers::allocate(device, &problem)?;
    let result = run(
        device,
        &buffers,
        kernel,
        &problem,
        [a.as_slice(), b.as_slice(), c.as_slice()],
    );
    buffers.release(device);
    let c = result?;

    let report = match problem.kinds.c {
        ElementKind::Int32 => compare::<i32>(kernel, &problem, &a, &b, &c, config.coverage),
        ElementKind::Float32 => compare::<f32>(kernel, &problem, &a, &b, &c, config.coverage),
        other => Err(BenchError::UnsupportedKernel {
            kernel: kernel.name.clone(),
            reason: format!("{other} is not an accumulator kind"),
        }),
    }?;
    debug!(tiles = report.tiles, elements = report.elements, "check passed");
    Ok(report)
}

fn run<D: Device + ?Sized>(
    device: &mut D,
    buffers: &OperandBuffers,
    kernel: &KernelDescriptor,
    problem: &ProblemProperties,
    [a, b, c]: [&[u8]; 3],
) -> Result<Vec<u8>> {
    buffers.upload(device, a, b, c)?;
    device_call!(device.launch(&buffers.launch(kernel, problem)))?;
    device_call!(device.download(buffers.c, problem.c_bytes()))
}

/// Reference value of `C[row, col]`, walking K in chunks of the kernel's
/// K tile
fn reference<Acc: Accumulator>(
    problem: &ProblemProperties,
    a: &Operand<'_>,
    b: &Operand<'_>,
    row: usize,
    col: usize,
) -> Acc {
    let ProblemProperties {
        total, tile, outer, ..
    } = *problem;
    let mut acc = Acc::zero();
    for chunk in 0..outer.k {
        let start = chunk * tile.k;
        let end = (start + tile.k).min(total.k);
        for k in start..end {
            acc = acc.mac(a.get(row, k), b.get(col, k));
        }
    }
    acc
}

fn compare<Acc: Accumulator>(
    kernel: &KernelDescriptor,
    problem: &ProblemProperties,
    a: &[u8],
    b: &[u8],
    c: &[u8],
    coverage: CheckCoverage,
) -> Result<CheckReport> {
    let ProblemProperties {
        kinds,
        total,
        tile,
        outer,
    } = *problem;
    let a = Operand::new(a, kinds.a, total.m, total.k);
    let b = Operand::new(b, kinds.b, total.n, total.k);
    let c = Operand::new(c, kinds.c, total.m, total.n);

    let tiles_m = tiles_along(outer.m, coverage);
    let tiles_n = tiles_along(outer.n, coverage);
    let mut elements = 0;

    for &tile_m in &tiles_m {
        for &tile_n in &tiles_n {
            let rows = tile_m * tile.m..((tile_m + 1) * tile.m).min(total.m);
            for row in rows {
                let cols = tile_n * tile.n..((tile_n + 1) * tile.n).min(total.n);
                for col in cols {
                    let expected: Acc = reference(problem, &a, &b, row, col);
                    let actual: Acc = c.get(row, col);
                    if !actual.bit_eq(expected) {
                        return Err(BenchError::Mismatch {
                            kernel: kernel.name.clone(),
                            tile_m,
                            tile_n,
                            row,
                            col,
                            actual: actual.to_string(),
                            expected: expected.to_string(),
                        });
                    }
                    elements += 1;
                }
            }
        }
    }

    Ok(CheckReport {
        kernel: kernel.name.clone(),
        problem: *problem,
        tiles: tiles_m.len() * tiles_n.len(),
        elements,
    })
}
