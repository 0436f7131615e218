//! Two-level workgroup-cooperative kernel
//!
//! `groups` subgroups share one workgroup and one block of output rows.
//! Within each K tile, subgroup `g` reduces the slice
//! `[g·S·V, (g+1)·S·V)` exactly like the subgroup kernel and lane 0 stages
//! the per-row result in `staging[row·G + g]`. After the workgroup barrier,
//! subgroup `g` finishes rows `g, g+G, g+2G, …`: lanes below `G` pick up
//! the staged partials of one row and the subgroup folds them again.

use super::lanes::Subgroup;
use super::operand::{Operand, Output};
use super::subgroup::{accumulate_rows, SubgroupParams};
use super::wgsl;
use crate::element::Accumulator;
use crate::shape::{OperandKinds, ProblemProperties, Shape3D};

/// WGSL entry point
pub const ENTRY_POINT: &str = "workgroup_main";

/// Shape parameters of a two-level kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkgroupParams {
    /// Lanes per subgroup
    pub subgroup_size: usize,
    /// Subgroups per workgroup; at most `subgroup_size`
    pub groups: usize,
    /// Output rows owned by the workgroup
    pub rows: usize,
    /// Consecutive K elements each lane loads per K tile
    pub vector_width: usize,
}

impl WorkgroupParams {
    /// K elements one subgroup covers per K tile
    pub const fn slice_k(&self) -> usize {
        self.subgroup_size * self.vector_width
    }

    /// Tile covered by one workgroup
    pub const fn tile(&self) -> Shape3D {
        Shape3D::new(self.rows, 1, self.groups * self.slice_k())
    }

    /// Threads per workgroup
    pub const fn threads(&self) -> usize {
        self.groups * self.subgroup_size
    }

    /// Accumulators in the shared staging area
    pub const fn staging_len(&self) -> usize {
        self.rows * self.groups
    }

    fn subgroup(&self) -> SubgroupParams {
        SubgroupParams {
            subgroup_size: self.subgroup_size,
            rows: self.rows,
            vector_width: self.vector_width,
        }
    }
}

const TEMPLATE: &str = r#"
const SUBGROUP_SIZE: u32 = $SUBGROUP_SIZEu;
const GROUPS: u32 = $GROUPSu;
const ROWS: u32 = $ROWSu;
const VEC: u32 = $VECu;
const SLICE_K: u32 = $SLICE_Ku;
const TILE_K: u32 = $TILE_Ku;

var<workgroup> staging: array<$ACC, $STAGING_LEN>;

$SUBGROUP_SUM
@compute @workgroup_size($THREADS, 1, 1)
fn workgroup_main(
    @builtin(workgroup_id) wg: vec3<u32>,
    @builtin(local_invocation_index) index: u32,
) {
    let group = index / SUBGROUP_SIZE;
    let lane = index % SUBGROUP_SIZE;
    let col = wg.y;
    let row0 = wg.x * ROWS;

    var partial: array<$ACC, $ROWS>;
    for (var r = 0u; r < ROWS; r = r + 1u) {
        partial[r] = $ACC(0);
    }

    let k_tiles = (params.k + TILE_K - 1u) / TILE_K;
    for (var kt = 0u; kt < k_tiles; kt = kt + 1u) {
        for (var v = 0u; v < VEC; v = v + 1u) {
            let k = kt * TILE_K + group * SLICE_K + lane * VEC + v;
            if (k < params.k) {
                let x = load_b(col * params.k + k);
                for (var r = 0u; r < ROWS; r = r + 1u) {
                    let row = row0 + r;
                    if (row < params.m) {
                        partial[r] = partial[r] + load_a(row * params.k + k) * x;
                    }
                }
            }
        }
    }

    for (var r = 0u; r < ROWS; r = r + 1u) {
        let sum = subgroup_sum(partial[r]);
        if (lane == 0u) {
            staging[r * GROUPS + group] = sum;
        }
    }

    workgroupBarrier();

    for (var r = group; r < ROWS; r = r + GROUPS) {
        var value = $ACC(0);
        if (lane < GROUPS) {
            value = staging[r * GROUPS + lane];
        }
        let sum = subgroup_sum(value);
        let row = row0 + r;
        if (lane == 0u && row < params.m) {
            store_c(row * params.n + col, sum);
        }
    }
}
"#;

/// Complete shader source
pub fn wgsl_source(params: WorkgroupParams, kinds: OperandKinds) -> String {
    let body = wgsl::instantiate(
        TEMPLATE,
        &[
            ("SUBGROUP_SIZE", params.subgroup_size.to_string()),
            ("GROUPS", params.groups.to_string()),
            ("ROWS", params.rows.to_string()),
            ("VEC", params.vector_width.to_string()),
            ("SLICE_K", params.slice_k().to_string()),
            ("TILE_K", params.tile().k.to_string()),
            ("STAGING_LEN", params.staging_len().to_string()),
            ("THREADS", params.threads().to_string()),
            ("SUBGROUP_SUM", wgsl::subgroup_sum_fn(kinds.c)),
            ("ACC", wgsl::scalar_type(kinds.c).to_string()),
        ],
    );
    wgsl::prelude(kinds) + &body
}

/// Execute the two-level schedule on the host
///
/// The loop over subgroups in the first phase completes before the second
/// phase starts, which is what the workgroup barrier guarantees on device.
pub fn emulate<Acc: Accumulator>(
    problem: &ProblemProperties,
    params: WorkgroupParams,
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut Output<'_>,
) {
    let ProblemProperties { total, outer, .. } = *problem;
    let sub = params.subgroup();

    for wg_m in 0..outer.m {
        for col in 0..outer.n {
            let row0 = wg_m * params.rows;
            let mut staging = vec![Acc::zero(); params.staging_len()];

            for group in 0..params.groups {
                let slice_base = group * params.slice_k();
                let partials = accumulate_rows::<Acc>(problem, sub, slice_base, row0, col, a, b);
                for (r, partial) in partials.into_iter().enumerate() {
                    staging[r * params.groups + group] = partial.reduce_to_lane0();
                }
            }

            // workgroupBarrier()

            for group in 0..params.groups {
                for r in (group..params.rows).step_by(params.groups) {
                    let staged = Subgroup::from_fn(params.subgroup_size, |lane| {
                        if lane < params.groups {
                            staging[r * params.groups + lane]
                        } else {
                            Acc::zero()
                        }
                    });
                    let sum = staged.reduce_to_lane0();
                    let row = row0 + r;
                    if row < total.m {
                        c.set(row, col, sum);
                    }
                }
            }
        }
    }
}
