//! Subgroup-cooperative kernel
//!
//! One subgroup per workgroup owns `rows` consecutive output rows of a
//! single column. Lane `l` loads the `vector_width` elements
//! `[kt·S·V + l·V, kt·S·V + (l+1)·V)` of every K tile, keeps one partial sum
//! per row, and the subgroup folds the partials with shuffle-down halving.
//! Only lane 0 writes.

use super::lanes::Subgroup;
use super::operand::{Operand, Output};
use super::wgsl;
use crate::element::Accumulator;
use crate::shape::{OperandKinds, ProblemProperties, Shape3D};

/// WGSL entry point
pub const ENTRY_POINT: &str = "subgroup_main";

/// Shape parameters of a subgroup kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubgroupParams {
    /// Lanes per subgroup
    pub subgroup_size: usize,
    /// Output rows owned by the subgroup
    pub rows: usize,
    /// Consecutive K elements each lane loads per K tile
    pub vector_width: usize,
}

impl SubgroupParams {
    /// Tile covered by one workgroup
    pub const fn tile(&self) -> Shape3D {
        Shape3D::new(self.rows, 1, self.subgroup_size * self.vector_width)
    }
}

const TEMPLATE: &str = r#"
const SUBGROUP_SIZE: u32 = $SUBGROUP_SIZEu;
const ROWS: u32 = $ROWSu;
const VEC: u32 = $VECu;
const TILE_K: u32 = $TILE_Ku;

$SUBGROUP_SUM
@compute @workgroup_size($SUBGROUP_SIZE, 1, 1)
fn subgroup_main(
    @builtin(workgroup_id) wg: vec3<u32>,
    @builtin(local_invocation_index) lane: u32,
) {
    let col = wg.y;
    let row0 = wg.x * ROWS;

    var partial: array<$ACC, $ROWS>;
    for (var r = 0u; r < ROWS; r = r + 1u) {
        partial[r] = $ACC(0);
    }

    let k_tiles = (params.k + TILE_K - 1u) / TILE_K;
    for (var kt = 0u; kt < k_tiles; kt = kt + 1u) {
        for (var v = 0u; v < VEC; v = v + 1u) {
            let k = kt * TILE_K + lane * VEC + v;
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
        let row = row0 + r;
        if (lane == 0u && row < params.m) {
            store_c(row * params.n + col, sum);
        }
    }
}
"#;

/// Complete shader source
pub fn wgsl_source(params: SubgroupParams, kinds: OperandKinds) -> String {
    let body = wgsl::instantiate(
        TEMPLATE,
        &[
            ("SUBGROUP_SIZE", params.subgroup_size.to_string()),
            ("ROWS", params.rows.to_string()),
            ("VEC", params.vector_width.to_string()),
            ("TILE_K", params.tile().k.to_string()),
            ("SUBGROUP_SUM", wgsl::subgroup_sum_fn(kinds.c)),
            ("ACC", wgsl::scalar_type(kinds.c).to_string()),
        ],
    );
    wgsl::prelude(kinds) + &body
}

/// Per-row partial sums of one subgroup over the K slice starting at
/// `slice_base` of every K tile
///
/// Shared with the two-level kernel, whose subgroups run exactly this loop
/// over their own slice before staging.
pub(crate) fn accumulate_rows<Acc: Accumulator>(
    problem: &ProblemProperties,
    params: SubgroupParams,
    slice_base: usize,
    row0: usize,
    col: usize,
    a: &Operand<'_>,
    b: &Operand<'_>,
) -> Vec<Subgroup<Acc>> {
    let ProblemProperties {
        total, tile, outer, ..
    } = *problem;
    let mut partials: Vec<Subgroup<Acc>> = (0..params.rows)
        .map(|_| Subgroup::splat(params.subgroup_size, Acc::zero()))
        .collect();

    for lane in 0..params.subgroup_size {
        for kt in 0..outer.k {
            for v in 0..params.vector_width {
                let k = kt * tile.k + slice_base + lane * params.vector_width + v;
                if k >= total.k {
                    continue;
                }
                let x: Acc = b.get(col, k);
                for (r, partial) in partials.iter_mut().enumerate() {
                    let row = row0 + r;
                    if row < total.m {
                        let acc = partial.lane_mut(lane);
                        *acc = acc.mac(a.get(row, k), x);
                    }
                }
            }
        }
    }
    partials
}

/// Execute the subgroup schedule on the host
pub fn emulate<Acc: Accumulator>(
    problem: &ProblemProperties,
    params: SubgroupParams,
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut Output<'_>,
) {
    let ProblemProperties { total, outer, .. } = *problem;

    for wg_m in 0..outer.m {
        for col in 0..outer.n {
            let row0 = wg_m * params.rows;
            let partials = accumulate_rows::<Acc>(problem, params, 0, row0, col, a, b);
            for (r, partial) in partials.into_iter().enumerate() {
                let sum = partial.reduce_to_lane0();
                let row = row0 + r;
                if row < total.m {
                    c.set(row, col, sum);
                }
            }
        }
    }
}
