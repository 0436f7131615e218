//! Naive kernel: one thread per output element
//!
//! Workgroup = TM×TN threads covering one output tile. Each thread walks the
//! whole reduction serially in chunks of TK, skipping k ≥ K.

use super::operand::{Operand, Output};
use super::wgsl;
use crate::element::Accumulator;
use crate::shape::{OperandKinds, ProblemProperties, Shape3D};

/// WGSL entry point
pub const ENTRY_POINT: &str = "naive_main";

const TEMPLATE: &str = r#"
const TILE_M: u32 = $TILE_Mu;
const TILE_N: u32 = $TILE_Nu;
const TILE_K: u32 = $TILE_Ku;

@compute @workgroup_size($TILE_M, $TILE_N, 1)
fn naive_main(
    @builtin(workgroup_id) wg: vec3<u32>,
    @builtin(local_invocation_id) lid: vec3<u32>,
) {
    let row = wg.x * TILE_M + lid.x;
    let col = wg.y * TILE_N + lid.y;
    if (row >= params.m || col >= params.n) {
        return;
    }

    let k_tiles = (params.k + TILE_K - 1u) / TILE_K;
    var acc: $ACC = $ACC(0);
    for (var kt = 0u; kt < k_tiles; kt = kt + 1u) {
        for (var kk = 0u; kk < TILE_K; kk = kk + 1u) {
            let k = kt * TILE_K + kk;
            if (k < params.k) {
                acc = acc + load_a(row * params.k + k) * load_b(col * params.k + k);
            }
        }
    }
    store_c(row * params.n + col, acc);
}
"#;

/// Complete shader source for a naive kernel with tile `tile`
pub fn wgsl_source(tile: Shape3D, kinds: OperandKinds) -> String {
    let body = wgsl::instantiate(
        TEMPLATE,
        &[
            ("TILE_M", tile.m.to_string()),
            ("TILE_N", tile.n.to_string()),
            ("TILE_K", tile.k.to_string()),
            ("ACC", wgsl::scalar_type(kinds.c).to_string()),
        ],
    );
    wgsl::prelude(kinds) + &body
}

/// Execute the naive schedule on the host
pub fn emulate<Acc: Accumulator>(
    problem: &ProblemProperties,
    a: &Operand<'_>,
    b: &Operand<'_>,
    c: &mut Output<'_>,
) {
    let ProblemProperties {
        total, tile, outer, ..
    } = *problem;

    for wg_m in 0..outer.m {
        for wg_n in 0..outer.n {
            // One iteration per thread of the workgroup
            for lx in 0..tile.m {
                for ly in 0..tile.n {
                    let row = wg_m * tile.m + lx;
                    let col = wg_n * tile.n + ly;
                    if row >= total.m || col >= total.n {
                        continue;
                    }

                    let mut acc = Acc::zero();
                    for kt in 0..outer.k {
                        for kk in 0..tile.k {
                            let k = kt * tile.k + kk;
                            if k < total.k {
                                acc = acc.mac(a.get(row, k), b.get(col, k));
                            }
                        }
                    }
                    c.set(row, col, acc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::shape::compute_problem;

    #[test]
    fn test_wgsl_has_entry_point_and_tile() {
        let src = wgsl_source(
            Shape3D::new(64, 1, 4),
            OperandKinds::widening(ElementKind::Int8),
        );
        assert!(src.contains("fn naive_main("));
        assert!(src.contains("@workgroup_size(64, 1, 1)"));
        assert!(src.contains("const TILE_K: u32 = 4u;"));
        assert!(src.contains("var acc: i32 = i32(0);"));
        assert!(!src.contains('$'));
    }

    #[test]
    fn test_emulate_small_matmul() {
        // A = [[1, 2, 3], [4, 5, 6]], B (N×K) = [[1, 0, -1], [2, 2, 2]]
        let a: Vec<u8> = [1f32, 2., 3., 4., 5., 6.]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let b: Vec<u8> = [1f32, 0., -1., 2., 2., 2.]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut c = vec![0u8; 16];

        let problem = compute_problem(
            OperandKinds::widening(ElementKind::Float32),
            Shape3D::new(4, 4, 2),
            Shape3D::new(2, 2, 3),
        );
        emulate::<f32>(
            &problem,
            &Operand::new(&a, ElementKind::Float32, 2, 3),
            &Operand::new(&b, ElementKind::Float32, 2, 3),
            &mut Output::new(&mut c, ElementKind::Float32, 2, 2),
        );

        let result: Vec<f32> = c
            .chunks_exact(4)
            .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        assert_eq!(result, vec![-2.0, 12.0, -2.0, 30.0]);
    }
}
