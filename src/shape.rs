//! Problem shapes and the outer tile grid

use std::fmt;

use crate::element::ElementKind;

/// An (M, N, K) triple: a total extent, a tile extent, or a tile count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Shape3D {
    /// Rows of A and C
    pub m: usize,
    /// Columns of C (rows of the transposed right operand)
    pub n: usize,
    /// Reduction depth
    pub k: usize,
}

impl Shape3D {
    /// Create a shape
    pub const fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }

    /// Componentwise ceiling division
    ///
    /// # Panics
    ///
    /// If any component of `tile` is zero.
    pub fn div_ceil(self, tile: Shape3D) -> Shape3D {
        assert!(
            tile.m > 0 && tile.n > 0 && tile.k > 0,
            "tile extents must be positive, got {tile}"
        );
        Shape3D {
            m: self.m.div_ceil(tile.m),
            n: self.n.div_ceil(tile.n),
            k: self.k.div_ceil(tile.k),
        }
    }

    /// Componentwise product
    pub const fn scale(self, tile: Shape3D) -> Shape3D {
        Shape3D {
            m: self.m * tile.m,
            n: self.n * tile.n,
            k: self.k * tile.k,
        }
    }

    /// Multiply-accumulate count of a full product of this shape
    pub const fn macs(self) -> u64 {
        self.m as u64 * self.n as u64 * self.k as u64
    }
}

impl fmt::Display for Shape3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.m, self.n, self.k)
    }
}

/// Element kinds of the three operands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandKinds {
    /// Left matrix A (M×K)
    pub a: ElementKind,
    /// Right operand B (N×K)
    pub b: ElementKind,
    /// Result C (M×N)
    pub c: ElementKind,
}

impl OperandKinds {
    /// Kinds for a product whose inputs share `input` and accumulate into
    /// its accumulator kind
    pub const fn widening(input: ElementKind) -> Self {
        Self {
            a: input,
            b: input,
            c: input.accumulator(),
        }
    }
}

impl fmt::Display for OperandKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.a, self.b, self.c)
    }
}

/// Everything a launch needs to know about one problem instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProblemProperties {
    /// Operand kinds
    pub kinds: OperandKinds,
    /// Total problem extent
    pub total: Shape3D,
    /// Extent one workgroup covers
    pub tile: Shape3D,
    /// Tile counts: `ceil(total / tile)`
    pub outer: Shape3D,
}

impl ProblemProperties {
    /// Element count of A (M×K)
    pub const fn a_elements(&self) -> usize {
        self.total.m * self.total.k
    }

    /// Element count of B (N×K)
    pub const fn b_elements(&self) -> usize {
        self.total.n * self.total.k
    }

    /// Element count of C (M×N)
    pub const fn c_elements(&self) -> usize {
        self.total.m * self.total.n
    }

    /// Storage size of A in bytes
    pub const fn a_bytes(&self) -> usize {
        self.kinds.a.storage_bytes(self.a_elements())
    }

    /// Storage size of B in bytes
    pub const fn b_bytes(&self) -> usize {
        self.kinds.b.storage_bytes(self.b_elements())
    }

    /// Storage size of C in bytes
    pub const fn c_bytes(&self) -> usize {
        self.kinds.c.storage_bytes(self.c_elements())
    }
}

impl fmt::Display for ProblemProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "kinds={} total={} tile={} outer={}",
            self.kinds, self.total, self.tile, self.outer
        )
    }
}

/// Build the problem for `total` tiled by `tile`
///
/// # Panics
///
/// If any tile extent is zero.
pub fn compute_problem(kinds: OperandKinds, tile: Shape3D, total: Shape3D) -> ProblemProperties {
    ProblemProperties {
        kinds,
        total,
        tile,
        outer: total.div_ceil(tile),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_naive_matvec_outer_shape() {
        let problem = compute_problem(
            OperandKinds::widening(ElementKind::Float32),
            Shape3D::new(64, 1, 4),
            Shape3D::new(1024, 1, 4096),
        );
        assert_eq!(problem.outer, Shape3D::new(16, 1, 1024));
    }

    #[test]
    fn test_partial_last_tile() {
        let outer = Shape3D::new(100, 3, 4097).div_ceil(Shape3D::new(64, 2, 16));
        assert_eq!(outer, Shape3D::new(2, 2, 257));
    }

    #[test]
    fn test_empty_total_has_no_tiles() {
        let outer = Shape3D::new(0, 0, 0).div_ceil(Shape3D::new(8, 8, 8));
        assert_eq!(outer, Shape3D::default());
    }

    #[test]
    #[should_panic(expected = "tile extents must be positive")]
    fn test_zero_tile_is_fatal() {
        let _ = Shape3D::new(4, 4, 4).div_ceil(Shape3D::new(4, 0, 4));
    }

    #[test]
    fn test_byte_sizes_follow_kinds() {
        let problem = compute_problem(
            OperandKinds::widening(ElementKind::Int8),
            Shape3D::new(4, 1, 8),
            Shape3D::new(10, 2, 30),
        );
        assert_eq!(problem.a_bytes(), 300);
        assert_eq!(problem.b_bytes(), 60);
        assert_eq!(problem.c_bytes(), 80);
    }

    #[test]
    fn test_display() {
        let kinds = OperandKinds::widening(ElementKind::Float16);
        assert_eq!(kinds.to_string(), "f16f16f32");
        assert_eq!(Shape3D::new(1, 2, 3).to_string(), "1x2x3");
    }

    proptest! {
        #[test]
        fn prop_outer_covers_total(
            m in 0usize..100_000, n in 0usize..1_000, k in 0usize..100_000,
            tm in 1usize..512, tn in 1usize..64, tk in 1usize..4096,
        ) {
            let total = Shape3D::new(m, n, k);
            let tile = Shape3D::new(tm, tn, tk);
            let outer = total.div_ceil(tile);
            let covered = outer.scale(tile);

            prop_assert!(covered.m >= m && covered.n >= n && covered.k >= k);
            // One fewer tile would not cover the extent
            prop_assert!(outer.m == 0 || (outer.m - 1) * tm < m);
            prop_assert!(outer.n == 0 || (outer.n - 1) * tn < n);
            prop_assert!(outer.k == 0 || (outer.k - 1) * tk < k);
        }
    }
}
