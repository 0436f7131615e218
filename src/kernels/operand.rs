//! Bounds-checked matrix views used by the emulated kernels
//!
//! Every index a kernel computes goes through [`Operand::get`], which panics
//! on anything outside the logical extent. A variant that forgets to mask
//! the tail of its last tile therefore fails loudly instead of reading the
//! next row's data.

use crate::element::{Accumulator, ElementKind};

/// Read-only row-major matrix over a byte buffer
#[derive(Debug, Clone, Copy)]
pub struct Operand<'a> {
    bytes: &'a [u8],
    kind: ElementKind,
    rows: usize,
    cols: usize,
}

impl<'a> Operand<'a> {
    /// View `bytes` as `rows × cols` elements of `kind`
    ///
    /// # Panics
    ///
    /// If the buffer is shorter than the view.
    pub fn new(bytes: &'a [u8], kind: ElementKind, rows: usize, cols: usize) -> Self {
        assert!(
            bytes.len() >= kind.storage_bytes(rows * cols),
            "{} bytes cannot hold {rows}x{cols} {kind} elements",
            bytes.len()
        );
        Self {
            bytes,
            kind,
            rows,
            cols,
        }
    }

    /// Element `(row, col)` widened to `Acc`
    #[inline]
    pub fn get<Acc: Accumulator>(&self, row: usize, col: usize) -> Acc {
        assert!(
            row < self.rows && col < self.cols,
            "unmasked read at ({row}, {col}) of a {}x{} operand",
            self.rows,
            self.cols
        );
        Acc::load(self.kind, self.bytes, row * self.cols + col)
    }
}

/// Writable row-major result matrix
#[derive(Debug)]
pub struct Output<'a> {
    bytes: &'a mut [u8],
    rows: usize,
    cols: usize,
}

impl<'a> Output<'a> {
    /// View `bytes` as a `rows × cols` result of kind `kind`
    ///
    /// # Panics
    ///
    /// If the buffer is shorter than the view.
    pub fn new(bytes: &'a mut [u8], kind: ElementKind, rows: usize, cols: usize) -> Self {
        assert!(
            bytes.len() >= kind.storage_bytes(rows * cols),
            "{} bytes cannot hold {rows}x{cols} {kind} elements",
            bytes.len()
        );
        Self { bytes, rows, cols }
    }

    /// Store `value` at `(row, col)`
    #[inline]
    pub fn set<Acc: Accumulator>(&mut self, row: usize, col: usize, value: Acc) {
        assert!(
            row < self.rows && col < self.cols,
            "unmasked write at ({row}, {col}) of a {}x{} result",
            self.rows,
            self.cols
        );
        value.store(self.bytes, row * self.cols + col);
    }
}
