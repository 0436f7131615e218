//! Element kinds and accumulator arithmetic
//!
//! Buffers are plain little-endian byte vectors; [`ElementKind`] says how to
//! read them. Reductions never run in the input kind: every product is
//! widened to an [`Accumulator`] (`i32` or `f32`) first.

use std::fmt;
use std::str::FromStr;

use half::f16;

/// Numeric kind of a buffer element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Signed 8-bit integer
    Int8,
    /// Signed 16-bit integer
    Int16,
    /// Signed 32-bit integer
    Int32,
    /// IEEE half precision
    Float16,
    /// IEEE single precision
    Float32,
}

impl ElementKind {
    /// All kinds, narrowest first within each class
    pub const ALL: [ElementKind; 5] = [
        ElementKind::Int8,
        ElementKind::Int16,
        ElementKind::Int32,
        ElementKind::Float16,
        ElementKind::Float32,
    ];

    /// Storage width of one element in bytes
    pub const fn byte_width(self) -> usize {
        match self {
            ElementKind::Int8 => 1,
            ElementKind::Int16 | ElementKind::Float16 => 2,
            ElementKind::Int32 | ElementKind::Float32 => 4,
        }
    }

    /// Bytes needed to store `count` elements
    pub const fn storage_bytes(self, count: usize) -> usize {
        self.byte_width() * count
    }

    /// Short name used in kernel names and config values
    pub const fn name(self) -> &'static str {
        match self {
            ElementKind::Int8 => "i8",
            ElementKind::Int16 => "i16",
            ElementKind::Int32 => "i32",
            ElementKind::Float16 => "f16",
            ElementKind::Float32 => "f32",
        }
    }

    /// Whether the kind is a floating-point format
    pub const fn is_float(self) -> bool {
        matches!(self, ElementKind::Float16 | ElementKind::Float32)
    }

    /// The accumulator kind products of this kind reduce into
    pub const fn accumulator(self) -> ElementKind {
        if self.is_float() {
            ElementKind::Float32
        } else {
            ElementKind::Int32
        }
    }

    /// Encode a small integer value as one element, appending to `out`
    pub fn push_small_int(self, value: i8, out: &mut Vec<u8>) {
        match self {
            ElementKind::Int8 => out.extend_from_slice(&value.to_le_bytes()),
            ElementKind::Int16 => out.extend_from_slice(&i16::from(value).to_le_bytes()),
            ElementKind::Int32 => out.extend_from_slice(&i32::from(value).to_le_bytes()),
            ElementKind::Float16 => {
                out.extend_from_slice(&f16::from_f32(f32::from(value)).to_le_bytes())
            }
            ElementKind::Float32 => out.extend_from_slice(&f32::from(value).to_le_bytes()),
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ElementKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown element kind '{s}' (expected i8, i16, i32, f16 or f32)"))
    }
}

/// The `W` little-endian bytes of element `index`
#[inline]
fn element_bytes<const W: usize>(bytes: &[u8], index: usize) -> [u8; W] {
    let mut out = [0u8; W];
    out.copy_from_slice(&bytes[index * W..(index + 1) * W]);
    out
}

/// Arithmetic type a reduction runs in
///
/// Implemented for `i32` (integer results) and `f32` (float results).
/// Comparison is bit-for-bit: the generator keeps every sum exactly
/// representable, so there is no tolerance anywhere.
pub trait Accumulator: Copy + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Result kind this accumulator stores as
    const KIND: ElementKind;

    /// Additive identity
    fn zero() -> Self;

    /// Load element `index` of a `kind` buffer, widened to the accumulator
    fn load(kind: ElementKind, bytes: &[u8], index: usize) -> Self;

    /// `self + a * b` in accumulator arithmetic (not fused)
    fn mac(self, a: Self, b: Self) -> Self;

    /// `self + other` in accumulator arithmetic
    fn combine(self, other: Self) -> Self;

    /// Store as element `index` of a result buffer
    fn store(self, bytes: &mut [u8], index: usize);

    /// Exact equality, distinguishing `-0.0` and comparing NaN payloads
    fn bit_eq(self, other: Self) -> bool;
}

impl Accumulator for i32 {
    const KIND: ElementKind = ElementKind::Int32;

    #[inline]
    fn zero() -> Self {
        0
    }

    #[inline]
    fn load(kind: ElementKind, bytes: &[u8], index: usize) -> Self {
        match kind {
            ElementKind::Int8 => i32::from(i8::from_le_bytes(element_bytes::<1>(bytes, index))),
            ElementKind::Int16 => i32::from(i16::from_le_bytes(element_bytes::<2>(bytes, index))),
            ElementKind::Int32 => i32::from_le_bytes(element_bytes::<4>(bytes, index)),
            ElementKind::Float16 => f16::from_le_bytes(element_bytes::<2>(bytes, index)).to_f32() as i32,
            ElementKind::Float32 => f32::from_le_bytes(element_bytes::<4>(bytes, index)) as i32,
        }
    }

    #[inline]
    fn mac(self, a: Self, b: Self) -> Self {
        // Device integer arithmetic wraps; match it instead of panicking in debug builds.
        self.wrapping_add(a.wrapping_mul(b))
    }

    #[inline]
    fn combine(self, other: Self) -> Self {
        self.wrapping_add(other)
    }

    #[inline]
    fn store(self, bytes: &mut [u8], index: usize) {
        bytes[index * 4..(index + 1) * 4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn bit_eq(self, other: Self) -> bool {
        self == other
    }
}

impl Accumulator for f32 {
    const KIND: ElementKind = ElementKind::Float32;

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn load(kind: ElementKind, bytes: &[u8], index: usize) -> Self {
        match kind {
            ElementKind::Int8 => f32::from(i8::from_le_bytes(element_bytes::<1>(bytes, index))),
            ElementKind::Int16 => f32::from(i16::from_le_bytes(element_bytes::<2>(bytes, index))),
            ElementKind::Int32 => i32::from_le_bytes(element_bytes::<4>(bytes, index)) as f32,
            ElementKind::Float16 => f16::from_le_bytes(element_bytes::<2>(bytes, index)).to_f32(),
            ElementKind::Float32 => f32::from_le_bytes(element_bytes::<4>(bytes, index)),
        }
    }

    #[inline]
    fn mac(self, a: Self, b: Self) -> Self {
        self + a * b
    }

    #[inline]
    fn combine(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn store(self, bytes: &mut [u8], index: usize) {
        bytes[index * 4..(index + 1) * 4].copy_from_slice(&self.to_le_bytes());
    }

    #[inline]
    fn bit_eq(self, other: Self) -> bool {
        self.to_bits() == other.to_bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_widths() {
        assert_eq!(ElementKind::Int8.byte_width(), 1);
        assert_eq!(ElementKind::Int16.byte_width(), 2);
        assert_eq!(ElementKind::Float16.byte_width(), 2);
        assert_eq!(ElementKind::Int32.byte_width(), 4);
        assert_eq!(ElementKind::Float32.byte_width(), 4);
        assert_eq!(ElementKind::Float16.storage_bytes(7), 14);
    }

    #[test]
    fn test_accumulator_kind_is_wider() {
        assert_eq!(ElementKind::Int8.accumulator(), ElementKind::Int32);
        assert_eq!(ElementKind::Int16.accumulator(), ElementKind::Int32);
        assert_eq!(ElementKind::Float16.accumulator(), ElementKind::Float32);
        assert_eq!(ElementKind::Float32.accumulator(), ElementKind::Float32);
    }

    #[test]
    fn test_parse_names() {
        for kind in ElementKind::ALL {
            assert_eq!(kind.name().parse::<ElementKind>(), Ok(kind));
        }
        assert_eq!("F16".parse::<ElementKind>(), Ok(ElementKind::Float16));
        assert!("bf16".parse::<ElementKind>().is_err());
    }

    #[test]
    fn test_small_int_encoding_loads_back() {
        for kind in ElementKind::ALL {
            let mut bytes = Vec::new();
            for v in [-2i8, -1, 0, 1, 2] {
                kind.push_small_int(v, &mut bytes);
            }
            assert_eq!(bytes.len(), kind.storage_bytes(5));
            assert_eq!(i32::load(kind, &bytes, 0), -2, "{kind}");
            assert_eq!(i32::load(kind, &bytes, 4), 2, "{kind}");
            assert_eq!(f32::load(kind, &bytes, 1), -1.0, "{kind}");
        }
    }

    #[test]
    fn test_int8_sign_extension() {
        let bytes = [0xFEu8, 0x02];
        assert_eq!(i32::load(ElementKind::Int8, &bytes, 0), -2);
        assert_eq!(i32::load(ElementKind::Int8, &bytes, 1), 2);
    }

    #[test]
    fn test_i32_accumulator_wraps() {
        let acc = i32::MAX.mac(1, 1);
        assert_eq!(acc, i32::MIN);
    }

    #[test]
    fn test_store_then_load() {
        let mut bytes = vec![0u8; 8];
        (-7i32).store(&mut bytes, 1);
        assert_eq!(i32::load(ElementKind::Int32, &bytes, 1), -7);
        2.5f32.store(&mut bytes, 0);
        assert_eq!(f32::load(ElementKind::Float32, &bytes, 0), 2.5);
    }

    #[test]
    fn test_float_bit_eq_distinguishes_signed_zero() {
        assert!(0.0f32.bit_eq(0.0));
        assert!(!0.0f32.bit_eq(-0.0));
    }
}
