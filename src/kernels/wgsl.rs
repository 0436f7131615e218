//! WGSL building blocks shared by the kernel families
//!
//! All operand buffers are bound as `array<u32>`. Narrow kinds are unpacked
//! from their 32-bit words on load, so one binding layout serves every
//! element kind.

use crate::element::ElementKind;
use crate::shape::OperandKinds;

/// WGSL scalar type of an accumulator kind
pub fn scalar_type(kind: ElementKind) -> &'static str {
    if kind.is_float() {
        "f32"
    } else {
        "i32"
    }
}

/// A `fn {name}(index: u32) -> {acc}` reading element `index` of `buffer`
pub fn load_fn(name: &str, buffer: &str, kind: ElementKind, acc: ElementKind) -> String {
    let acc_ty = scalar_type(acc);
    let value = match kind {
        ElementKind::Int8 => format!(
            "extractBits(bitcast<i32>({buffer}[index / 4u]), (index % 4u) * 8u, 8u)"
        ),
        ElementKind::Int16 => format!(
            "extractBits(bitcast<i32>({buffer}[index / 2u]), (index % 2u) * 16u, 16u)"
        ),
        ElementKind::Int32 => format!("bitcast<i32>({buffer}[index])"),
        ElementKind::Float16 => format!(
            "select(unpack2x16float({buffer}[index / 2u]).x, \
             unpack2x16float({buffer}[index / 2u]).y, (index % 2u) == 1u)"
        ),
        ElementKind::Float32 => format!("bitcast<f32>({buffer}[index])"),
    };
    format!("fn {name}(index: u32) -> {acc_ty} {{\n    return {acc_ty}({value});\n}}\n")
}

/// Bindings, the uniform block and the typed load/store helpers
pub fn prelude(kinds: OperandKinds) -> String {
    let acc = kinds.c;
    let acc_ty = scalar_type(acc);
    let mut src = String::from(
        "struct Params {\n    m: u32,\n    n: u32,\n    k: u32,\n    pad: u32,\n}\n\n\
         @group(0) @binding(0) var<storage, read> a: array<u32>;\n\
         @group(0) @binding(1) var<storage, read> b: array<u32>;\n\
         @group(0) @binding(2) var<storage, read_write> c: array<u32>;\n\
         @group(0) @binding(3) var<uniform> params: Params;\n\n",
    );
    src.push_str(&load_fn("load_a", "a", kinds.a, acc));
    src.push('\n');
    src.push_str(&load_fn("load_b", "b", kinds.b, acc));
    src.push('\n');
    src.push_str(&format!(
        "fn store_c(index: u32, value: {acc_ty}) {{\n    c[index] = bitcast<u32>(value);\n}}\n\n"
    ));
    src
}

/// `subgroup_sum`: shuffle-down halving from `SUBGROUP_SIZE / 2` to 1
pub fn subgroup_sum_fn(acc: ElementKind) -> String {
    let acc_ty = scalar_type(acc);
    format!(
        "fn subgroup_sum(value: {acc_ty}) -> {acc_ty} {{\n\
         \x20   var sum = value;\n\
         \x20   for (var offset = SUBGROUP_SIZE / 2u; offset > 0u; offset = offset / 2u) {{\n\
         \x20       sum = sum + subgroupShuffleDown(sum, offset);\n\
         \x20   }}\n\
         \x20   return sum;\n\
         }}\n\n"
    )
}

/// Replace every `$NAME` placeholder of `template`
///
/// Longer names are substituted first so `$TILE_K` never clobbers a
/// `$TILE_KS`-style prefix match.
pub fn instantiate(template: &str, substitutions: &[(&str, String)]) -> String {
    let mut ordered: Vec<&(&str, String)> = substitutions.iter().collect();
    ordered.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    ordered
        .into_iter()
        .fold(template.to_string(), |src, (name, value)| {
            src.replace(&format!("${name}"), value)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int8_load_unpacks_bytes() {
        let src = load_fn("load_a", "a", ElementKind::Int8, ElementKind::Int32);
        assert!(src.contains("fn load_a(index: u32) -> i32"));
        assert!(src.contains("extractBits(bitcast<i32>(a[index / 4u]), (index % 4u) * 8u, 8u)"));
    }

    #[test]
    fn test_half_load_widens_to_f32() {
        let src = load_fn("load_b", "b", ElementKind::Float16, ElementKind::Float32);
        assert!(src.contains("-> f32"));
        assert!(src.contains("unpack2x16float(b[index / 2u])"));
    }

    #[test]
    fn test_prelude_binds_four_resources() {
        let src = prelude(OperandKinds::widening(ElementKind::Int16));
        for binding in 0..4 {
            assert!(src.contains(&format!("@binding({binding})")), "binding {binding}");
        }
        assert!(src.contains("fn store_c(index: u32, value: i32)"));
    }

    #[test]
    fn test_instantiate_prefers_longest_name() {
        let out = instantiate(
            "$TILE_K $TILE_KS",
            &[("TILE_K", "4".to_string()), ("TILE_KS", "8".to_string())],
        );
        assert_eq!(out, "4 8");
    }

    #[test]
    fn test_no_placeholder_left_in_subgroup_sum() {
        let src = subgroup_sum_fn(ElementKind::Float32);
        assert!(src.contains("subgroupShuffleDown(sum, offset)"));
        assert!(!src.contains('$'));
    }
}
