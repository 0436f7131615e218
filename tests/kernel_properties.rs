//! Property-based tests: every emulated schedule agrees with the reference
//!
//! Shapes, seeds and subgroup widths are random, so tile boundaries land
//! everywhere; the emulator's bounds-checked views turn any unmasked access
//! into a panic.

use proptest::prelude::*;
use tilebench::backends::sim::SimDevice;
use tilebench::config::{BenchConfig, CheckCoverage};
use tilebench::harness::check;
use tilebench::kernels::{registry, KernelVariant, WIDENING_INPUTS};
use tilebench::random::{fill, Lcg};
use tilebench::{Device, ElementKind, Shape3D};

fn exhaustive(seed: u64) -> BenchConfig {
    BenchConfig {
        coverage: CheckCoverage::Exhaustive,
        seed,
        ..BenchConfig::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_every_variant_matches_reference(
        m in 1usize..40,
        n in 1usize..4,
        k in 1usize..700,
        log_width in 1u32..4,
        seed in any::<u64>(),
    ) {
        let width = 1usize << log_width;
        let mut device = SimDevice::new(width);
        let config = exhaustive(seed);
        for kernel in registry(Some(width)) {
            if let Err(e) = check(&mut device, &kernel, Shape3D::new(m, n, k), &config) {
                prop_assert!(false, "{}: {}", kernel.name, e);
            }
        }
        prop_assert_eq!(device.stats().live(), 0);
    }

    #[test]
    fn prop_workgroup_tile_is_groups_times_slice(
        log_width in 1u32..6,
    ) {
        let width = 1usize << log_width;
        for kernel in registry(Some(width)) {
            if let KernelVariant::Workgroup(p) = kernel.variant {
                prop_assert!(p.groups <= width);
                prop_assert_eq!(kernel.tile().k, p.groups * width * p.vector_width);
                prop_assert_eq!(kernel.workgroup_size()[0] as usize, p.groups * width);
            }
        }
    }

    #[test]
    fn prop_fill_is_bounded_for_every_kind(seed in any::<u64>(), count in 0usize..256) {
        for kind in WIDENING_INPUTS {
            let bytes = fill(kind, count, &mut Lcg::new(seed));
            prop_assert_eq!(bytes.len(), kind.storage_bytes(count));
        }
        // Every int8 draw lies in -2..=2
        let bytes = fill(ElementKind::Int8, count, &mut Lcg::new(seed));
        prop_assert!(bytes.iter().all(|&b| (-2..=2).contains(&(b as i8))));
    }
}
