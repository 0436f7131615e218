//! Host emulation throughput per kernel family
//!
//! Measures how fast the emulator runs each schedule, which bounds how
//! large the checks and property tests can go.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tilebench::kernels::registry;
use tilebench::random::{fill, Lcg};
use tilebench::{ElementKind, Shape3D};

fn bench_emulate_matvec(c: &mut Criterion) {
    let mut group = c.benchmark_group("emulate_matvec");
    let total = Shape3D::new(256, 1, 4096);

    for kernel in registry(Some(32))
        .into_iter()
        .filter(|k| k.kinds.a == ElementKind::Int8)
    {
        let problem = kernel.problem(total);
        let mut rng = Lcg::default();
        let a = fill(problem.kinds.a, problem.a_elements(), &mut rng);
        let b = fill(problem.kinds.b, problem.b_elements(), &mut rng);
        let mut out = vec![0u8; problem.c_bytes()];

        group.throughput(Throughput::Elements(total.macs()));
        group.bench_with_input(BenchmarkId::from_parameter(&kernel.name), &problem, |bench, problem| {
            bench.iter(|| {
                kernel
                    .emulate(black_box(problem), black_box(&a), black_box(&b), &mut out)
                    .unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_emulate_matvec);
criterion_main!(benches);
