use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sfe::addr_gen::{eval_linear, LinearAddrGen};
use sfe::affine::AffinePattern;
use sfe::data_move::DataMoveCompiler;
use sfe::id::DynStreamId;
use sfe::lifecycle::{LifecycleManager, StreamDecl, StreamRole};
use sfe::options::{EngineOptions, OverflowPolicy};
use sfe::pum_command::ComputeOp;
use sfe::slicer::ElementSlicer;
use sfe::topology::PumHwConfig;
use sfe::value::invariant_params;
use std::rc::Rc;

// Hot paths of the engine: address evaluation, slicing, element lifecycles
// and PUM compilation.

/// Linear patterns by nesting depth: (name, params).
fn linear_scenarios() -> [(&'static str, Vec<u64>); 3] {
    [
        ("1d", vec![8, 4096, 0x10_0000]),
        ("2d", vec![8, 64, 1024, 4096, 0x10_0000]),
        ("3d", vec![8, 16, 256, 256, 8192, 4096, 0x10_0000]),
    ]
}

// ── Address generation ──────────────────────────────────────────────────────

fn bench_addr_gen(c: &mut Criterion) {
    let mut group = c.benchmark_group("addr_gen/eval_linear");
    for (name, params) in linear_scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), &params, |b, params| {
            b.iter(|| {
                let mut acc = 0u64;
                for idx in 0..4096 {
                    acc ^= eval_linear(black_box(idx), params);
                }
                acc
            });
        });
    }
    group.finish();
}

// ── Slicing ─────────────────────────────────────────────────────────────────

fn bench_slicer(c: &mut Criterion) {
    let mut group = c.benchmark_group("slicer/next_slice");
    for coalesce in [true, false] {
        let name = if coalesce { "coalesced" } else { "per_element" };
        group.bench_function(name, |b| {
            b.iter_batched(
                || {
                    ElementSlicer::new(
                        DynStreamId::new(0, 1, 1).into(),
                        invariant_params(&[8, 4096, 0x10_0000]),
                        Rc::new(LinearAddrGen),
                        8,
                        Some(4096),
                        64,
                        coalesce,
                    )
                },
                |mut slicer| {
                    for _ in 0..512 {
                        black_box(slicer.next_slice());
                    }
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// ── Element lifecycle ───────────────────────────────────────────────────────

fn bench_lifecycle(c: &mut Criterion) {
    let options = EngineOptions {
        overflow_policy: OverflowPolicy::Report,
        ..EngineOptions::default()
    };
    let line: Vec<u8> = (0..8u64).flat_map(|w| w.to_le_bytes()).collect();

    let mut group = c.benchmark_group("lifecycle/load_stream");
    group.bench_function("256_elements", |b| {
        b.iter_batched(
            || LifecycleManager::new(options.clone()),
            |mut m| {
                let s = m.configure(StreamDecl::linear(1, StreamRole::Load, 8, &[8, 0x1000]).with_total_trip(256));
                for _ in 0..256 {
                    let e = m.allocate_element(s).unwrap();
                    m.mark_addr_ready(e).unwrap();
                    for access in m.issue(e).unwrap() {
                        m.handle_response(access, &line);
                    }
                    m.step(s).unwrap();
                    m.release_stepped(s).unwrap();
                }
                m.end_stream(s).unwrap()
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

// ── PUM compilation ─────────────────────────────────────────────────────────

fn bench_pum_compile(c: &mut Criterion) {
    let compiler = DataMoveCompiler::new(PumHwConfig::default(), vec![256, 256], vec![16, 16]).unwrap();

    let mut group = c.benchmark_group("pum/compile");
    for shift in [1i64, 17, 128] {
        let src = AffinePattern::construct_sub_region(compiler.array_sizes(), &[0, 0], &[128, 128]);
        let dst = AffinePattern::construct_sub_region(compiler.array_sizes(), &[shift, 1], &[128, 128]);
        group.bench_with_input(BenchmarkId::new("shift", shift), &(src, dst), |b, (src, dst)| {
            b.iter(|| compiler.compile(black_box(src), black_box(dst)).unwrap());
        });
    }
    let region = AffinePattern::construct_sub_region(compiler.array_sizes(), &[8, 8], &[200, 200]);
    group.bench_function("compute", |b| {
        b.iter(|| compiler.compile_compute(ComputeOp::Add, black_box(&region), false).unwrap());
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_addr_gen,
    bench_slicer,
    bench_lifecycle,
    bench_pum_compile
);
criterion_main!(benches);
