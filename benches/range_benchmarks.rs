//! Benchmarks for `range()` generation.
//!
//! Compares the native fast path against the arbitrary-precision fallback
//! through the host's own `range` built-in, and measures constant
//! unstreaming.
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- "range/native"
//! ```

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use num_bigint::BigInt;
use shimrt::prelude::*;
use shimrt_host::ReferenceHost;
use std::hint::black_box;

/// Initialize puffin profiler.
#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

/// Call at the end of each benchmark iteration to flush profiling data.
#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

fn range_benchmarks(c: &mut Criterion) {
    setup_profiler();

    let host = ReferenceHost::new();
    let shim = Shim::new(&host);
    shim.initialize().unwrap();

    let mut group = c.benchmark_group("range");
    for len in [16i64, 1_024, 65_536] {
        group.throughput(Throughput::Elements(len as u64));

        group.bench_with_input(BenchmarkId::new("native", len), &len, |b, &len| {
            b.iter(|| {
                let list = range1(&host, black_box(len)).unwrap();
                end_profiling_frame();
                black_box(list.get())
            });
        });

        // Same length, starting just past the machine range.
        let start: BigInt = BigInt::from(i64::MAX) + 1;
        let low = host.own(host.new_long(start.clone()));
        let high = host.own(host.new_long(start + len));
        group.bench_with_input(BenchmarkId::new("fallback", len), &len, |b, _| {
            b.iter(|| {
                let list = shim
                    .range(RangeArgs::StartStop(black_box(low.get()), high.get()))
                    .unwrap();
                end_profiling_frame();
                black_box(list.get())
            });
        });
    }
    group.finish();
}

fn unstream_benchmarks(c: &mut Criterion) {
    setup_profiler();

    let host = ReferenceHost::new();
    let shim = Shim::new(&host);
    shim.initialize().unwrap();

    let items: Vec<_> = (0..256)
        .map(|i| host.own(host.new_int(i).unwrap()))
        .collect();
    let refs: Vec<ObjRef> = items.iter().map(Owned::get).collect();
    let tuple = host.own(host.new_tuple(&refs).unwrap());
    let buffer = host.dumps(tuple.get()).unwrap();

    let mut group = c.benchmark_group("unstream");
    group.throughput(Throughput::Bytes(buffer.len() as u64));
    group.bench_function("int_tuple_256", |b| {
        b.iter(|| {
            let constant = shim.unstream_constant(black_box(&buffer)).unwrap();
            end_profiling_frame();
            black_box(constant.get())
        });
    });
    group.finish();
}

criterion_group!(benches, range_benchmarks, unstream_benchmarks);
criterion_main!(benches);
