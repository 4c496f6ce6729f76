//! Benchmarks for the STREAM kernels and the tiled dot product.
//!
//! Throughput is reported in bytes so criterion prints memory bandwidth.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stream_accel::kernels::dot_bytes_moved;
use stream_accel::{CpuBackend, StreamConfig, StreamEngine, StreamKernel};

const SIZES: [usize; 3] = [1 << 16, 1 << 20, 1 << 23];

fn engine(n: usize) -> StreamEngine<f64> {
    let config = StreamConfig::cpu_only().with_array_size(n);
    let backend = CpuBackend::new(None).expect("cpu backend");
    let mut engine = StreamEngine::with_backend(backend, &config).expect("engine");
    engine.init_arrays(0.1, 0.2, 0.0).expect("init");
    engine
}

fn bench_kernels(c: &mut Criterion) {
    for kernel in StreamKernel::ALL {
        let mut group = c.benchmark_group(kernel.name());

        for &size in &SIZES {
            let mut engine = engine(size);
            group.throughput(Throughput::Bytes(kernel.bytes_moved::<f64>(size) as u64));
            group.bench_with_input(BenchmarkId::new("f64", size), &size, |bench, _| {
                bench.iter(|| engine.run(black_box(kernel)).expect("kernel"));
            });
        }

        group.finish();
    }
}

fn bench_dot(c: &mut Criterion) {
    let mut group = c.benchmark_group("dot");

    for &size in &SIZES {
        let engine = engine(size);
        group.throughput(Throughput::Bytes(dot_bytes_moved::<f64>(size) as u64));
        group.bench_with_input(BenchmarkId::new("f64", size), &size, |bench, _| {
            bench.iter(|| black_box(engine.dot().expect("dot")));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_kernels, bench_dot);
criterion_main!(benches);
