//! Integration tests for the STREAM engine on the CPU backend.
//!
//! These cover transfer round trips, the four elementwise kernels, the tiled
//! dot product, and construction-time validation.

use stream_accel::{
    metrics, CpuBackend, DynamicBackend, StreamConfig, StreamElement, StreamEngine, StreamError,
    StreamKernel,
};

/// Relative tolerance comparison for reduction results.
fn close(actual: f64, expected: f64, rel: f64) -> bool {
    (actual - expected).abs() <= rel * expected.abs().max(1.0)
}

fn cpu_engine<T: StreamElement>(n: usize) -> StreamEngine<T> {
    let config = StreamConfig::cpu_only().with_array_size(n);
    StreamEngine::with_backend(CpuBackend::new(Some(4)).unwrap(), &config).unwrap()
}

fn ramp<T: StreamElement>(n: usize, scale: f64) -> Vec<T> {
    (0..n).map(|i| T::narrow(i as f64 * scale)).collect()
}

fn roundtrip<T: StreamElement>(n: usize) {
    let mut engine = cpu_engine::<T>(n);
    let a = ramp::<T>(n, 0.5);
    let b = ramp::<T>(n, -0.25);
    let c = vec![T::narrow(3.0); n];
    engine.write_arrays(&a, &b, &c).unwrap();

    let (mut ra, mut rb, mut rc) = (vec![T::ZERO; n], vec![T::ZERO; n], vec![T::ZERO; n]);
    engine.read_arrays(&mut ra, &mut rb, &mut rc).unwrap();
    assert_eq!(ra, a);
    assert_eq!(rb, b);
    assert_eq!(rc, c);
}

#[test]
fn test_write_read_roundtrip_f32() {
    roundtrip::<f32>(1024);
    roundtrip::<f32>(1024 * 3);
}

#[test]
fn test_write_read_roundtrip_f64() {
    roundtrip::<f64>(1024 * 5);
}

#[test]
fn test_copy_leaves_inputs() {
    let n = 4096;
    let mut engine = cpu_engine::<f64>(n);
    let a = ramp::<f64>(n, 1.0);
    let b = ramp::<f64>(n, 2.0);
    let c = vec![-1.0; n];
    engine.write_arrays(&a, &b, &c).unwrap();

    engine.copy().unwrap();

    let (ra, rb, rc) = engine.to_host().unwrap();
    assert_eq!(ra, a);
    assert_eq!(rb, b);
    assert_eq!(rc, a);
}

#[test]
fn test_triad_values() {
    let n = 2048;
    let mut engine = cpu_engine::<f32>(n);
    let b = ramp::<f32>(n, 0.01);
    let c = ramp::<f32>(n, 0.02);
    engine.write_arrays(&vec![0.0; n], &b, &c).unwrap();

    engine.triad().unwrap();

    let (a, rb, rc) = engine.to_host().unwrap();
    assert_eq!(rb, b);
    assert_eq!(rc, c);
    for i in 0..n {
        let expected = b[i] + 0.3 * c[i];
        assert!((a[i] - expected).abs() <= 1e-5 * expected.abs().max(1.0), "index {i}");
    }
}

#[test]
fn test_run_dispatches_each_kernel() {
    let n = 1024;
    let mut engine = cpu_engine::<f64>(n);
    engine.init_arrays(1.0, 2.0, 3.0).unwrap();

    engine.run(StreamKernel::Add).unwrap();
    let (_, _, c) = engine.to_host().unwrap();
    assert!(c.iter().all(|&x| x == 3.0));

    engine.run(StreamKernel::Mul).unwrap();
    let (_, b, _) = engine.to_host().unwrap();
    assert!(b.iter().all(|&x| (x - 0.9).abs() < 1e-12));
}

#[test]
fn test_dot_of_ones_is_exact() {
    let n = 1024 * 64;
    let mut engine = cpu_engine::<f32>(n);
    engine.init_arrays(1.0, 1.0, 0.0).unwrap();
    assert_eq!(engine.dot().unwrap(), n as f32);

    let n = 1024 * 200;
    let mut engine = cpu_engine::<f64>(n);
    let ones = vec![1.0; n];
    engine.write_arrays(&ones, &ones, &ones).unwrap();
    assert_eq!(engine.dot().unwrap(), n as f64);
}

#[test]
fn test_dot_is_permutation_invariant() {
    let n = 1024 * 8;
    let a = ramp::<f64>(n, 1e-3);
    let b: Vec<f64> = (0..n).map(|i| ((i % 17) as f64) - 8.0).collect();

    // 7 is coprime to n, so i -> 7i mod n is a permutation
    let perm: Vec<usize> = (0..n).map(|i| (i * 7) % n).collect();
    let pa: Vec<f64> = perm.iter().map(|&j| a[j]).collect();
    let pb: Vec<f64> = perm.iter().map(|&j| b[j]).collect();

    let mut engine = cpu_engine::<f64>(n);
    engine.write_arrays(&a, &b, &vec![0.0; n]).unwrap();
    let original = engine.dot().unwrap();
    engine.write_arrays(&pa, &pb, &vec![0.0; n]).unwrap();
    let permuted = engine.dot().unwrap();

    let host: f64 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
    assert!(close(original, host, 1e-10));
    assert!(close(permuted, original, 1e-10));
}

#[test]
fn test_dot_f32_matches_host() {
    let n = 1024 * 16;
    let a = ramp::<f32>(n, 1e-4);
    let b = vec![0.5f32; n];
    let mut engine = cpu_engine::<f32>(n);
    engine.write_arrays(&a, &b, &vec![0.0; n]).unwrap();

    let host: f64 = a.iter().zip(&b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum();
    assert!(close(f64::from(engine.dot().unwrap()), host, 1e-5));
}

#[test]
fn test_reference_scenario() {
    let n = 1024 * 64;
    let mut engine = cpu_engine::<f64>(n);
    engine
        .write_arrays(&vec![2.0; n], &vec![3.0; n], &vec![5.0; n])
        .unwrap();

    engine.add().unwrap();
    let (_, _, c) = engine.to_host().unwrap();
    assert!(c.iter().all(|&x| x == 7.0));

    assert_eq!(engine.dot().unwrap(), 6.0 * n as f64);

    engine
        .write_arrays(&vec![2.0; n], &vec![3.0; n], &vec![5.0; n])
        .unwrap();
    engine.mul().unwrap();
    let (_, b, _) = engine.to_host().unwrap();
    assert!(b.iter().all(|&x| x == 1.5));
}

#[test]
fn test_reference_scenario_f32() {
    let n = 1024 * 64;
    let mut engine = cpu_engine::<f32>(n);
    engine.init_arrays(2.0, 3.0, 5.0).unwrap();
    engine.add().unwrap();
    let (_, _, c) = engine.to_host().unwrap();
    assert!(c.iter().all(|&x| x == 7.0));
    assert_eq!(engine.dot().unwrap(), 6.0 * n as f32);

    engine.init_arrays(2.0, 3.0, 5.0).unwrap();
    engine.mul().unwrap();
    let (_, b, _) = engine.to_host().unwrap();
    assert!(b.iter().all(|&x| x == 1.5));
}

#[test]
fn test_bad_size_allocates_nothing() {
    let backend = CpuBackend::new(Some(1)).unwrap();
    let config = StreamConfig::cpu_only().with_array_size(1000);

    let result = StreamEngine::<f32, _>::with_backend(backend.clone(), &config);
    match result {
        Err(StreamError::Configuration(msg)) => assert!(msg.contains("1024"), "{msg}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert_eq!(backend.allocation_count(), 0);

    assert!(matches!(
        StreamEngine::<f64>::new(1000, 0),
        Err(StreamError::Configuration(_))
    ));
}

#[test]
fn test_construction_allocates_three_arrays() {
    let backend = CpuBackend::new(Some(1)).unwrap();
    let config = StreamConfig::cpu_only().with_array_size(1024);
    let before = metrics::allocated_bytes_total();
    let engine = StreamEngine::<f32, _>::with_backend(backend.clone(), &config).unwrap();
    assert_eq!(backend.allocation_count(), 3);
    assert!(metrics::allocated_bytes_total() - before >= (3 * 1024 * 4) as u64);
    assert_eq!(engine.array_size(), 1024);
    assert_eq!(engine.device().index, 0);
}

#[test]
fn test_length_mismatch_is_transfer_error() {
    let mut engine = cpu_engine::<f64>(1024);
    let good = vec![0.0; 1024];
    let short = vec![0.0; 1000];
    assert!(matches!(
        engine.write_arrays(&good, &short, &good),
        Err(StreamError::Transfer(_))
    ));

    let mut out_short = vec![0.0; 1000];
    let (mut x, mut y) = (vec![0.0; 1024], vec![0.0; 1024]);
    assert!(matches!(
        engine.read_arrays(&mut x, &mut y, &mut out_short),
        Err(StreamError::Transfer(_))
    ));
}

#[test]
fn test_rejected_write_leaves_arrays() {
    let n = 1024;
    let mut engine = cpu_engine::<f32>(n);
    engine.init_arrays(1.0, 2.0, 3.0).unwrap();
    let _ = engine.write_arrays(&vec![9.0; n], &vec![9.0; n], &vec![9.0; 5]);

    let (a, b, c) = engine.to_host().unwrap();
    assert!(a.iter().all(|&x| x == 1.0));
    assert!(b.iter().all(|&x| x == 2.0));
    assert!(c.iter().all(|&x| x == 3.0));
}

#[test]
fn test_transfers_are_counted() {
    let n = 2048;
    let mut engine = cpu_engine::<f64>(n);
    let before = metrics::transferred_bytes_total();
    engine
        .write_arrays(&vec![1.0; n], &vec![1.0; n], &vec![1.0; n])
        .unwrap();
    let after = metrics::transferred_bytes_total();
    assert!(after - before >= (3 * n * 8) as u64);
}

#[test]
fn test_from_config_json() {
    let json = r#"{ "array_size": 4096, "backend": "cpu", "tile_count": 16 }"#;
    let config: StreamConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.device_index, 0);

    let mut engine = StreamEngine::<f64, DynamicBackend>::from_config(&config).unwrap();
    assert_eq!(engine.tile_geometry().tile_count(), 16);
    engine.init_arrays(0.5, 4.0, 0.0).unwrap();
    assert_eq!(engine.dot().unwrap(), 2.0 * 4096.0);

    let back = serde_json::to_string(&config).unwrap();
    let again: StreamConfig = serde_json::from_str(&back).unwrap();
    assert_eq!(again, config);
}

#[test]
fn test_from_config_rejects_oversized_tile_count() {
    let config = StreamConfig::cpu_only()
        .with_array_size(1024)
        .with_tile_count(usize::MAX / 1024 + 1);
    assert!(matches!(
        StreamEngine::<f64, DynamicBackend>::from_config(&config),
        Err(StreamError::Configuration(_))
    ));
}

#[test]
fn test_from_config_rejects_bad_device() {
    let config = StreamConfig::cpu_only()
        .with_array_size(1024)
        .with_device_index(9);
    assert!(matches!(
        StreamEngine::<f32, DynamicBackend>::from_config(&config),
        Err(StreamError::Configuration(_))
    ));
}
