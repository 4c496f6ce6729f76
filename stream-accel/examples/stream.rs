//! STREAM bandwidth driver.
//!
//! Runs copy, mul, add, triad and dot repeatedly, times each call, prints
//! bandwidth and checks the final arrays against a host recomputation.
//!
//! Run with: `cargo run --release --example stream -- --arraysize 33554432`

use std::time::Instant;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stream_accel::kernels::dot_bytes_moved;
use stream_accel::{
    format_device_list, list_devices, metrics, BackendPreference, DynamicBackend, StreamConfig,
    StreamElement, StreamEngine, StreamKernel, DEFAULT_ARRAY_SIZE,
};

const START_A: f64 = 0.1;
const START_B: f64 = 0.2;
const START_C: f64 = 0.0;

#[derive(Parser)]
#[command(name = "stream")]
#[command(about = "Device memory bandwidth benchmark")]
#[command(version)]
struct Args {
    /// List available devices and exit
    #[arg(long)]
    list: bool,

    /// Device index
    #[arg(long, default_value = "0")]
    device: usize,

    /// Elements per array (multiple of 1024)
    #[arg(short = 's', long, default_value_t = DEFAULT_ARRAY_SIZE)]
    arraysize: usize,

    /// Timed repetitions of each kernel
    #[arg(short = 'n', long, default_value = "100")]
    numtimes: usize,

    /// Use single precision
    #[arg(long)]
    float: bool,

    /// Backend: auto, cpu or gpu
    #[arg(long, value_enum, default_value = "auto")]
    backend: Backend,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Backend {
    Auto,
    Cpu,
    Gpu,
}

impl From<Backend> for BackendPreference {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Auto => Self::Auto,
            Backend::Cpu => Self::Cpu,
            Backend::Gpu => Self::Gpu,
        }
    }
}

/// Timings for one operation, in seconds.
struct Timings {
    label: &'static str,
    bytes: usize,
    samples: Vec<f64>,
}

impl Timings {
    fn new(label: &'static str, bytes: usize) -> Self {
        Self {
            label,
            bytes,
            samples: Vec::new(),
        }
    }

    fn report(&self) {
        // The first iteration is warm-up
        let timed = self
            .samples
            .get(1..)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.samples.as_slice());
        let min = timed.iter().copied().fold(f64::INFINITY, f64::min);
        let max = timed.iter().copied().fold(0.0, f64::max);
        let avg = timed.iter().sum::<f64>() / timed.len() as f64;
        let mbytes = 1e-6 * self.bytes as f64 / min;
        println!("{:<12}{mbytes:<12.3}{min:<12.5}{max:<12.5}{avg:<12.5}", self.label);
    }
}

fn time<R>(samples: &mut Timings, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let out = f();
    samples.samples.push(start.elapsed().as_secs_f64());
    out
}

fn run<T: StreamElement>(config: &StreamConfig, numtimes: usize) -> anyhow::Result<()> {
    let n = config.array_size;
    let size = std::mem::size_of::<T>();
    println!("Precision: {}", if size == 4 { "float" } else { "double" });
    println!(
        "Array size: {:.1} MB (={:.1} GB)",
        (n * size) as f64 * 1e-6,
        (n * size) as f64 * 1e-9
    );
    println!(
        "Total size: {:.1} MB (={:.1} GB)",
        (3 * n * size) as f64 * 1e-6,
        (3 * n * size) as f64 * 1e-9
    );

    let allocated = metrics::allocated_bytes_total();
    let mut engine = StreamEngine::<T, DynamicBackend>::from_config(config)
        .context("failed to create stream engine")?;
    println!("Using device: {}", engine.device().name);
    println!(
        "Allocated on device: {:.1} MB",
        (metrics::allocated_bytes_total() - allocated) as f64 * 1e-6
    );
    let transferred = metrics::transferred_bytes_total();

    engine.init_arrays(T::narrow(START_A), T::narrow(START_B), T::narrow(START_C))?;

    let mut timings: Vec<Timings> = StreamKernel::ALL
        .iter()
        .map(|k| Timings::new(k.name(), k.bytes_moved::<T>(n)))
        .collect();
    let mut dot_timings = Timings::new("dot", dot_bytes_moved::<T>(n));

    let mut sum = T::ZERO;
    for _ in 0..numtimes {
        for (kernel, samples) in StreamKernel::ALL.into_iter().zip(timings.iter_mut()) {
            time(samples, || engine.run(kernel))?;
        }
        sum = time(&mut dot_timings, || engine.dot())?;
    }

    let (mut a, mut b, mut c) = (vec![T::ZERO; n], vec![T::ZERO; n], vec![T::ZERO; n]);
    engine.read_arrays(&mut a, &mut b, &mut c)?;
    check_solution(numtimes, &a, &b, &c, sum)?;
    println!(
        "Host/device copies: {:.1} MB",
        (metrics::transferred_bytes_total() - transferred) as f64 * 1e-6
    );

    println!(
        "{:<12}{:<12}{:<12}{:<12}{:<12}",
        "Function", "MBytes/sec", "Min (sec)", "Max", "Average"
    );
    for samples in timings.iter().chain(std::iter::once(&dot_timings)) {
        samples.report();
    }
    Ok(())
}

/// Recompute the expected values on the host and compare average errors.
fn check_solution<T: StreamElement>(
    numtimes: usize,
    a: &[T],
    b: &[T],
    c: &[T],
    sum: T,
) -> anyhow::Result<()> {
    let k = T::SCALAR;
    let (mut ga, mut gb, mut gc) = (T::narrow(START_A), T::narrow(START_B), T::narrow(START_C));
    for _ in 0..numtimes {
        gc = ga;
        gb = k * gc;
        gc = ga + gb;
        ga = gb + k * gc;
    }
    let (ga, gb, gc) = (ga.widen(), gb.widen(), gc.widen());
    let gold_sum = ga * gb * a.len() as f64;

    let epsilon = 100.0 * 2f64.powi(1 - T::SIGNIFICAND_BITS as i32);
    let avg_err = |xs: &[T], gold: f64| {
        xs.iter().map(|x| (x.widen() - gold).abs()).sum::<f64>() / xs.len() as f64
    };

    let mut failed = false;
    for (name, xs, gold) in [("a", a, ga), ("b", b, gb), ("c", c, gc)] {
        let err = avg_err(xs, gold);
        if err / gold.abs() > epsilon {
            eprintln!("Validation failed on {name}[]. Average error {err}");
            failed = true;
        }
    }
    let sum_err = ((sum.widen() - gold_sum) / gold_sum).abs();
    if sum_err > 1e-8_f64.max(epsilon) {
        eprintln!("Validation failed on sum. Error {sum_err}");
        eprintln!("Sum was {sum} but should be {gold_sum}");
        failed = true;
    }
    if failed {
        bail!("results do not match the host recomputation");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("warn".parse()?)
                .add_directive("stream_accel=info".parse()?),
        )
        .init();

    let args = Args::parse();
    println!("stream-accel");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = StreamConfig::default()
        .with_backend(args.backend.into())
        .with_device_index(args.device)
        .with_array_size(args.arraysize)
        .apply_env();

    if args.list {
        print!("{}", format_device_list(&list_devices(&config)));
        return Ok(());
    }
    if args.numtimes < 2 {
        bail!("numtimes must be at least 2");
    }

    if args.float {
        run::<f32>(&config, args.numtimes)
    } else {
        run::<f64>(&config, args.numtimes)
    }
}
