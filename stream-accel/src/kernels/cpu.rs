// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! CPU backend.
//!
//! Host memory plays the role of device memory and a dedicated rayon pool
//! plays the role of the device queue. Every call returns only after the pool
//! has finished, so completion semantics match an accelerator backend that
//! synchronises after each launch.
//!
//! ## Performance Characteristics
//!
//! - Elementwise kernels are split across the pool with `par_iter_mut`
//! - The tiled reduction runs one pool task per tile
//! - Upload and download are plain `memcpy`

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::device::{DeviceInfo, DeviceKind};
use crate::error::{DeviceError, DeviceResult};
use crate::kernels::{KernelArgs, KernelInputs, StreamBackend, StreamKernel};
use crate::reduce::{tile, TileGeometry};
use crate::StreamElement;

const HOST_DEVICE_NAME: &str = "Host CPU";

/// Host storage standing in for a device array.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBuffer<T> {
    data: Vec<T>,
}

impl<T> CpuBuffer<T> {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the contents.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

/// CPU backend for stream kernels.
///
/// # Thread Safety
///
/// This backend is `Send + Sync`; clones share the thread pool and the
/// allocation counter.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    pool: Arc<ThreadPool>,
    device: DeviceInfo,
    allocations: Arc<AtomicUsize>,
}

impl CpuBackend {
    /// Create a CPU backend on device 0.
    ///
    /// `threads` of `None` uses rayon's default thread count.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotAvailable`] if the thread pool cannot be built.
    pub fn new(threads: Option<usize>) -> DeviceResult<Self> {
        Self::for_device(0, threads)
    }

    /// Create a CPU backend bound to device `index`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotAvailable`] if `index` is not 0 or the
    /// thread pool cannot be built.
    pub fn for_device(index: usize, threads: Option<usize>) -> DeviceResult<Self> {
        let Some(device) = Self::host_devices().into_iter().find(|d| d.index == index) else {
            return Err(DeviceError::not_available(format!(
                "CPU backend has a single device (index 0), requested index {index}"
            )));
        };

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|i| format!("stream-accel-{i}"))
            .build()
            .map_err(|e| DeviceError::not_available(format!("cpu thread pool: {e}")))?;

        tracing::debug!(threads = pool.current_num_threads(), "built cpu backend pool");

        Ok(Self {
            pool: Arc::new(pool),
            device,
            allocations: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Devices the CPU backend exposes: the host, at index 0.
    #[must_use]
    pub fn host_devices() -> Vec<DeviceInfo> {
        vec![DeviceInfo::new(0, HOST_DEVICE_NAME, DeviceKind::Cpu)]
    }

    /// Worker threads in the pool.
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Number of buffers allocated through this backend.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

fn check_len(what: &str, have: usize, need: usize) -> DeviceResult<()> {
    if have < need {
        return Err(DeviceError::launch(format!(
            "{what} holds {have} elements, dispatch covers {need}"
        )));
    }
    Ok(())
}

impl StreamBackend for CpuBackend {
    type Buffer<T: StreamElement> = CpuBuffer<T>;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        Self::host_devices()
    }

    fn allocate<T: StreamElement>(&self, len: usize) -> DeviceResult<CpuBuffer<T>> {
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| DeviceError::Allocation {
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
            reason: e.to_string(),
        })?;
        data.resize(len, <T as StreamElement>::ZERO);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        Ok(CpuBuffer { data })
    }

    fn upload<T: StreamElement>(&self, dst: &mut CpuBuffer<T>, src: &[T]) -> DeviceResult<()> {
        if dst.len() != src.len() {
            return Err(DeviceError::copy(format!(
                "upload of {} elements into buffer of {}",
                src.len(),
                dst.len()
            )));
        }
        dst.data.copy_from_slice(src);
        Ok(())
    }

    fn download<T: StreamElement>(&self, src: &CpuBuffer<T>, dst: &mut [T]) -> DeviceResult<()> {
        if dst.len() != src.len() {
            return Err(DeviceError::copy(format!(
                "download of buffer of {} elements into {}",
                src.len(),
                dst.len()
            )));
        }
        dst.copy_from_slice(&src.data);
        Ok(())
    }

    fn fill<T: StreamElement>(&self, dst: &mut CpuBuffer<T>, value: T) -> DeviceResult<()> {
        self.pool
            .install(|| dst.data.par_iter_mut().for_each(|x| *x = value));
        Ok(())
    }

    fn launch<T: StreamElement>(
        &self,
        kernel: StreamKernel,
        args: KernelArgs<'_, CpuBuffer<T>>,
    ) -> DeviceResult<()> {
        let len = args.len;
        check_len("output", args.output.len(), len)?;
        let out = &mut args.output.data[..len];

        match args.inputs {
            KernelInputs::Unary(x) => {
                check_len("input", x.len(), len)?;
                let x = &x.data[..len];
                self.pool.install(|| {
                    out.par_iter_mut()
                        .zip(x.par_iter())
                        .for_each(|(o, &x)| *o = kernel.apply(x, <T as StreamElement>::ZERO));
                });
            }
            KernelInputs::Binary(x, y) => {
                check_len("first input", x.len(), len)?;
                check_len("second input", y.len(), len)?;
                let (x, y) = (&x.data[..len], &y.data[..len]);
                self.pool.install(|| {
                    out.par_iter_mut()
                        .zip(x.par_iter().zip(y.par_iter()))
                        .for_each(|(o, (&x, &y))| *o = kernel.apply(x, y));
                });
            }
        }
        Ok(())
    }

    fn launch_tiled_dot<T: StreamElement>(
        &self,
        a: &CpuBuffer<T>,
        b: &CpuBuffer<T>,
        len: usize,
        geometry: TileGeometry,
    ) -> DeviceResult<Vec<T>> {
        check_len("a", a.len(), len)?;
        check_len("b", b.len(), len)?;
        let (a, b) = (&a.data[..len], &b.data[..len]);
        self.pool.install(|| tile::tiled_dot(a, b, geometry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> CpuBackend {
        CpuBackend::new(Some(2)).unwrap()
    }

    fn buffer(backend: &CpuBackend, values: &[f64]) -> CpuBuffer<f64> {
        let mut buf = backend.allocate(values.len()).unwrap();
        backend.upload(&mut buf, values).unwrap();
        buf
    }

    #[test]
    fn test_backend_info() {
        let backend = backend();
        assert_eq!(backend.name(), "cpu");
        assert!(backend.is_available());
        assert_eq!(backend.threads(), 2);
        assert_eq!(backend.device().index, 0);
        assert_eq!(backend.devices().len(), 1);
    }

    #[test]
    fn test_only_device_zero() {
        assert!(matches!(
            CpuBackend::for_device(1, None),
            Err(DeviceError::NotAvailable(_))
        ));
    }

    #[test]
    fn test_allocation_counter() {
        let backend = backend();
        let buf: CpuBuffer<f32> = backend.allocate(16).unwrap();
        assert_eq!(buf.len(), 16);
        assert_eq!(backend.allocation_count(), 1);
        let clone = backend.clone();
        let _other: CpuBuffer<f32> = clone.allocate(4).unwrap();
        assert_eq!(backend.allocation_count(), 2);
    }

    #[test]
    fn test_upload_download() {
        let backend = backend();
        let buf = buffer(&backend, &[1.0, 2.0, 3.0]);
        let mut out = vec![0.0; 3];
        backend.download(&buf, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);

        let mut short = vec![0.0; 2];
        assert!(matches!(
            backend.download(&buf, &mut short),
            Err(DeviceError::Copy(_))
        ));
    }

    #[test]
    fn test_fill() {
        let backend = backend();
        let mut buf: CpuBuffer<f64> = backend.allocate(8).unwrap();
        backend.fill(&mut buf, 0.25).unwrap();
        assert!(buf.as_slice().iter().all(|&x| x == 0.25));
    }

    #[test]
    fn test_launch_triad() {
        let backend = backend();
        let b = buffer(&backend, &[1.0, 2.0, 3.0, 4.0]);
        let c = buffer(&backend, &[10.0, 20.0, 30.0, 40.0]);
        let mut a = backend.allocate::<f64>(4).unwrap();
        backend
            .launch(
                StreamKernel::Triad,
                KernelArgs {
                    len: 4,
                    output: &mut a,
                    inputs: KernelInputs::Binary(&b, &c),
                },
            )
            .unwrap();
        let expected: Vec<f64> = (1..=4)
            .map(|i| f64::from(i) + 0.3 * f64::from(i * 10))
            .collect();
        assert_eq!(a.as_slice(), expected.as_slice());
    }

    #[test]
    fn test_launch_short_buffer() {
        let backend = backend();
        let x = buffer(&backend, &[1.0, 2.0]);
        let mut out = backend.allocate::<f64>(4).unwrap();
        let result = backend.launch(
            StreamKernel::Copy,
            KernelArgs {
                len: 4,
                output: &mut out,
                inputs: KernelInputs::Unary(&x),
            },
        );
        assert!(matches!(result, Err(DeviceError::Launch(_))));
    }

    #[test]
    fn test_tiled_dot_partials() {
        let backend = backend();
        let geometry = TileGeometry::new(4, 2).unwrap();
        let a = buffer(&backend, &[1.0; 16]);
        let b = buffer(&backend, &[2.0; 16]);
        let partials = backend.launch_tiled_dot(&a, &b, 16, geometry).unwrap();
        assert_eq!(partials, vec![16.0, 16.0]);
    }
}
