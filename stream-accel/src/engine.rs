// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! The STREAM engine: three device arrays and the kernels over them.
//!
//! # Example
//!
//! ```rust
//! use stream_accel::StreamEngine;
//!
//! let mut engine = StreamEngine::<f64>::new(1024 * 64, 0)?;
//! let n = engine.array_size();
//! engine.write_arrays(&vec![2.0; n], &vec![3.0; n], &vec![5.0; n])?;
//! engine.add()?;
//! assert_eq!(engine.dot()?, 6.0 * n as f64);
//! # Ok::<(), stream_accel::StreamError>(())
//! ```

use std::sync::Arc;

use crate::buffer::DeviceVector;
use crate::config::{validate_array_size, StreamConfig};
use crate::device::DeviceInfo;
use crate::error::DeviceError;
use crate::kernels::{
    get_backend, ArrayId, CpuBackend, DynamicBackend, KernelArgs, KernelInputs, StreamBackend,
    StreamKernel,
};
use crate::reduce::{TileGeometry, TiledReducer, DEFAULT_TILE_COUNT, TBSIZE};
use crate::{Result, StreamElement, StreamError};

/// Three equal-length device arrays `a`, `b`, `c` and the operations over them.
///
/// Every operation blocks until the device has finished. Mutating operations
/// take `&mut self`, so no operation can overlap an earlier one.
pub struct StreamEngine<T: StreamElement, B: StreamBackend = CpuBackend> {
    backend: Arc<B>,
    reducer: TiledReducer,
    array_size: usize,
    a: DeviceVector<T, B>,
    b: DeviceVector<T, B>,
    c: DeviceVector<T, B>,
}

impl<T: StreamElement, B: StreamBackend> std::fmt::Debug for StreamEngine<T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEngine")
            .field("backend", &self.backend.name())
            .field("device", self.backend.device())
            .field("element", &<T as StreamElement>::NAME)
            .field("array_size", &self.array_size)
            .field("geometry", &self.reducer.geometry())
            .finish()
    }
}

impl<T: StreamElement> StreamEngine<T, CpuBackend> {
    /// Create an engine on the CPU backend with the default tile geometry.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if `array_size` is not a
    /// positive multiple of [`TBSIZE`] (before any allocation), if
    /// `device_index` does not name a CPU device, or if allocation fails.
    pub fn new(array_size: usize, device_index: usize) -> Result<Self> {
        validate_array_size(array_size)?;
        let geometry = TileGeometry::new(TBSIZE, DEFAULT_TILE_COUNT)?;
        let backend = CpuBackend::for_device(device_index, None)
            .map_err(|e| StreamError::configuration(e.to_string()))?;
        Self::build(Arc::new(backend), array_size, geometry)
    }
}

impl<T: StreamElement> StreamEngine<T, DynamicBackend> {
    /// Create an engine on the backend selected by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if the configuration is invalid
    /// (checked before any backend is created), no backend matches the
    /// preference, or allocation fails.
    pub fn from_config(config: &StreamConfig) -> Result<Self> {
        config.validate()?;
        let backend = get_backend(config)?;
        Self::with_backend(backend, config)
    }
}

impl<T: StreamElement, B: StreamBackend> StreamEngine<T, B> {
    /// Create an engine on an existing backend.
    ///
    /// `config.device_index` must match the device the backend is bound to.
    /// The `backend` preference and `cpu_threads` fields are not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if the array size or tile
    /// geometry is invalid (before any allocation), the device index does not
    /// match the backend, or allocation fails.
    pub fn with_backend(backend: B, config: &StreamConfig) -> Result<Self> {
        validate_array_size(config.array_size)?;
        let geometry = config.geometry()?;
        let bound = backend.device().index;
        if config.device_index != bound {
            let available = backend.devices().len();
            return Err(StreamError::configuration(format!(
                "device index {} requested, {} backend is bound to device {bound} ({available} available)",
                config.device_index,
                backend.name()
            )));
        }
        Self::build(Arc::new(backend), config.array_size, geometry)
    }

    fn build(backend: Arc<B>, array_size: usize, geometry: TileGeometry) -> Result<Self> {
        let a = DeviceVector::new(Arc::clone(&backend), array_size)?;
        let b = DeviceVector::new(Arc::clone(&backend), array_size)?;
        let c = DeviceVector::new(Arc::clone(&backend), array_size)?;

        tracing::info!(
            backend = backend.name(),
            device = %backend.device(),
            element = <T as StreamElement>::NAME,
            array_size,
            tiles = geometry.tile_count(),
            "stream engine ready"
        );

        Ok(Self {
            backend,
            reducer: TiledReducer::new(geometry),
            array_size,
            a,
            b,
            c,
        })
    }

    /// Elements per array.
    #[must_use]
    pub fn array_size(&self) -> usize {
        self.array_size
    }

    /// Device the arrays live on.
    #[must_use]
    pub fn device(&self) -> &DeviceInfo {
        self.backend.device()
    }

    /// Backend executing the kernels.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Geometry of the dot-product dispatch.
    #[must_use]
    pub fn tile_geometry(&self) -> TileGeometry {
        self.reducer.geometry()
    }

    fn check_lengths(&self, lens: [usize; 3]) -> Result<()> {
        for len in lens {
            self.a.check_host_len(len)?;
        }
        Ok(())
    }

    /// Copy three host arrays into `a`, `b` and `c`.
    ///
    /// All lengths are checked before anything is copied, so a length
    /// mismatch leaves the device arrays untouched. The copies themselves are
    /// not staged: after a device copy failure the contents of all three
    /// arrays are undefined until the next successful write or fill.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transfer`] on a length mismatch or copy failure.
    pub fn write_arrays(&mut self, a: &[T], b: &[T], c: &[T]) -> Result<()> {
        self.check_lengths([a.len(), b.len(), c.len()])?;
        self.a
            .write_from(a)
            .and_then(|()| self.b.write_from(b))
            .and_then(|()| self.c.write_from(c))
            .map_err(|e| {
                tracing::warn!(error = %e, "write_arrays failed");
                e
            })
    }

    /// Copy `a`, `b` and `c` into three host arrays.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transfer`] on a length mismatch or copy failure.
    pub fn read_arrays(&self, a: &mut [T], b: &mut [T], c: &mut [T]) -> Result<()> {
        self.check_lengths([a.len(), b.len(), c.len()])?;
        self.a
            .read_into(a)
            .and_then(|()| self.b.read_into(b))
            .and_then(|()| self.c.read_into(c))
            .map_err(|e| {
                tracing::warn!(error = %e, "read_arrays failed");
                e
            })
    }

    /// Fill `a`, `b` and `c` with constants on the device.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if a fill kernel fails.
    pub fn init_arrays(&mut self, a: T, b: T, c: T) -> Result<()> {
        tracing::debug!(%a, %b, %c, "init_arrays");
        self.a
            .fill(a)
            .and_then(|()| self.b.fill(b))
            .and_then(|()| self.c.fill(c))
            .map_err(|e| {
                tracing::warn!(error = %e, "init_arrays failed");
                e
            })
    }

    /// `c[i] = a[i]`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if the kernel fails.
    pub fn copy(&mut self) -> Result<()> {
        self.run(StreamKernel::Copy)
    }

    /// `b[i] = 0.3 * c[i]`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if the kernel fails.
    pub fn mul(&mut self) -> Result<()> {
        self.run(StreamKernel::Mul)
    }

    /// `c[i] = a[i] + b[i]`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if the kernel fails.
    pub fn add(&mut self) -> Result<()> {
        self.run(StreamKernel::Add)
    }

    /// `a[i] = b[i] + 0.3 * c[i]`
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if the kernel fails.
    pub fn triad(&mut self) -> Result<()> {
        self.run(StreamKernel::Triad)
    }

    /// Dispatch one elementwise kernel over the whole arrays and wait for it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] naming the kernel if dispatch
    /// or completion fails.
    pub fn run(&mut self, kernel: StreamKernel) -> Result<()> {
        tracing::debug!(kernel = kernel.name(), len = self.array_size, "dispatch");

        let (output, others) = match kernel.output() {
            ArrayId::A => (&mut self.a, [(ArrayId::B, &self.b), (ArrayId::C, &self.c)]),
            ArrayId::B => (&mut self.b, [(ArrayId::A, &self.a), (ArrayId::C, &self.c)]),
            ArrayId::C => (&mut self.c, [(ArrayId::A, &self.a), (ArrayId::B, &self.b)]),
        };
        let input = |id: ArrayId| {
            others
                .iter()
                .find(|(array, _)| *array == id)
                .map(|&(_, vector)| vector.storage())
        };
        let mut ids = kernel.inputs();
        let inputs = match (ids.next().and_then(input), ids.next().and_then(input)) {
            (Some(x), None) => KernelInputs::Unary(x),
            (Some(x), Some(y)) => KernelInputs::Binary(x, y),
            (None, _) => {
                return Err(StreamError::kernel(
                    kernel.name(),
                    DeviceError::launch("kernel binds no input array"),
                ))
            }
        };

        self.backend
            .launch(
                kernel,
                KernelArgs {
                    len: self.array_size,
                    output: output.storage_mut(),
                    inputs,
                },
            )
            .map_err(|e| {
                tracing::warn!(kernel = kernel.name(), error = %e, "kernel failed");
                StreamError::kernel(kernel.name(), e)
            })
    }

    /// `sum(a[i] * b[i])` via the tiled reduction.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Reduction`] if the dispatch, a tile barrier or
    /// the partial-sum transfer fails.
    pub fn dot(&self) -> Result<T> {
        tracing::debug!(
            kernel = "dot",
            len = self.array_size,
            tiles = self.reducer.geometry().tile_count(),
            "dispatch"
        );
        self.reducer
            .dot(
                &*self.backend,
                self.a.storage(),
                self.b.storage(),
                self.array_size,
            )
            .map_err(|e| {
                tracing::warn!(kernel = "dot", error = %e, "reduction failed");
                e
            })
    }

    /// Copy all three arrays into new host vectors.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transfer`] if a copy fails.
    pub fn to_host(&self) -> Result<(Vec<T>, Vec<T>, Vec<T>)> {
        Ok((self.a.to_vec()?, self.b.to_vec()?, self.c.to_vec()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_size() {
        let result = StreamEngine::<f32>::new(1000, 0);
        assert!(matches!(result, Err(StreamError::Configuration(_))));
    }

    #[test]
    fn test_new_rejects_bad_device() {
        let result = StreamEngine::<f32>::new(1024, 3);
        assert!(matches!(result, Err(StreamError::Configuration(_))));
    }

    #[test]
    fn test_with_backend_checks_device_index() {
        let backend = CpuBackend::new(Some(1)).unwrap();
        let config = StreamConfig::cpu_only()
            .with_array_size(1024)
            .with_device_index(1);
        let result = StreamEngine::<f64, _>::with_backend(backend.clone(), &config);
        assert!(matches!(result, Err(StreamError::Configuration(_))));
        assert_eq!(backend.allocation_count(), 0);
    }

    #[test]
    fn test_kernels_touch_only_their_output() {
        let mut engine = StreamEngine::<f64>::new(1024, 0).unwrap();
        let n = engine.array_size();
        engine
            .write_arrays(&vec![1.0; n], &vec![2.0; n], &vec![4.0; n])
            .unwrap();

        engine.mul().unwrap();
        let (a, b, c) = engine.to_host().unwrap();
        assert!(a.iter().all(|&x| x == 1.0));
        assert!(b.iter().all(|&x| (x - 1.2).abs() < 1e-12));
        assert!(c.iter().all(|&x| x == 4.0));
    }

    #[test]
    fn test_small_tile_geometry() {
        let config = StreamConfig::cpu_only()
            .with_array_size(4096)
            .with_tile_count(3);
        let backend = CpuBackend::new(Some(2)).unwrap();
        let mut engine = StreamEngine::<f32, _>::with_backend(backend, &config).unwrap();
        assert_eq!(engine.tile_geometry().tile_count(), 3);
        engine.init_arrays(1.0, 1.0, 0.0).unwrap();
        assert_eq!(engine.dot().unwrap(), 4096.0);
    }
}
