// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! CubeCL/CUDA backend.
//!
//! Arrays live in CUDA device memory as CubeCL handles. Host data crosses the
//! bus only in [`upload`](StreamBackend::upload),
//! [`download`](StreamBackend::download) and the partial-sum readback of the
//! tiled reduction.
//!
//! ## Feature Gate
//!
//! Requires the `cuda` feature:
//!
//! ```toml
//! [dependencies]
//! stream-accel = { version = "0.1", features = ["cuda"] }
//! ```

#![cfg(feature = "cuda")]
#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};

use cubecl::bytes::Bytes;
use cubecl::prelude::*;
use cubecl::server::Handle;
use cubecl_cuda::{CudaDevice, CudaRuntime};

use crate::device::{DeviceInfo, DeviceKind};
use crate::error::{DeviceError, DeviceResult};
use crate::gpu::kernels::{
    grid_size, stream_add_kernel, stream_copy_kernel, stream_fill_kernel, stream_mul_kernel,
    stream_triad_kernel, tiled_dot_kernel, BLOCK_SIZE, TILE_WIDTH,
};
use crate::kernels::{KernelArgs, KernelInputs, StreamBackend, StreamKernel};
use crate::reduce::TileGeometry;
use crate::StreamElement;

/// Upper bound on device indices probed when listing devices.
const MAX_PROBED_DEVICES: usize = 16;

/// CUDA device memory holding `len` elements of `T`.
pub struct CubeclBuffer<T> {
    handle: Handle,
    len: usize,
    _element: PhantomData<T>,
}

impl<T> fmt::Debug for CubeclBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CubeclBuffer").field("len", &self.len).finish_non_exhaustive()
    }
}

impl<T> CubeclBuffer<T> {
    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the buffer holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// CubeCL/CUDA backend bound to one CUDA device.
///
/// # Availability
///
/// Construction fails if no CUDA runtime or device is present. Use
/// [`CubeclBackend::probe_devices`] to list what is reachable.
#[derive(Clone)]
pub struct CubeclBackend {
    client: ComputeClient<CudaRuntime>,
    device: DeviceInfo,
}

impl fmt::Debug for CubeclBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CubeclBackend").field("device", &self.device).finish_non_exhaustive()
    }
}

impl CubeclBackend {
    /// Bind to CUDA device `index`.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::NotAvailable`] if CUDA is missing or the device
    /// does not exist.
    pub fn for_device(index: usize) -> DeviceResult<Self> {
        let client = Self::try_client(index).ok_or_else(|| {
            DeviceError::not_available(format!("CUDA device {index} is not available"))
        })?;
        Ok(Self {
            client,
            device: Self::describe(index),
        })
    }

    /// CUDA devices that accept a client, in index order.
    #[must_use]
    pub fn probe_devices() -> Vec<DeviceInfo> {
        (0..MAX_PROBED_DEVICES)
            .map_while(|index| Self::try_client(index).map(|_| Self::describe(index)))
            .collect()
    }

    fn try_client(index: usize) -> Option<ComputeClient<CudaRuntime>> {
        // Client creation panics when CUDA is unavailable
        catch_unwind(AssertUnwindSafe(|| CudaRuntime::client(&CudaDevice::new(index)))).ok()
    }

    fn describe(index: usize) -> DeviceInfo {
        DeviceInfo::new(index, format!("CUDA device {index}"), DeviceKind::Cuda)
    }

    fn upload_handle<T: StreamElement>(&self, src: &[T]) -> Handle {
        self.client
            .create(Bytes::from_bytes_vec(T::as_bytes(src).to_vec()))
    }

    fn sync(&self) -> DeviceResult<()> {
        catch_unwind(AssertUnwindSafe(|| cubecl::future::block_on(self.client.sync())))
            .map_err(|_| DeviceError::sync("CUDA stream synchronisation panicked"))
    }

    fn cube_dim(&self, units: u32) -> CubeDim {
        CubeDim::new(&self.client, units as usize)
    }
}

fn len_u32(len: usize) -> DeviceResult<u32> {
    u32::try_from(len).map_err(|_| DeviceError::launch(format!("{len} elements exceed u32 indexing")))
}

impl StreamBackend for CubeclBackend {
    type Buffer<T: StreamElement> = CubeclBuffer<T>;

    fn name(&self) -> &'static str {
        "cubecl-cuda"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        Self::probe_devices()
    }

    fn allocate<T: StreamElement>(&self, len: usize) -> DeviceResult<CubeclBuffer<T>> {
        let bytes = len.saturating_mul(std::mem::size_of::<T>());
        let handle = catch_unwind(AssertUnwindSafe(|| self.client.empty(bytes))).map_err(|_| {
            DeviceError::Allocation {
                bytes,
                reason: format!("CUDA allocation on device {} failed", self.device.index),
            }
        })?;
        Ok(CubeclBuffer {
            handle,
            len,
            _element: PhantomData,
        })
    }

    fn upload<T: StreamElement>(&self, dst: &mut CubeclBuffer<T>, src: &[T]) -> DeviceResult<()> {
        if dst.len != src.len() {
            return Err(DeviceError::copy(format!(
                "upload of {} elements into buffer of {}",
                src.len(),
                dst.len
            )));
        }
        dst.handle = catch_unwind(AssertUnwindSafe(|| self.upload_handle(src)))
            .map_err(|_| DeviceError::copy("host to device copy failed"))?;
        Ok(())
    }

    fn download<T: StreamElement>(&self, src: &CubeclBuffer<T>, dst: &mut [T]) -> DeviceResult<()> {
        if dst.len() != src.len {
            return Err(DeviceError::copy(format!(
                "download of buffer of {} elements into {}",
                src.len,
                dst.len()
            )));
        }
        let bytes = catch_unwind(AssertUnwindSafe(|| self.client.read_one(src.handle.clone())))
            .map_err(|_| DeviceError::copy("device to host copy failed"))?;
        dst.copy_from_slice(&T::from_bytes(&bytes)[..src.len]);
        Ok(())
    }

    fn fill<T: StreamElement>(&self, dst: &mut CubeclBuffer<T>, value: T) -> DeviceResult<()> {
        let len = len_u32(dst.len)?;
        let cube_count = CubeCount::Static(grid_size(len, BLOCK_SIZE), 1, 1);

        // SAFETY: handle sized for `len` elements
        unsafe {
            stream_fill_kernel::launch::<T, CudaRuntime>(
                &self.client,
                cube_count,
                self.cube_dim(BLOCK_SIZE),
                ArrayArg::from_raw_parts::<T>(&dst.handle, dst.len, 1),
                ScalarArg::new(value),
                len,
            )
            .map_err(|e| DeviceError::launch(format!("fill kernel launch failed: {e}")))?;
        }
        self.sync()
    }

    fn launch<T: StreamElement>(
        &self,
        kernel: StreamKernel,
        args: KernelArgs<'_, CubeclBuffer<T>>,
    ) -> DeviceResult<()> {
        let len = len_u32(args.len)?;
        let n = args.len;
        let cube_count = CubeCount::Static(grid_size(len, BLOCK_SIZE), 1, 1);
        let cube_dim = self.cube_dim(BLOCK_SIZE);
        let k = ScalarArg::new(<T as StreamElement>::SCALAR);
        let out = &args.output.handle;

        // SAFETY: every handle was allocated for at least `n` elements
        let launched = unsafe {
            match (kernel, args.inputs) {
                (StreamKernel::Copy, KernelInputs::Unary(x)) => {
                    stream_copy_kernel::launch::<T, CudaRuntime>(
                        &self.client,
                        cube_count,
                        cube_dim,
                        ArrayArg::from_raw_parts::<T>(&x.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(out, n, 1),
                        len,
                    )
                }
                (StreamKernel::Mul, KernelInputs::Unary(x)) => {
                    stream_mul_kernel::launch::<T, CudaRuntime>(
                        &self.client,
                        cube_count,
                        cube_dim,
                        ArrayArg::from_raw_parts::<T>(&x.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(out, n, 1),
                        k,
                        len,
                    )
                }
                (StreamKernel::Add, KernelInputs::Binary(x, y)) => {
                    stream_add_kernel::launch::<T, CudaRuntime>(
                        &self.client,
                        cube_count,
                        cube_dim,
                        ArrayArg::from_raw_parts::<T>(&x.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(&y.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(out, n, 1),
                        len,
                    )
                }
                (StreamKernel::Triad, KernelInputs::Binary(x, y)) => {
                    stream_triad_kernel::launch::<T, CudaRuntime>(
                        &self.client,
                        cube_count,
                        cube_dim,
                        ArrayArg::from_raw_parts::<T>(&x.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(&y.handle, n, 1),
                        ArrayArg::from_raw_parts::<T>(out, n, 1),
                        k,
                        len,
                    )
                }
                (kernel, _) => {
                    return Err(DeviceError::launch(format!(
                        "{} launched with the wrong number of inputs",
                        kernel.name()
                    )))
                }
            }
        };
        launched.map_err(|e| DeviceError::launch(format!("{} kernel launch failed: {e}", kernel.name())))?;
        self.sync()
    }

    fn launch_tiled_dot<T: StreamElement>(
        &self,
        a: &CubeclBuffer<T>,
        b: &CubeclBuffer<T>,
        len: usize,
        geometry: TileGeometry,
    ) -> DeviceResult<Vec<T>> {
        if geometry.tile_width() != TILE_WIDTH as usize {
            return Err(DeviceError::launch(format!(
                "tiled dot requires {TILE_WIDTH} units per tile, got {}",
                geometry.tile_width()
            )));
        }
        let len32 = len_u32(len)?;
        let tiles = len_u32(geometry.tile_count())?;
        let partials = self.allocate::<T>(geometry.tile_count())?;

        // SAFETY: `a` and `b` hold `len` elements, `partials` one per tile
        unsafe {
            tiled_dot_kernel::launch::<T, CudaRuntime>(
                &self.client,
                CubeCount::Static(tiles, 1, 1),
                self.cube_dim(TILE_WIDTH),
                ArrayArg::from_raw_parts::<T>(&a.handle, len, 1),
                ArrayArg::from_raw_parts::<T>(&b.handle, len, 1),
                ArrayArg::from_raw_parts::<T>(&partials.handle, geometry.tile_count(), 1),
                len32,
                tiles,
            )
            .map_err(|e| DeviceError::launch(format!("tiled dot launch failed: {e}")))?;
        }
        self.sync()?;

        let mut sums = vec![<T as StreamElement>::ZERO; geometry.tile_count()];
        self.download(&partials, &mut sums)?;
        Ok(sums)
    }
}
