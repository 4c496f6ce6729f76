// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Kernel descriptions and execution backends.
//!
//! A kernel here is data, not code: [`StreamKernel`] declares which arrays it
//! reads and writes and provides the per-index body. Turning that into work on
//! a device is the job of a [`StreamBackend`].
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! |   StreamBackend   |  <- allocation, transfer, launch, tiled reduction
//! +-------------------+
//!          |
//!     +----+-----+
//!     |          |
//!     v          v
//! +------+   +--------+
//! |  CPU |   | CubeCL |
//! +------+   +--------+
//! ```
//!
//! [`DynamicBackend`] picks one of them at runtime from a
//! [`BackendPreference`](crate::BackendPreference).

pub mod cpu;

#[cfg(feature = "cuda")]
pub mod cubecl;

use std::sync::Once;

use crate::config::{BackendPreference, StreamConfig};
use crate::device::{DeviceInfo, DeviceKind};
use crate::error::{DeviceError, DeviceResult};
use crate::reduce::TileGeometry;
use crate::{Result, StreamElement, StreamError};

pub use cpu::{CpuBackend, CpuBuffer};

#[cfg(feature = "cuda")]
pub use self::cubecl::{CubeclBackend, CubeclBuffer};

/// One of the three engine arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayId {
    /// Array `a`.
    A,
    /// Array `b`.
    B,
    /// Array `c`.
    C,
}

/// How a kernel uses a bound array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read only.
    Read,
    /// Written at every index.
    Write,
}

/// An array captured by a kernel together with its access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Captured array.
    pub array: ArrayId,
    /// Access mode.
    pub access: Access,
}

const COPY_BINDINGS: [Binding; 2] = [
    Binding { array: ArrayId::A, access: Access::Read },
    Binding { array: ArrayId::C, access: Access::Write },
];
const MUL_BINDINGS: [Binding; 2] = [
    Binding { array: ArrayId::C, access: Access::Read },
    Binding { array: ArrayId::B, access: Access::Write },
];
const ADD_BINDINGS: [Binding; 3] = [
    Binding { array: ArrayId::A, access: Access::Read },
    Binding { array: ArrayId::B, access: Access::Read },
    Binding { array: ArrayId::C, access: Access::Write },
];
const TRIAD_BINDINGS: [Binding; 3] = [
    Binding { array: ArrayId::B, access: Access::Read },
    Binding { array: ArrayId::C, access: Access::Read },
    Binding { array: ArrayId::A, access: Access::Write },
];

/// The elementwise kernels.
///
/// Every kernel launches one work-item per index, writes exactly one array
/// and reads one or two others. Work-items are independent.
///
/// | kernel | effect |
/// |--------|--------|
/// | `Copy` | `c[i] = a[i]` |
/// | `Mul` | `b[i] = k * c[i]` |
/// | `Add` | `c[i] = a[i] + b[i]` |
/// | `Triad` | `a[i] = b[i] + k * c[i]` |
///
/// `k` is [`StreamElement::SCALAR`] (0.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKernel {
    /// `c[i] = a[i]`
    Copy,
    /// `b[i] = k * c[i]`
    Mul,
    /// `c[i] = a[i] + b[i]`
    Add,
    /// `a[i] = b[i] + k * c[i]`
    Triad,
}

impl StreamKernel {
    /// All kernels in benchmark order.
    pub const ALL: [Self; 4] = [Self::Copy, Self::Mul, Self::Add, Self::Triad];

    /// Kernel name used in logs and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Mul => "mul",
            Self::Add => "add",
            Self::Triad => "triad",
        }
    }

    /// Captured arrays, inputs first in operand order, then the output.
    #[must_use]
    pub const fn bindings(self) -> &'static [Binding] {
        match self {
            Self::Copy => &COPY_BINDINGS,
            Self::Mul => &MUL_BINDINGS,
            Self::Add => &ADD_BINDINGS,
            Self::Triad => &TRIAD_BINDINGS,
        }
    }

    /// The array written by this kernel.
    #[must_use]
    pub fn output(self) -> ArrayId {
        self.bindings()
            .iter()
            .find(|b| b.access == Access::Write)
            .map_or(ArrayId::C, |b| b.array)
    }

    /// Arrays read by this kernel, in operand order.
    pub fn inputs(self) -> impl Iterator<Item = ArrayId> {
        self.bindings()
            .iter()
            .filter(|b| b.access == Access::Read)
            .map(|b| b.array)
    }

    /// Whether the kernel reads two arrays.
    #[must_use]
    pub fn is_binary(self) -> bool {
        self.inputs().count() == 2
    }

    /// Per-index body.
    ///
    /// `second` is ignored by unary kernels.
    #[inline]
    #[must_use]
    pub fn apply<T: StreamElement>(self, first: T, second: T) -> T {
        let k = <T as StreamElement>::SCALAR;
        match self {
            Self::Copy => first,
            Self::Mul => k * first,
            Self::Add => first + second,
            Self::Triad => first + k * second,
        }
    }

    /// Bytes read and written by one dispatch over `len` elements.
    #[must_use]
    pub fn bytes_moved<T: StreamElement>(self, len: usize) -> usize {
        self.bindings().len() * len * std::mem::size_of::<T>()
    }
}

/// Bytes read by one dot-product dispatch over `len` elements.
#[must_use]
pub fn dot_bytes_moved<T: StreamElement>(len: usize) -> usize {
    2 * len * std::mem::size_of::<T>()
}

/// Operands of an elementwise launch.
#[derive(Debug)]
pub enum KernelInputs<'a, Buf> {
    /// One input array.
    Unary(&'a Buf),
    /// Two input arrays, in operand order.
    Binary(&'a Buf, &'a Buf),
}

/// Buffers and domain size for one elementwise launch.
#[derive(Debug)]
pub struct KernelArgs<'a, Buf> {
    /// Number of work-items (array length).
    pub len: usize,
    /// Array written by the kernel.
    pub output: &'a mut Buf,
    /// Arrays read by the kernel.
    pub inputs: KernelInputs<'a, Buf>,
}

impl<'a, Buf> KernelArgs<'a, Buf> {
    /// Convert every buffer, failing on the first one that cannot be converted.
    ///
    /// # Errors
    ///
    /// Propagates the first conversion error.
    pub fn try_map<U, E>(
        self,
        shared: impl Fn(&'a Buf) -> std::result::Result<&'a U, E>,
        exclusive: impl FnOnce(&'a mut Buf) -> std::result::Result<&'a mut U, E>,
    ) -> std::result::Result<KernelArgs<'a, U>, E> {
        let inputs = match self.inputs {
            KernelInputs::Unary(x) => KernelInputs::Unary(shared(x)?),
            KernelInputs::Binary(x, y) => KernelInputs::Binary(shared(x)?, shared(y)?),
        };
        Ok(KernelArgs {
            len: self.len,
            output: exclusive(self.output)?,
            inputs,
        })
    }
}

/// An execution backend bound to one device.
///
/// Every method blocks until the device has finished the requested work.
///
/// # Implementors
///
/// - [`CpuBackend`]: rayon thread pool over host memory
/// - [`CubeclBackend`]: CUDA via CubeCL (requires `cuda` feature)
/// - [`DynamicBackend`]: runtime choice between the two
pub trait StreamBackend: Send + Sync {
    /// Device-resident storage for `T`.
    type Buffer<T: StreamElement>: Send + Sync;

    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Returns true if the backend can run on this system.
    fn is_available(&self) -> bool;

    /// Device this backend allocates on and launches to.
    fn device(&self) -> &DeviceInfo;

    /// All devices this backend could be bound to.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Allocate `len` uninitialised-or-zeroed elements.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Allocation`] if device memory is exhausted.
    fn allocate<T: StreamElement>(&self, len: usize) -> DeviceResult<Self::Buffer<T>>;

    /// Copy `src` into `dst`. Callers guarantee equal lengths.
    ///
    /// # Errors
    ///
    /// Returns a device error if the copy fails.
    fn upload<T: StreamElement>(&self, dst: &mut Self::Buffer<T>, src: &[T]) -> DeviceResult<()>;

    /// Copy `src` into `dst`. Callers guarantee equal lengths.
    ///
    /// # Errors
    ///
    /// Returns a device error if the copy fails.
    fn download<T: StreamElement>(&self, src: &Self::Buffer<T>, dst: &mut [T])
        -> DeviceResult<()>;

    /// Set every element of `dst` to `value` on the device.
    ///
    /// # Errors
    ///
    /// Returns a device error if the launch fails.
    fn fill<T: StreamElement>(&self, dst: &mut Self::Buffer<T>, value: T) -> DeviceResult<()>;

    /// Run `kernel` with one work-item per index of `args.len`.
    ///
    /// # Errors
    ///
    /// Returns a device error if launch or completion fails.
    fn launch<T: StreamElement>(
        &self,
        kernel: StreamKernel,
        args: KernelArgs<'_, Self::Buffer<T>>,
    ) -> DeviceResult<()>;

    /// Run the tiled dot-product reduction and return one partial sum per tile.
    ///
    /// `len` must be a multiple of `geometry.tile_width()`.
    ///
    /// # Errors
    ///
    /// Returns a device error if launch, a barrier, or the partial-sum
    /// transfer fails.
    fn launch_tiled_dot<T: StreamElement>(
        &self,
        a: &Self::Buffer<T>,
        b: &Self::Buffer<T>,
        len: usize,
        geometry: TileGeometry,
    ) -> DeviceResult<Vec<T>>;
}

/// Runtime-selected backend.
#[derive(Debug)]
pub enum DynamicBackend {
    /// Host CPU backend.
    Cpu(CpuBackend),
    /// CUDA backend.
    #[cfg(feature = "cuda")]
    Cubecl(CubeclBackend),
}

/// Buffer owned by a [`DynamicBackend`].
#[derive(Debug)]
pub enum DynamicBuffer<T: StreamElement> {
    /// Host CPU storage.
    Cpu(CpuBuffer<T>),
    /// CUDA storage.
    #[cfg(feature = "cuda")]
    Cubecl(CubeclBuffer<T>),
}

impl<T: StreamElement> DynamicBuffer<T> {
    fn owner(&self) -> &'static str {
        match self {
            Self::Cpu(_) => "cpu",
            #[cfg(feature = "cuda")]
            Self::Cubecl(_) => "cubecl-cuda",
        }
    }

    fn as_cpu(&self) -> DeviceResult<&CpuBuffer<T>> {
        match self {
            Self::Cpu(buf) => Ok(buf),
            #[allow(unreachable_patterns)]
            other => Err(DeviceError::ForeignBuffer {
                owner: other.owner(),
                backend: "cpu",
            }),
        }
    }

    fn as_cpu_mut(&mut self) -> DeviceResult<&mut CpuBuffer<T>> {
        match self {
            Self::Cpu(buf) => Ok(buf),
            #[allow(unreachable_patterns)]
            other => Err(DeviceError::ForeignBuffer {
                owner: other.owner(),
                backend: "cpu",
            }),
        }
    }

    #[cfg(feature = "cuda")]
    fn as_cubecl(&self) -> DeviceResult<&CubeclBuffer<T>> {
        match self {
            Self::Cubecl(buf) => Ok(buf),
            other => Err(DeviceError::ForeignBuffer {
                owner: other.owner(),
                backend: "cubecl-cuda",
            }),
        }
    }

    #[cfg(feature = "cuda")]
    fn as_cubecl_mut(&mut self) -> DeviceResult<&mut CubeclBuffer<T>> {
        match self {
            Self::Cubecl(buf) => Ok(buf),
            other => Err(DeviceError::ForeignBuffer {
                owner: other.owner(),
                backend: "cubecl-cuda",
            }),
        }
    }
}

impl StreamBackend for DynamicBackend {
    type Buffer<T: StreamElement> = DynamicBuffer<T>;

    fn name(&self) -> &'static str {
        match self {
            Self::Cpu(backend) => backend.name(),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.name(),
        }
    }

    fn is_available(&self) -> bool {
        match self {
            Self::Cpu(backend) => backend.is_available(),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.is_available(),
        }
    }

    fn device(&self) -> &DeviceInfo {
        match self {
            Self::Cpu(backend) => backend.device(),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.device(),
        }
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        match self {
            Self::Cpu(backend) => backend.devices(),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.devices(),
        }
    }

    fn allocate<T: StreamElement>(&self, len: usize) -> DeviceResult<DynamicBuffer<T>> {
        match self {
            Self::Cpu(backend) => backend.allocate(len).map(DynamicBuffer::Cpu),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.allocate(len).map(DynamicBuffer::Cubecl),
        }
    }

    fn upload<T: StreamElement>(&self, dst: &mut DynamicBuffer<T>, src: &[T]) -> DeviceResult<()> {
        match self {
            Self::Cpu(backend) => backend.upload(dst.as_cpu_mut()?, src),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.upload(dst.as_cubecl_mut()?, src),
        }
    }

    fn download<T: StreamElement>(&self, src: &DynamicBuffer<T>, dst: &mut [T]) -> DeviceResult<()> {
        match self {
            Self::Cpu(backend) => backend.download(src.as_cpu()?, dst),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.download(src.as_cubecl()?, dst),
        }
    }

    fn fill<T: StreamElement>(&self, dst: &mut DynamicBuffer<T>, value: T) -> DeviceResult<()> {
        match self {
            Self::Cpu(backend) => backend.fill(dst.as_cpu_mut()?, value),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.fill(dst.as_cubecl_mut()?, value),
        }
    }

    fn launch<T: StreamElement>(
        &self,
        kernel: StreamKernel,
        args: KernelArgs<'_, DynamicBuffer<T>>,
    ) -> DeviceResult<()> {
        match self {
            Self::Cpu(backend) => {
                backend.launch(kernel, args.try_map(DynamicBuffer::as_cpu, DynamicBuffer::as_cpu_mut)?)
            }
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => backend.launch(
                kernel,
                args.try_map(DynamicBuffer::as_cubecl, DynamicBuffer::as_cubecl_mut)?,
            ),
        }
    }

    fn launch_tiled_dot<T: StreamElement>(
        &self,
        a: &DynamicBuffer<T>,
        b: &DynamicBuffer<T>,
        len: usize,
        geometry: TileGeometry,
    ) -> DeviceResult<Vec<T>> {
        match self {
            Self::Cpu(backend) => backend.launch_tiled_dot(a.as_cpu()?, b.as_cpu()?, len, geometry),
            #[cfg(feature = "cuda")]
            Self::Cubecl(backend) => {
                backend.launch_tiled_dot(a.as_cubecl()?, b.as_cubecl()?, len, geometry)
            }
        }
    }
}

/// Select a backend bound to `config.device_index`.
///
/// # Errors
///
/// Returns [`StreamError::Configuration`] when a GPU is required but none is
/// available, or the device index does not exist.
pub fn get_backend(config: &StreamConfig) -> Result<DynamicBackend> {
    let backend = match config.backend {
        BackendPreference::Cpu => DynamicBackend::Cpu(cpu_backend(config)?),

        #[cfg(feature = "cuda")]
        BackendPreference::Gpu => DynamicBackend::Cubecl(
            CubeclBackend::for_device(config.device_index)
                .map_err(|e| StreamError::configuration(e.to_string()))?,
        ),

        #[cfg(not(feature = "cuda"))]
        BackendPreference::Gpu => {
            return Err(StreamError::configuration(
                "GPU backend requested but stream-accel was built without the `cuda` feature",
            ))
        }

        BackendPreference::Auto => {
            #[cfg(feature = "cuda")]
            {
                if let Ok(cubecl) = CubeclBackend::for_device(config.device_index) {
                    return Ok(DynamicBackend::Cubecl(cubecl));
                }
            }
            DynamicBackend::Cpu(cpu_backend(config)?)
        }
    };

    if config.backend != BackendPreference::Cpu {
        warn_if_cpu(backend.device().kind);
    }
    Ok(backend)
}

fn cpu_backend(config: &StreamConfig) -> Result<CpuBackend> {
    CpuBackend::for_device(config.device_index, config.cpu_threads)
        .map_err(|e| StreamError::configuration(e.to_string()))
}

/// Emit a warning, once per process, when kernels run on the CPU.
pub fn warn_if_cpu(kind: DeviceKind) {
    static WARN_ONCE: Once = Once::new();

    if kind == DeviceKind::Cpu {
        WARN_ONCE.call_once(|| {
            tracing::warn!(
                "Running on CPU - no accelerator selected. \
                 Bandwidth figures describe host memory."
            );
        });
    }
}
