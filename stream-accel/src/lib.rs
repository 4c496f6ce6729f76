//! Device-resident STREAM memory-bandwidth kernels with a tiled dot-product reduction.
//!
//! This crate keeps three equal-length arrays `a`, `b`, `c` resident on an
//! execution device and runs the classic STREAM kernels over them, plus a dot
//! product computed by a tiled, barrier-synchronised tree reduction. Timing and
//! bandwidth reporting belong to the caller.
//!
//! # Features
//!
//! - **Kernels**: copy, mul, add, triad (see [`StreamKernel`])
//! - **Reduction**: per-tile grid-stride accumulation and tree fan-in, host
//!   summation of the partial sums
//! - **Backends**: rayon CPU backend, CUDA via CubeCL with the `cuda` feature
//! - **Element types**: `f32` and `f64`
//!
//! # Quick Start
//!
//! ```rust
//! use stream_accel::StreamEngine;
//!
//! let mut engine = StreamEngine::<f32>::new(1024 * 64, 0)?;
//! let n = engine.array_size();
//! engine.write_arrays(&vec![0.1; n], &vec![0.2; n], &vec![0.0; n])?;
//!
//! engine.copy()?;
//! engine.mul()?;
//! engine.add()?;
//! engine.triad()?;
//! let sum = engine.dot()?;
//!
//! let (mut a, mut b, mut c) = (vec![0.0; n], vec![0.0; n], vec![0.0; n]);
//! engine.read_arrays(&mut a, &mut b, &mut c)?;
//! # let _ = sum;
//! # Ok::<(), stream_accel::StreamError>(())
//! ```
//!
//! # Array Sizes
//!
//! Every array length must be a positive multiple of [`TBSIZE`] (1024).
//! Other sizes are rejected before anything is allocated.
//!
//! # Feature Flags
//!
//! - `default`: CPU backend only
//! - `cuda`: Enable GPU execution via CubeCL

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

mod buffer;
pub mod config;
pub mod device;
mod element;
mod engine;
mod error;
pub mod kernels;
pub mod metrics;
pub mod reduce;

#[cfg(feature = "cuda")]
pub mod gpu;

pub use buffer::DeviceVector;
pub use config::{BackendPreference, StreamConfig, DEFAULT_ARRAY_SIZE};
pub use device::{format_device_list, list_devices, DeviceInfo, DeviceKind};
pub use element::{DeviceScalar, StreamElement};
pub use engine::StreamEngine;
pub use error::{DeviceError, DeviceResult, Result, StreamError, TransferFault};
pub use kernels::{
    get_backend, warn_if_cpu, CpuBackend, DynamicBackend, StreamBackend, StreamKernel,
};
pub use reduce::{
    PartialSums, TileGeometry, TiledReducer, DEFAULT_TILE_COUNT, MAX_TILE_COUNT, TBSIZE,
};

#[cfg(feature = "cuda")]
pub use kernels::CubeclBackend;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use stream_accel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{BackendPreference, StreamConfig};
    pub use crate::kernels::{get_backend, CpuBackend, StreamBackend, StreamKernel};
    pub use crate::{StreamElement, StreamEngine};
    pub use crate::{Result, StreamError};
}
