// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Engine configuration.
//!
//! [`StreamConfig`] carries everything needed to build a
//! [`StreamEngine`](crate::StreamEngine): array length, device index, the
//! number of reduction tiles, backend preference and an optional CPU thread
//! count. It is plain data (`serde`-friendly) with builder-style setters and
//! environment overrides.
//!
//! # Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `STREAM_ACCEL_BACKEND` | `auto`, `cpu` or `gpu` |
//! | `STREAM_ACCEL_DEVICE` | device index |
//! | `STREAM_ACCEL_CPU_THREADS` | CPU backend thread count (`0` = default) |

use std::env;

use serde::{Deserialize, Serialize};

use crate::reduce::{TileGeometry, DEFAULT_TILE_COUNT, TBSIZE};
use crate::{Result, StreamError};

const BACKEND_ENV: &str = "STREAM_ACCEL_BACKEND";
const DEVICE_ENV: &str = "STREAM_ACCEL_DEVICE";
const CPU_THREADS_ENV: &str = "STREAM_ACCEL_CPU_THREADS";

/// Default array length: 2^25 elements.
pub const DEFAULT_ARRAY_SIZE: usize = 33_554_432;

/// Backend preference for kernel execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Use an accelerator when one is compiled in and present, else the CPU.
    #[default]
    Auto,
    /// Force the CPU backend.
    Cpu,
    /// Require an accelerator (requires the `cuda` feature).
    Gpu,
}

impl BackendPreference {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "cpu" => Some(Self::Cpu),
            "gpu" | "cuda" => Some(Self::Gpu),
            _ => None,
        }
    }
}

/// Configuration for a [`StreamEngine`](crate::StreamEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Elements per array; must be a positive multiple of [`TBSIZE`].
    pub array_size: usize,
    /// Index into the selected backend's device list.
    pub device_index: usize,
    /// Number of tiles launched by the dot-product reduction.
    pub tile_count: usize,
    /// Backend preference.
    pub backend: BackendPreference,
    /// Thread count for the CPU backend (`None` = rayon default).
    pub cpu_threads: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::auto()
    }
}

impl StreamConfig {
    /// Automatic backend selection with default sizes.
    #[must_use]
    pub fn auto() -> Self {
        Self {
            array_size: DEFAULT_ARRAY_SIZE,
            device_index: 0,
            tile_count: DEFAULT_TILE_COUNT,
            backend: BackendPreference::Auto,
            cpu_threads: None,
        }
    }

    /// Force the CPU backend.
    #[must_use]
    pub fn cpu_only() -> Self {
        Self {
            backend: BackendPreference::Cpu,
            ..Self::auto()
        }
    }

    /// Require an accelerator backend.
    #[must_use]
    pub fn gpu_only() -> Self {
        Self {
            backend: BackendPreference::Gpu,
            ..Self::auto()
        }
    }

    /// Set the array length.
    #[must_use]
    pub fn with_array_size(mut self, array_size: usize) -> Self {
        self.array_size = array_size;
        self
    }

    /// Set the device index.
    #[must_use]
    pub fn with_device_index(mut self, device_index: usize) -> Self {
        self.device_index = device_index;
        self
    }

    /// Set the number of reduction tiles.
    #[must_use]
    pub fn with_tile_count(mut self, tile_count: usize) -> Self {
        self.tile_count = tile_count;
        self
    }

    /// Set the backend preference.
    #[must_use]
    pub fn with_backend(mut self, backend: BackendPreference) -> Self {
        self.backend = backend;
        self
    }

    /// Set the CPU backend thread count.
    #[must_use]
    pub fn with_cpu_threads(mut self, threads: usize) -> Self {
        self.cpu_threads = (threads > 0).then_some(threads);
        self
    }

    /// Reduction geometry derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] when `tile_count` is zero or
    /// above [`MAX_TILE_COUNT`](crate::MAX_TILE_COUNT).
    pub fn geometry(&self) -> Result<TileGeometry> {
        TileGeometry::new(TBSIZE, self.tile_count)
    }

    /// Check the array size and reduction geometry.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] when the array size is zero or
    /// not a multiple of [`TBSIZE`], or the tile count is out of range.
    pub fn validate(&self) -> Result<()> {
        validate_array_size(self.array_size)?;
        self.geometry().map(|_| ())
    }

    /// Apply `STREAM_ACCEL_*` environment overrides.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn apply_env(mut self) -> Self {
        if let Ok(raw) = env::var(BACKEND_ENV) {
            match BackendPreference::parse(&raw) {
                Some(backend) => self.backend = backend,
                None => tracing::warn!(variable = BACKEND_ENV, value = %raw, "ignoring unknown backend"),
            }
        }
        if let Ok(raw) = env::var(DEVICE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(index) => self.device_index = index,
                Err(_) => tracing::warn!(variable = DEVICE_ENV, value = %raw, "ignoring invalid device index"),
            }
        }
        if let Ok(raw) = env::var(CPU_THREADS_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(threads) => self = self.with_cpu_threads(threads),
                Err(_) => tracing::warn!(variable = CPU_THREADS_ENV, value = %raw, "ignoring invalid thread count"),
            }
        }
        self
    }
}

/// Check that `array_size` is a positive multiple of [`TBSIZE`].
///
/// # Errors
///
/// Returns [`StreamError::Configuration`] otherwise.
pub fn validate_array_size(array_size: usize) -> Result<()> {
    if array_size == 0 || array_size % TBSIZE != 0 {
        return Err(StreamError::configuration(format!(
            "array size must be a positive multiple of {TBSIZE}, got {array_size}"
        )));
    }
    Ok(())
}
