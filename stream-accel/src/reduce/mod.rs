// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Tiled dot-product reduction.
//!
//! The reduction launches `tile_count` tiles of `tile_width` work-items. Each
//! work-item accumulates `a[g] * b[g]` over a grid-stride loop, the tile folds
//! its scratch values with a barrier-separated tree, and work-item 0 of every
//! tile writes one partial sum. The host finishes by summing the partials.
//!
//! ```text
//! tile t, work-item l:
//!   g = t * W + l, step D = W * tile_count      (grid-stride accumulate)
//!   scratch[l] = sum                            barrier
//!   for h in W/2, W/4, .., 1:
//!     l < h: scratch[l] += scratch[l + h]       barrier
//!   l == 0: partials[t] = scratch[0]
//! host: dot = partials[0] + .. + partials[tile_count - 1]
//! ```

pub(crate) mod tile;

use crate::error::DeviceError;
use crate::kernels::StreamBackend;
use crate::{Result, StreamElement, StreamError};

/// Work-items per tile.
pub const TBSIZE: usize = 1024;

/// Tiles launched by the dot-product reduction.
pub const DEFAULT_TILE_COUNT: usize = 64;

/// Upper bound on the tile count of one dispatch.
pub const MAX_TILE_COUNT: usize = 1 << 16;

/// Shape of the dot-product dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    tile_width: usize,
    tile_count: usize,
}

impl Default for TileGeometry {
    fn default() -> Self {
        Self {
            tile_width: TBSIZE,
            tile_count: DEFAULT_TILE_COUNT,
        }
    }
}

impl TileGeometry {
    /// Create a geometry.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if `tile_width` is not a power
    /// of two, `tile_count` is zero or above [`MAX_TILE_COUNT`], or the
    /// dispatch width does not fit a 32-bit device index.
    pub fn new(tile_width: usize, tile_count: usize) -> Result<Self> {
        if !tile_width.is_power_of_two() {
            return Err(StreamError::configuration(format!(
                "tile width must be a power of two, got {tile_width}"
            )));
        }
        if tile_count == 0 {
            return Err(StreamError::configuration("tile count must be positive"));
        }
        if tile_count > MAX_TILE_COUNT {
            return Err(StreamError::configuration(format!(
                "tile count {tile_count} exceeds the maximum of {MAX_TILE_COUNT}"
            )));
        }
        let fits = tile_width
            .checked_mul(tile_count)
            .is_some_and(|width| u32::try_from(width).is_ok());
        if !fits {
            return Err(StreamError::configuration(format!(
                "dispatch of {tile_count} tiles of width {tile_width} overflows the device index range"
            )));
        }
        Ok(Self {
            tile_width,
            tile_count,
        })
    }

    /// Work-items per tile.
    #[must_use]
    pub fn tile_width(&self) -> usize {
        self.tile_width
    }

    /// Number of tiles.
    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Total work-items per dispatch; the grid-stride step.
    #[must_use]
    pub fn dispatch_width(&self) -> usize {
        self.tile_width * self.tile_count
    }
}

/// One partial sum per tile, read back from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialSums<T> {
    sums: Vec<T>,
}

impl<T: StreamElement> PartialSums<T> {
    /// Wrap the values produced by a tiled dispatch.
    #[must_use]
    pub fn new(sums: Vec<T>) -> Self {
        Self { sums }
    }

    /// Number of tiles that contributed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sums.len()
    }

    /// Returns true if no tile contributed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Partial sums in tile order.
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        &self.sums
    }

    /// Sum the partials in tile order with a double-precision accumulator.
    #[must_use]
    pub fn total(&self) -> T {
        let sum: f64 = self.sums.iter().fold(0.0, |acc, &p| acc + p.widen());
        T::narrow(sum)
    }
}

/// Drives the tiled reduction on a backend and finishes it on the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct TiledReducer {
    geometry: TileGeometry,
}

impl TiledReducer {
    /// Create a reducer for `geometry`.
    #[must_use]
    pub fn new(geometry: TileGeometry) -> Self {
        Self { geometry }
    }

    /// Geometry used for every dispatch.
    #[must_use]
    pub fn geometry(&self) -> TileGeometry {
        self.geometry
    }

    /// Launch the tiled dispatch over `len` elements and read back the partials.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Reduction`] if the dispatch, a tile barrier, or
    /// the partial-sum transfer fails.
    pub fn partials<B, T>(
        &self,
        backend: &B,
        a: &B::Buffer<T>,
        b: &B::Buffer<T>,
        len: usize,
    ) -> Result<PartialSums<T>>
    where
        B: StreamBackend,
        T: StreamElement,
    {
        let sums = backend
            .launch_tiled_dot(a, b, len, self.geometry)
            .map_err(StreamError::Reduction)?;
        if sums.len() != self.geometry.tile_count {
            return Err(StreamError::Reduction(DeviceError::copy(format!(
                "expected {} partial sums, device returned {}",
                self.geometry.tile_count,
                sums.len()
            ))));
        }
        Ok(PartialSums::new(sums))
    }

    /// `sum(a[i] * b[i])` over `len` elements.
    ///
    /// # Errors
    ///
    /// See [`TiledReducer::partials`].
    pub fn dot<B, T>(&self, backend: &B, a: &B::Buffer<T>, b: &B::Buffer<T>, len: usize) -> Result<T>
    where
        B: StreamBackend,
        T: StreamElement,
    {
        let partials = self.partials(backend, a, b, len)?;
        tracing::trace!(tiles = partials.len(), "reducing partial sums on host");
        Ok(partials.total())
    }
}
