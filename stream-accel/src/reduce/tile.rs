// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Host execution of the tiled reduction.
//!
//! A tile runs its work-items phase by phase. Within a phase every work-item
//! executes once and arrives at the tile barrier; the next phase starts only
//! when the whole tile has arrived. Tiles share nothing and run in parallel.

use rayon::prelude::*;

use crate::error::{DeviceError, DeviceResult};
use crate::reduce::TileGeometry;
use crate::StreamElement;

/// Arrival counter for one tile.
#[derive(Debug)]
pub(crate) struct TileBarrier {
    tile: usize,
    width: usize,
    arrived: usize,
}

impl TileBarrier {
    pub(crate) fn new(tile: usize, width: usize) -> Self {
        Self {
            tile,
            width,
            arrived: 0,
        }
    }

    pub(crate) fn arrive(&mut self) {
        self.arrived += 1;
    }

    /// Release the tile if every work-item arrived, then reset.
    ///
    /// The sequential [`Tile`] phase always arrives `width` times. The count
    /// check guards work-item bodies that run concurrently within a tile.
    pub(crate) fn wait(&mut self) -> DeviceResult<()> {
        let arrived = std::mem::take(&mut self.arrived);
        if arrived != self.width {
            return Err(DeviceError::Barrier {
                tile: self.tile,
                arrived,
                expected: self.width,
            });
        }
        Ok(())
    }
}

/// One tile: its scratch storage and barrier.
#[derive(Debug)]
pub(crate) struct Tile<T> {
    index: usize,
    scratch: Vec<T>,
    barrier: TileBarrier,
}

impl<T: StreamElement> Tile<T> {
    pub(crate) fn new(index: usize, width: usize) -> Self {
        Self {
            index,
            scratch: vec![<T as StreamElement>::ZERO; width],
            barrier: TileBarrier::new(index, width),
        }
    }

    fn width(&self) -> usize {
        self.scratch.len()
    }

    /// Run `body` for every work-item, then synchronise.
    fn phase(&mut self, mut body: impl FnMut(usize, &mut [T])) -> DeviceResult<()> {
        for local in 0..self.width() {
            body(local, &mut self.scratch);
            self.barrier.arrive();
        }
        self.barrier.wait()
    }

    /// Execute the tile program and return the tile's partial sum.
    pub(crate) fn dot(mut self, a: &[T], b: &[T], geometry: TileGeometry) -> DeviceResult<T> {
        let width = self.width();
        let stride = geometry.dispatch_width();
        let len = a.len().min(b.len());
        let base = self.index * width;

        self.phase(|local, scratch| {
            let mut sum = <T as StreamElement>::ZERO;
            let mut g = base + local;
            while g < len {
                sum = sum + a[g] * b[g];
                g += stride;
            }
            scratch[local] = sum;
        })?;

        let mut half = width / 2;
        while half > 0 {
            self.phase(|local, scratch| {
                if local < half {
                    scratch[local] = scratch[local] + scratch[local + half];
                }
            })?;
            half /= 2;
        }

        Ok(self.scratch[0])
    }
}

/// Run every tile of the reduction over `a` and `b`, in parallel.
pub(crate) fn tiled_dot<T: StreamElement>(
    a: &[T],
    b: &[T],
    geometry: TileGeometry,
) -> DeviceResult<Vec<T>> {
    (0..geometry.tile_count())
        .into_par_iter()
        .map(|index| Tile::new(index, geometry.tile_width()).dot(a, b, geometry))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_requires_full_tile() {
        let mut barrier = TileBarrier::new(2, 4);
        for _ in 0..3 {
            barrier.arrive();
        }
        let err = barrier.wait().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Barrier {
                tile: 2,
                arrived: 3,
                expected: 4
            }
        ));
    }

    #[test]
    fn test_barrier_resets_after_wait() {
        let mut barrier = TileBarrier::new(0, 2);
        barrier.arrive();
        barrier.arrive();
        assert!(barrier.wait().is_ok());
        barrier.arrive();
        assert!(barrier.wait().is_err());
    }

    #[test]
    fn test_single_tile_sum() {
        let geometry = TileGeometry::new(4, 1).unwrap();
        let a: Vec<f64> = (1..=8).map(f64::from).collect();
        let b = vec![1.0; 8];
        let partials = tiled_dot(&a, &b, geometry).unwrap();
        assert_eq!(partials, vec![36.0]);
    }

    #[test]
    fn test_grid_stride_assignment() {
        // width 2, 2 tiles, 8 elements: tile 0 owns {0,1,4,5}, tile 1 owns {2,3,6,7}.
        let geometry = TileGeometry::new(2, 2).unwrap();
        let a: Vec<f64> = (0..8).map(f64::from).collect();
        let b = vec![1.0; 8];
        let partials = tiled_dot(&a, &b, geometry).unwrap();
        assert_eq!(partials, vec![0.0 + 1.0 + 4.0 + 5.0, 2.0 + 3.0 + 6.0 + 7.0]);
    }

    #[test]
    fn test_width_one_tile() {
        let geometry = TileGeometry::new(1, 3).unwrap();
        let a = vec![2.0f32; 6];
        let b = vec![0.5f32; 6];
        let partials = tiled_dot(&a, &b, geometry).unwrap();
        assert_eq!(partials, vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_idle_tiles_contribute_zero() {
        let geometry = TileGeometry::new(4, 4).unwrap();
        let a = vec![1.0f64; 4];
        let b = vec![3.0f64; 4];
        let partials = tiled_dot(&a, &b, geometry).unwrap();
        assert_eq!(partials, vec![12.0, 0.0, 0.0, 0.0]);
    }
}
