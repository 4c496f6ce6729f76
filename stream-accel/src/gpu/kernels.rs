// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! CubeCL kernels for the STREAM operations.
//!
//! ## Kernel Categories
//!
//! ### Element-wise Operations
//! - [`stream_copy_kernel`] - `c = a`
//! - [`stream_mul_kernel`] - `b = k * c`
//! - [`stream_add_kernel`] - `c = a + b`
//! - [`stream_triad_kernel`] - `a = b + k * c`
//! - [`stream_fill_kernel`] - set every element to a constant
//!
//! ### Reductions
//! - [`tiled_dot_kernel`] - grid-stride products, shared-memory tree fan-in,
//!   one partial sum per cube

use cubecl::prelude::*;

// =============================================================================
// ELEMENT-WISE KERNELS
// =============================================================================

/// `out[i] = input[i]`
#[cube(launch)]
pub fn stream_copy_kernel<F: Float>(input: &Array<F>, out: &mut Array<F>, #[comptime] len: u32) {
    let idx = ABSOLUTE_POS;
    if idx < (len as usize) {
        out[idx] = input[idx];
    }
}

/// `out[i] = k * input[i]`
#[cube(launch)]
pub fn stream_mul_kernel<F: Float>(
    input: &Array<F>,
    out: &mut Array<F>,
    k: F,
    #[comptime] len: u32,
) {
    let idx = ABSOLUTE_POS;
    if idx < (len as usize) {
        out[idx] = k * input[idx];
    }
}

/// `out[i] = x[i] + y[i]`
#[cube(launch)]
pub fn stream_add_kernel<F: Float>(
    x: &Array<F>,
    y: &Array<F>,
    out: &mut Array<F>,
    #[comptime] len: u32,
) {
    let idx = ABSOLUTE_POS;
    if idx < (len as usize) {
        out[idx] = x[idx] + y[idx];
    }
}

/// `out[i] = x[i] + k * y[i]`
#[cube(launch)]
pub fn stream_triad_kernel<F: Float>(
    x: &Array<F>,
    y: &Array<F>,
    out: &mut Array<F>,
    k: F,
    #[comptime] len: u32,
) {
    let idx = ABSOLUTE_POS;
    if idx < (len as usize) {
        out[idx] = x[idx] + k * y[idx];
    }
}

/// `out[i] = value`
#[cube(launch)]
pub fn stream_fill_kernel<F: Float>(out: &mut Array<F>, value: F, #[comptime] len: u32) {
    let idx = ABSOLUTE_POS;
    if idx < (len as usize) {
        out[idx] = value;
    }
}

// =============================================================================
// REDUCTIONS
// =============================================================================

/// One round of the tree fan-in: the lower `half` units absorb the upper half.
#[cube]
fn fan_in_round<F: Float>(scratch: &mut SharedMemory<F>, unit: u32, #[comptime] half: u32) {
    if unit < half {
        scratch[unit as usize] = scratch[unit as usize] + scratch[(unit + half) as usize];
    }
    sync_cube();
}

/// Dot product partial sums.
///
/// Launch with `tile_count` cubes of [`TILE_WIDTH`] units. Unit `l` of cube
/// `t` accumulates `a[g] * b[g]` for `g = t * TILE_WIDTH + l`, stepping by
/// `TILE_WIDTH * tile_count`, then the cube folds its shared memory and unit
/// 0 writes `partial_sums[t]`.
///
/// # Arguments
///
/// * `a`, `b` - Input vectors
/// * `partial_sums` - One slot per cube
/// * `len` - Vector length
/// * `tile_count` - Number of cubes launched
#[cube(launch)]
pub fn tiled_dot_kernel<F: Float>(
    a: &Array<F>,
    b: &Array<F>,
    partial_sums: &mut Array<F>,
    #[comptime] len: u32,
    #[comptime] tile_count: u32,
) {
    let tile = CUBE_POS_X;
    let unit = UNIT_POS_X;

    let mut scratch = SharedMemory::<F>::new(1024usize);

    let mut sum = F::new(0.0);
    let mut g = (tile * 1024u32 + unit) as usize;
    while g < (len as usize) {
        sum += a[g] * b[g];
        g += (1024u32 * tile_count) as usize;
    }
    scratch[unit as usize] = sum;
    sync_cube();

    fan_in_round::<F>(&mut scratch, unit, 512u32);
    fan_in_round::<F>(&mut scratch, unit, 256u32);
    fan_in_round::<F>(&mut scratch, unit, 128u32);
    fan_in_round::<F>(&mut scratch, unit, 64u32);
    fan_in_round::<F>(&mut scratch, unit, 32u32);
    fan_in_round::<F>(&mut scratch, unit, 16u32);
    fan_in_round::<F>(&mut scratch, unit, 8u32);
    fan_in_round::<F>(&mut scratch, unit, 4u32);
    fan_in_round::<F>(&mut scratch, unit, 2u32);
    fan_in_round::<F>(&mut scratch, unit, 1u32);

    if unit == 0u32 {
        partial_sums[tile as usize] = scratch[0usize];
    }
}

// =============================================================================
// KERNEL LAUNCH CONFIGURATION
// =============================================================================

/// Units per cube for element-wise kernels.
pub const BLOCK_SIZE: u32 = 256;

/// Units per cube for [`tiled_dot_kernel`]; its fan-in is unrolled for this width.
pub const TILE_WIDTH: u32 = 1024;

/// Calculate grid size for a given problem size and block size.
#[inline]
#[must_use]
pub const fn grid_size(problem_size: u32, block_size: u32) -> u32 {
    problem_size.div_ceil(block_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_size() {
        assert_eq!(grid_size(1024, 256), 4);
        assert_eq!(grid_size(1025, 256), 5);
        assert_eq!(grid_size(0, 256), 0);
    }

    #[test]
    fn test_tile_width_matches_host() {
        assert_eq!(TILE_WIDTH as usize, crate::TBSIZE);
    }
}
