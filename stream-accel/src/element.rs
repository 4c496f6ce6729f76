// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Scalar element types accepted by device arrays.

use std::fmt::{Debug, Display};
use std::ops::{Add, Mul};

#[cfg(feature = "cuda")]
mod device_scalar {
    use cubecl::prelude::{CubeElement, Float};

    /// Extra bounds a scalar needs to be launched through CubeCL.
    pub trait DeviceScalar: Float + CubeElement {}

    impl<T: Float + CubeElement> DeviceScalar for T {}
}

#[cfg(not(feature = "cuda"))]
mod device_scalar {
    /// Extra bounds a scalar needs to be launched on an accelerator backend.
    pub trait DeviceScalar {}

    impl<T> DeviceScalar for T {}
}

pub use device_scalar::DeviceScalar;

/// Floating-point scalar stored in a [`DeviceVector`](crate::DeviceVector).
///
/// Implemented for `f32` and `f64`.
pub trait StreamElement:
    Copy
    + Default
    + PartialEq
    + PartialOrd
    + Debug
    + Display
    + Send
    + Sync
    + Add<Output = Self>
    + Mul<Output = Self>
    + DeviceScalar
    + 'static
{
    /// Additive identity.
    const ZERO: Self;
    /// Scale factor used by `mul` and `triad`, in this type's precision.
    const SCALAR: Self;
    /// Type name for logs and reports.
    const NAME: &'static str;
    /// Significand bits; integers up to `2^SIGNIFICAND_BITS` are exact.
    const SIGNIFICAND_BITS: u32;

    /// Convert from `f64`, rounding to nearest.
    fn narrow(value: f64) -> Self;

    /// Widen to `f64`.
    fn widen(self) -> f64;

    /// Largest integer below which every integer is exactly representable.
    #[must_use]
    fn max_exact_integer() -> f64 {
        2f64.powi(<Self as StreamElement>::SIGNIFICAND_BITS as i32)
    }
}

macro_rules! impl_stream_element {
    ($t:ty, $name:literal) => {
        impl StreamElement for $t {
            const ZERO: Self = 0.0;
            const SCALAR: Self = 0.3;
            const NAME: &'static str = $name;
            const SIGNIFICAND_BITS: u32 = <$t>::MANTISSA_DIGITS;

            #[inline]
            fn narrow(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn widen(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_stream_element!(f32, "f32");
impl_stream_element!(f64, "f64");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_in_native_precision() {
        assert_eq!(<f32 as StreamElement>::SCALAR, 0.3f32);
        assert_eq!(<f64 as StreamElement>::SCALAR, 0.3f64);
    }

    #[test]
    fn test_exact_integer_range() {
        assert_eq!(<f32 as StreamElement>::max_exact_integer(), 16_777_216.0);
        assert_eq!(<f64 as StreamElement>::max_exact_integer(), 9_007_199_254_740_992.0);
    }

    #[test]
    fn test_f64_roundtrip() {
        assert_eq!(f32::narrow(1.5).widen(), 1.5);
        assert_eq!(<f64 as StreamElement>::NAME, "f64");
    }
}
