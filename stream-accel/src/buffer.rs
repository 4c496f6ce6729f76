// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Device-resident arrays.
//!
//! A [`DeviceVector`] owns one fixed-length allocation on its backend's
//! device. Host data moves only through [`DeviceVector::write_from`] and
//! [`DeviceVector::read_into`]; both copy the whole array and block until the
//! copy has completed.

use std::fmt;
use std::sync::Arc;

use crate::config::validate_array_size;
use crate::error::TransferFault;
use crate::kernels::StreamBackend;
use crate::metrics;
use crate::{Result, StreamElement, StreamError};

/// Fixed-length array of `T` resident on a backend device.
pub struct DeviceVector<T: StreamElement, B: StreamBackend> {
    backend: Arc<B>,
    storage: B::Buffer<T>,
    len: usize,
}

impl<T: StreamElement, B: StreamBackend> fmt::Debug for DeviceVector<T, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceVector")
            .field("backend", &self.backend.name())
            .field("element", &<T as StreamElement>::NAME)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl<T: StreamElement, B: StreamBackend> DeviceVector<T, B> {
    /// Allocate `len` elements on `backend`'s device.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Configuration`] if `len` is not a positive
    /// multiple of [`TBSIZE`](crate::TBSIZE), checked before allocating, or
    /// if the device cannot hold the array.
    pub fn new(backend: Arc<B>, len: usize) -> Result<Self> {
        validate_array_size(len)?;
        let storage = backend.allocate::<T>(len).map_err(|e| {
            StreamError::configuration(format!(
                "cannot allocate {len} {} elements on {}: {e}",
                <T as StreamElement>::NAME,
                backend.device().name
            ))
        })?;
        metrics::record_allocation(len * std::mem::size_of::<T>());
        Ok(Self {
            backend,
            storage,
            len,
        })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length arrays are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the device allocation.
    #[must_use]
    pub fn size_in_bytes(&self) -> usize {
        self.len * std::mem::size_of::<T>()
    }

    /// Backend that owns the allocation.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn storage(&self) -> &B::Buffer<T> {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut B::Buffer<T> {
        &mut self.storage
    }

    pub(crate) fn check_host_len(&self, actual: usize) -> Result<()> {
        if actual != self.len {
            return Err(TransferFault::LengthMismatch {
                expected: self.len,
                actual,
            }
            .into());
        }
        Ok(())
    }

    /// Copy all of `src` into the device array.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transfer`] if `src.len()` differs from
    /// [`len`](Self::len) or the device copy fails.
    pub fn write_from(&mut self, src: &[T]) -> Result<()> {
        self.check_host_len(src.len())?;
        self.backend
            .upload(&mut self.storage, src)
            .map_err(TransferFault::from)?;
        metrics::record_transfer(self.size_in_bytes());
        Ok(())
    }

    /// Copy the whole device array into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Transfer`] if `dst.len()` differs from
    /// [`len`](Self::len) or the device copy fails.
    pub fn read_into(&self, dst: &mut [T]) -> Result<()> {
        self.check_host_len(dst.len())?;
        self.backend
            .download(&self.storage, dst)
            .map_err(TransferFault::from)?;
        metrics::record_transfer(self.size_in_bytes());
        Ok(())
    }

    /// Copy the device array into a new host vector.
    ///
    /// # Errors
    ///
    /// See [`read_into`](Self::read_into).
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut out = vec![<T as StreamElement>::ZERO; self.len];
        self.read_into(&mut out)?;
        Ok(out)
    }

    /// Set every element to `value` on the device.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::KernelExecution`] if the fill kernel fails.
    pub fn fill(&mut self, value: T) -> Result<()> {
        self.backend
            .fill(&mut self.storage, value)
            .map_err(|e| StreamError::kernel("fill", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::CpuBackend;

    fn backend() -> Arc<CpuBackend> {
        Arc::new(CpuBackend::new(Some(2)).unwrap())
    }

    #[test]
    fn test_roundtrip() {
        let mut vector = DeviceVector::<f64, _>::new(backend(), 2048).unwrap();
        let data: Vec<f64> = (0..2048).map(f64::from).collect();
        vector.write_from(&data).unwrap();
        assert_eq!(vector.to_vec().unwrap(), data);
        assert_eq!(vector.size_in_bytes(), 2048 * 8);
    }

    #[test]
    fn test_invalid_len_allocates_nothing() {
        let backend = backend();
        let result = DeviceVector::<f32, _>::new(Arc::clone(&backend), 1000);
        assert!(matches!(result, Err(StreamError::Configuration(_))));
        assert_eq!(backend.allocation_count(), 0);
    }

    #[test]
    fn test_length_mismatch() {
        let mut vector = DeviceVector::<f32, _>::new(backend(), 1024).unwrap();
        let err = vector.write_from(&[1.0; 1000]).unwrap_err();
        assert!(matches!(
            err,
            StreamError::Transfer(TransferFault::LengthMismatch {
                expected: 1024,
                actual: 1000
            })
        ));

        let mut out = vec![0.0; 2048];
        assert!(matches!(
            vector.read_into(&mut out),
            Err(StreamError::Transfer(_))
        ));
    }

    #[test]
    fn test_fill() {
        let mut vector = DeviceVector::<f32, _>::new(backend(), 1024).unwrap();
        vector.fill(0.5).unwrap();
        assert!(vector.to_vec().unwrap().iter().all(|&x| x == 0.5));
    }
}
