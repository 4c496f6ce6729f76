// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Error types for stream-accel.
//!
//! Backends report [`DeviceError`]. The layer that owns an operation maps it
//! onto the [`StreamError`] taxonomy: buffers produce `Transfer`, elementwise
//! dispatch produces `KernelExecution`, the tiled reducer produces `Reduction`.
//! Every error is terminal for the call that raised it.

use thiserror::Error;

/// Result type alias for stream-accel operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Result type alias for backend-level operations.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors surfaced by [`StreamEngine`](crate::StreamEngine) and [`DeviceVector`](crate::DeviceVector).
#[derive(Debug, Error)]
pub enum StreamError {
    /// Invalid array size, tile geometry, device index or backend selection.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A host/device bulk transfer could not be completed.
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferFault),

    /// An elementwise kernel failed during dispatch or completion wait.
    #[error("kernel `{kernel}` failed: {source}")]
    KernelExecution {
        /// Name of the kernel that failed.
        kernel: &'static str,
        /// Underlying device failure.
        #[source]
        source: DeviceError,
    },

    /// The tiled dot-product reduction or its partial-sum transfer failed.
    #[error("reduction failed: {0}")]
    Reduction(#[source] DeviceError),
}

impl StreamError {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a kernel execution error for the named kernel.
    pub fn kernel(kernel: &'static str, source: DeviceError) -> Self {
        Self::KernelExecution { kernel, source }
    }
}

/// Why a transfer failed.
#[derive(Debug, Error)]
pub enum TransferFault {
    /// The host sequence length differs from the device array length.
    #[error("length mismatch: device array holds {expected} elements, host sequence has {actual}")]
    LengthMismatch {
        /// Device array length.
        expected: usize,
        /// Host sequence length.
        actual: usize,
    },

    /// The device reported a failure while copying.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Failures reported by an execution backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The requested device or runtime is not present.
    #[error("device not available: {0}")]
    NotAvailable(String),

    /// Device memory could not be allocated.
    #[error("allocation of {bytes} bytes failed: {reason}")]
    Allocation {
        /// Requested allocation size.
        bytes: usize,
        /// Backend-specific reason.
        reason: String,
    },

    /// A kernel could not be launched.
    #[error("launch failed: {0}")]
    Launch(String),

    /// Waiting for device completion failed.
    #[error("completion wait failed: {0}")]
    Sync(String),

    /// A host/device copy failed.
    #[error("copy failed: {0}")]
    Copy(String),

    /// Not every work-item of a tile reached a barrier.
    #[error("barrier in tile {tile}: {arrived} of {expected} work-items arrived")]
    Barrier {
        /// Tile index.
        tile: usize,
        /// Work-items that arrived.
        arrived: usize,
        /// Tile width.
        expected: usize,
    },

    /// A buffer allocated by one backend was handed to another.
    #[error("buffer belongs to the {owner} backend, not {backend}")]
    ForeignBuffer {
        /// Backend that allocated the buffer.
        owner: &'static str,
        /// Backend that received it.
        backend: &'static str,
    },
}

impl DeviceError {
    /// Create a launch error.
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a completion-wait error.
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::Sync(msg.into())
    }

    /// Create a copy error.
    pub fn copy(msg: impl Into<String>) -> Self {
        Self::Copy(msg.into())
    }

    /// Create a device-not-available error.
    pub fn not_available(msg: impl Into<String>) -> Self {
        Self::NotAvailable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_fault_display() {
        let err = StreamError::from(TransferFault::LengthMismatch {
            expected: 1024,
            actual: 1000,
        });
        assert_eq!(
            err.to_string(),
            "transfer error: length mismatch: device array holds 1024 elements, host sequence has 1000"
        );
    }

    #[test]
    fn test_kernel_error_keeps_source() {
        let err = StreamError::kernel("triad", DeviceError::launch("no context"));
        assert_eq!(err.to_string(), "kernel `triad` failed: launch failed: no context");
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("launch failed: no context"));
    }

    #[test]
    fn test_barrier_display() {
        let err = StreamError::Reduction(DeviceError::Barrier {
            tile: 3,
            arrived: 1023,
            expected: 1024,
        });
        assert!(err.to_string().contains("tile 3: 1023 of 1024"));
    }
}
