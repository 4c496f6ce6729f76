// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Device descriptions and listing.
//!
//! Listing devices is only needed to pick a device index; engines never
//! consult it after construction.

use std::fmt;

use serde::Serialize;

use crate::config::{BackendPreference, StreamConfig};
use crate::kernels::CpuBackend;

/// Kind of device a backend executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Host CPU driven by a thread pool.
    Cpu,
    /// NVIDIA GPU driven through CUDA.
    Cuda,
}

impl DeviceKind {
    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
        }
    }
}

/// A device a backend can allocate on and launch kernels on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Index within the owning backend's device list.
    pub index: usize,
    /// Human-readable name.
    pub name: String,
    /// Device kind.
    pub kind: DeviceKind,
}

impl DeviceInfo {
    /// Create a device description.
    pub fn new(index: usize, name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            index,
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.index, self.name, self.kind.as_str())
    }
}

/// Devices reachable with the backend preference in `config`.
///
/// Indices are only meaningful for the backend that `config` would select:
/// `Auto` lists accelerators when any are present and the CPU otherwise.
#[must_use]
pub fn list_devices(config: &StreamConfig) -> Vec<DeviceInfo> {
    let accelerators = match config.backend {
        BackendPreference::Cpu => Vec::new(),
        BackendPreference::Auto | BackendPreference::Gpu => accelerator_devices(),
    };
    if config.backend == BackendPreference::Gpu || !accelerators.is_empty() {
        return accelerators;
    }
    CpuBackend::host_devices()
}

#[cfg(feature = "cuda")]
fn accelerator_devices() -> Vec<DeviceInfo> {
    crate::kernels::CubeclBackend::probe_devices()
}

#[cfg(not(feature = "cuda"))]
fn accelerator_devices() -> Vec<DeviceInfo> {
    Vec::new()
}

/// Render a device list the way a driver prints it for `--list`.
#[must_use]
pub fn format_device_list(devices: &[DeviceInfo]) -> String {
    if devices.is_empty() {
        return "No devices found.\n".to_string();
    }
    let mut out = String::from("\nDevices:\n");
    for device in devices {
        out.push_str(&format!("{}: {}\n", device.index, device.name));
    }
    out.push('\n');
    out
}
