// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! CubeCL kernel definitions for the CUDA backend.
//!
//! Launching and buffer management live in
//! [`CubeclBackend`](crate::kernels::CubeclBackend); this module only holds
//! the device code.
//!
//! ## Feature Gate
//!
//! This module requires the `cuda` feature:
//!
//! ```toml
//! [dependencies]
//! stream-accel = { version = "0.1", features = ["cuda"] }
//! ```

pub mod kernels;
