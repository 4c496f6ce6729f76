// SPDX-License-Identifier: MIT
// Copyright 2026 Tyler Zervas

//! Process-wide byte counters for device allocations and host/device copies.

use std::sync::atomic::{AtomicU64, Ordering};

static ALLOCATED_BYTES: AtomicU64 = AtomicU64::new(0);
static TRANSFERRED_BYTES: AtomicU64 = AtomicU64::new(0);

pub(crate) fn record_allocation(bytes: usize) {
    ALLOCATED_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

pub(crate) fn record_transfer(bytes: usize) {
    TRANSFERRED_BYTES.fetch_add(bytes as u64, Ordering::Relaxed);
}

/// Total bytes allocated on any backend since process start.
#[must_use]
pub fn allocated_bytes_total() -> u64 {
    ALLOCATED_BYTES.load(Ordering::Relaxed)
}

/// Total bytes copied host to device or device to host.
#[must_use]
pub fn transferred_bytes_total() -> u64 {
    TRANSFERRED_BYTES.load(Ordering::Relaxed)
}
