//! # Physical Frame Management
//!
//! Ground truth for every physical frame in the machine, and the allocator
//! that hands frames out:
//!
//! - [`FrameDb`]: the page-frame database. One record per frame, indexed by
//!   PFN, alive for the kernel lifetime. Free runs ("pagezones") are encoded
//!   in the records themselves through boundary-marker types, so the
//!   database is the single source of truth for both ownership and
//!   adjacency.
//! - [`FrameAllocator`]: first-fit allocation of contiguous frame ranges
//!   under an address-tier policy, and the exact-inverse free with
//!   coalescing.
//! - [`boot::sysboot`]: the one-shot boot entry that populates the database
//!   from the discovered memory map.
//!
//! ## Locking
//!
//! Neither type locks internally; the kernel owns the single global
//! allocator behind the [`SpinLock`](mem_sync::SpinLock) installed via
//! [`install`]. The database is never safe for unsynchronized concurrent
//! mutation of the same record.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod boot;
mod pfndb;
mod pgalloc;

pub use pfndb::{FrameDb, FrameRecord, FrameType, PageZone, SlabRef};
pub use pgalloc::{AllocError, AllocFlags, FrameAllocator};

use mem_sync::{BootCell, SpinLock};

static PHYS: BootCell<SpinLock<FrameAllocator>> = BootCell::new();

/// Install the boot-built allocator as the process-wide singleton.
/// Called exactly once, by the boot sequencer; panics on a second call.
pub fn install(allocator: FrameAllocator) {
    PHYS.init(SpinLock::new(allocator));
}

/// The global frame allocator. Panics if boot has not installed it yet.
#[must_use]
pub fn frames() -> &'static SpinLock<FrameAllocator> {
    PHYS.get().expect("physical memory manager not initialized")
}
