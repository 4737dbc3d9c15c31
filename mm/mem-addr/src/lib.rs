//! # Memory Addresses and Layout Constants
//!
//! Newtypes for the three address kinds the memory manager juggles, plus the
//! fixed layout constants everything else is sized against.
//!
//! - [`PhysAddr`]: a physical (bus) address. PAE on i386 addresses up to
//!   64 GiB, so this is a `u64` even though the virtual space is 32-bit.
//! - [`VirtAddr`]: a 32-bit virtual address.
//! - [`Pfn`]: a physical frame number, a physical address divided by the
//!   4 KiB frame size. The frame database is indexed by it.
//!
//! ## Translation layout
//!
//! The PAE variant used here is two-level for everything except the fixed
//! linear-map window:
//!
//! ```text
//! VA = [PDPT:2] [PD:9] [Offset:21]          (2 MiB leaf, the normal case)
//! VA = [PDPT:2] [PD:9] [PT:9] [Offset:12]   (4 KiB, linear map only)
//! ```
//!
//! Index extractors live on [`VirtAddr`] so table code never open-codes the
//! shifts.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod addr;
pub mod layout;

pub use addr::{MemoryAddress, PhysAddr, Pfn, VirtAddr};

/// Align `x` down to the nearest multiple of `a` (`a` a power of two).
///
/// ### Examples
/// ```rust
/// # use mem_addr::align_down;
/// assert_eq!(align_down(0, 4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a` (`a` a power of two).
///
/// `x + (a - 1)` must not overflow.
///
/// ### Examples
/// ```rust
/// # use mem_addr::align_up;
/// assert_eq!(align_up(0, 4096), 0);
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
