//! # PAE Page-Table Format
//!
//! Bit-exact types for the PAE paging variant this kernel uses, plus the
//! pure TLB flush-class decision the page-table manager consults on every
//! mapping change.
//!
//! ## The format
//!
//! Hardware consumes these words directly, so layout is non-negotiable:
//!
//! - [`Pdpte`]: one of the four root entries. PAE root entries carry only
//!   Present/PWT/PCD plus the page-directory address; the permission bits
//!   that exist at lower levels are **reserved** here and must stay zero.
//! - [`L2e`]: a page-directory entry. The normal form is a 2 MiB leaf
//!   (PS=1); the non-leaf form (PS=0) exists only to reach the fixed 4 KiB
//!   linear-map window and addresses a [`LinearTable`].
//! - [`L1e`]: a 4 KiB entry inside that window. Bit 7 is PAT here, not PS.
//!
//! Leaf entries never mix granularities for the same virtual range: a PD
//! slot is either a 2 MiB leaf or a table pointer, never both over time for
//! ranges outside the linear-map window.
//!
//! ## Seams
//!
//! The two traits at the bottom keep this crate free of any allocator or
//! hardware dependency: [`PtableSource`] supplies page-table frames,
//! [`PhysAccess`] turns a physical frame into a typed reference (the kernel
//! implements it with its linear map; tests with simulated RAM).

#![cfg_attr(not(any(test, doctest)), no_std)]

mod entry;
mod table;
mod tlb;

pub use entry::{L1e, L2Kind, L2e, Pdpte, Prot};
pub use table::{LinearTable, PageDirectory, PdptTable, PD_ENTRIES, PDPT_ENTRIES, PT_ENTRIES};
pub use tlb::{flush_class, FlushClass};

use mem_addr::{Pfn, PhysAddr};

/// Supplies and reclaims physical frames for page tables.
///
/// The physical frame allocator implements this by drawing frames typed as
/// page-table frames. Returned frame contents are **undefined**; the caller
/// zeroes them before linking.
pub trait PtableSource {
    /// One 4 KiB frame for a page table, or `None` on exhaustion.
    fn alloc_table(&mut self) -> Option<Pfn>;

    /// Return a frame previously obtained from [`alloc_table`](Self::alloc_table).
    fn free_table(&mut self, pfn: Pfn);
}

/// Turns physical addresses into references the CPU can use.
///
/// In the kernel this is the permanent linear map of low physical memory;
/// in tests it is a vector of simulated frames.
pub trait PhysAccess {
    /// Borrow the object of type `T` living at physical address `pa`.
    ///
    /// # Safety
    /// - `pa` must point at a live, exclusively-owned object of type `T`
    ///   with suitable alignment, and the returned lifetime must not
    ///   outlive it.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T;

    /// Borrow `len` bytes starting at `pa`.
    ///
    /// # Safety
    /// - The range must be valid readable memory not crossing a frame the
    ///   implementation cannot reach.
    unsafe fn phys_bytes<'a>(&self, pa: PhysAddr, len: usize) -> &'a [u8];

    /// Borrow `len` bytes starting at `pa`, writable.
    ///
    /// # Safety
    /// - As [`phys_bytes`](Self::phys_bytes), plus exclusive access.
    unsafe fn phys_bytes_mut<'a>(&self, pa: PhysAddr, len: usize) -> &'a mut [u8];
}
