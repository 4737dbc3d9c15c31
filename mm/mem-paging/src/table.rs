//! Typed, frame-sized table wrappers.
//!
//! Each wrapper is exactly the in-memory shape the walker hardware expects;
//! they are always reached through [`crate::PhysAccess`] at a frame the
//! allocator handed out.

use crate::{L1e, L2e, Pdpte};

/// Entries in a page directory.
pub const PD_ENTRIES: usize = 512;

/// Entries in a linear-map page table.
pub const PT_ENTRIES: usize = 512;

/// Entries in the PAE root table.
pub const PDPT_ENTRIES: usize = 4;

/// The 4-entry PAE root table. Occupies a full frame for allocator
/// simplicity even though hardware only reads the first 32 bytes.
#[repr(C, align(4096))]
pub struct PdptTable {
    entries: [Pdpte; PDPT_ENTRIES],
}

/// One page directory: 512 [`L2e`] slots covering 1 GiB.
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [L2e; PD_ENTRIES],
}

/// The linear-map page table: 512 [`L1e`] slots covering 2 MiB.
#[repr(C, align(4096))]
pub struct LinearTable {
    entries: [L1e; PT_ENTRIES],
}

impl PdptTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> Pdpte {
        self.entries[i]
    }

    #[inline]
    pub const fn set(&mut self, i: usize, e: Pdpte) {
        self.entries[i] = e;
    }

    /// Clear every entry; used right after the root frame is allocated.
    pub fn reset(&mut self) {
        self.entries = [Pdpte::ZERO; PDPT_ENTRIES];
    }
}

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> L2e {
        self.entries[i]
    }

    #[inline]
    pub const fn set(&mut self, i: usize, e: L2e) {
        self.entries[i] = e;
    }

    pub fn reset(&mut self) {
        self.entries = [L2e::ZERO; PD_ENTRIES];
    }
}

impl LinearTable {
    #[inline]
    #[must_use]
    pub const fn get(&self, i: usize) -> L1e {
        self.entries[i]
    }

    #[inline]
    pub const fn set(&mut self, i: usize, e: L1e) {
        self.entries[i] = e;
    }

    pub fn reset(&mut self) {
        self.entries = [L1e::ZERO; PT_ENTRIES];
    }
}
