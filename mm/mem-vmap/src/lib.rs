//! # Kernel Virtual-Region Allocator
//!
//! Hands out non-overlapping virtual ranges from one managed kernel
//! window. Purely a bookkeeper: it never touches physical frames or page
//! tables. Callers populate and tear down the actual mappings themselves
//! (kernel mapping windows, 32-bit-addressable DMA windows).
//!
//! The window is an ordered, gap-free sequence of regions, each `Free` or
//! `Mapped`; neighbors of the same kind are always coalesced, so the region
//! list is canonical for any history of `alloc`/`free`.
//!
//! One [`VirtMap`] per managed window; the kernel wraps each in its own
//! lock.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use mem_addr::layout::FRAME_SIZE;
use mem_addr::{align_up, VirtAddr};

/// State of one region of the window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RegionKind {
    Free,
    Mapped,
}

/// A region as reported by [`VirtMap::info`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegionInfo {
    pub base: VirtAddr,
    pub size: u32,
    pub kind: RegionKind,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Region {
    base: VirtAddr,
    size: u32,
    kind: RegionKind,
}

#[derive(Debug, thiserror::Error)]
pub enum VmapError {
    #[error("no free region of {0} bytes in the window")]
    Exhausted(u32),
    #[error("address {0} is outside the managed window")]
    Unmanaged(VirtAddr),
}

/// Free/used accounting for one kernel virtual window.
pub struct VirtMap {
    base: VirtAddr,
    size: u32,
    /// Ordered, non-overlapping, covering `[base, base + size)` exactly.
    regions: Vec<Region>,
}

impl VirtMap {
    /// Manage the window `[base, base + size)`, initially all free.
    /// Bounds are page-granular.
    #[must_use]
    pub fn new(base: VirtAddr, size: u32) -> Self {
        let page = FRAME_SIZE as u32;
        assert!(size > 0 && base.is_aligned_to(page), "bad window bounds");
        assert!(size % page == 0, "window size not page-granular");
        Self {
            base,
            size,
            regions: vec![Region {
                base,
                size,
                kind: RegionKind::Free,
            }],
        }
    }

    /// Reserve a free region of at least `size` bytes (rounded up to page
    /// granularity), first-fit.
    ///
    /// # Errors
    /// [`VmapError::Exhausted`] when no free region is large enough.
    pub fn alloc(&mut self, size: u32) -> Result<VirtAddr, VmapError> {
        assert!(size > 0, "zero-size virtual allocation");
        let size = u32::try_from(align_up(u64::from(size), FRAME_SIZE))
            .map_err(|_| VmapError::Exhausted(size))?;

        let Some(i) = self
            .regions
            .iter()
            .position(|r| r.kind == RegionKind::Free && r.size >= size)
        else {
            log::warn!("virtual window exhausted: wanted {size} bytes");
            return Err(VmapError::Exhausted(size));
        };

        let region = self.regions[i];
        if region.size > size {
            // Split: mapped head, free tail.
            self.regions[i] = Region {
                base: region.base,
                size,
                kind: RegionKind::Mapped,
            };
            self.regions.insert(
                i + 1,
                Region {
                    base: region.base + size,
                    size: region.size - size,
                    kind: RegionKind::Free,
                },
            );
        } else {
            self.regions[i].kind = RegionKind::Mapped;
        }
        log::trace!("vmap: reserved {size} bytes at {}", region.base);
        Ok(region.base)
    }

    /// Release the mapped region at `va` (must be a region base with the
    /// originally requested size), coalescing with free neighbors.
    ///
    /// # Panics
    /// Releasing anything that is not exactly a mapped region is an
    /// invariant violation: callers free exactly what they reserved.
    pub fn free(&mut self, va: VirtAddr, size: u32) {
        let size = u32::try_from(align_up(u64::from(size), FRAME_SIZE)).expect("size overflow");
        let Some(i) = self
            .regions
            .iter()
            .position(|r| r.base == va && r.size == size && r.kind == RegionKind::Mapped)
        else {
            panic!("freeing unowned virtual range at {va} ({size} bytes)");
        };

        self.regions[i].kind = RegionKind::Free;
        // Merge with the free neighbor after, then before.
        if i + 1 < self.regions.len() && self.regions[i + 1].kind == RegionKind::Free {
            self.regions[i].size += self.regions[i + 1].size;
            self.regions.remove(i + 1);
        }
        if i > 0 && self.regions[i - 1].kind == RegionKind::Free {
            self.regions[i - 1].size += self.regions[i].size;
            self.regions.remove(i);
        }
    }

    /// The region containing `va`, for diagnostics.
    ///
    /// # Errors
    /// [`VmapError::Unmanaged`] when `va` lies outside the window.
    pub fn info(&self, va: VirtAddr) -> Result<RegionInfo, VmapError> {
        self.regions
            .iter()
            .find(|r| va >= r.base && u64::from(va.as_u32()) < u64::from(r.base.as_u32()) + u64::from(r.size))
            .map(|r| RegionInfo {
                base: r.base,
                size: r.size,
                kind: r.kind,
            })
            .ok_or(VmapError::Unmanaged(va))
    }

    #[must_use]
    pub const fn window_base(&self) -> VirtAddr {
        self.base
    }

    #[must_use]
    pub const fn window_size(&self) -> u32 {
        self.size
    }
}
