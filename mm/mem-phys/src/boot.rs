//! One-shot boot-time population of the frame database.
//!
//! The boot sequencer discovers the physical memory map (platform/ACPI
//! probing, outside this subsystem) and calls [`sysboot`] exactly once with
//! it. Everything after that goes through the allocator.

use crate::pfndb::{FrameDb, FrameType};
use crate::pgalloc::FrameAllocator;
use mem_addr::layout::FRAME_SIZE;
use mem_addr::{Pfn, PhysAddr};

/// What a memory-map range contains.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RangeKind {
    /// RAM available for allocation.
    Usable,
    /// RAM the kernel must not hand out (kernel image, boot structures,
    /// firmware tables).
    Reserved,
}

/// One range of the discovered physical memory map.
#[derive(Copy, Clone, Debug)]
pub struct MemRange {
    pub base: PhysAddr,
    pub frames: u32,
    pub kind: RangeKind,
}

#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("memory map is empty")]
    EmptyMap,
    #[error("memory-map range at {0} is not frame-aligned")]
    Misaligned(PhysAddr),
}

/// Build the frame database from the boot memory map.
///
/// Sizes the database off the highest mapped frame, marks usable RAM as
/// free pagezones and reserved RAM as `System`, then reclassifies the
/// remaining address gaps (`Invalid`) as `IoMap` in one pass.
///
/// # Errors
/// Rejects an empty map and ranges whose base is not frame-aligned. Range
/// sanity beyond that (overlaps, ordering) is the boot sequencer's problem;
/// later ranges win record-by-record.
pub fn sysboot(map: &[MemRange]) -> Result<FrameAllocator, BootError> {
    if map.is_empty() {
        return Err(BootError::EmptyMap);
    }
    let mut max_pfn = 0_u32;
    for range in map {
        if !range.base.is_aligned_to(FRAME_SIZE) {
            return Err(BootError::Misaligned(range.base));
        }
        max_pfn = max_pfn.max(Pfn::containing(range.base).as_u32() + range.frames);
    }

    let mut db = FrameDb::new(max_pfn);
    let mut usable = 0_u32;
    let mut reserved = 0_u32;
    for range in map {
        let base = Pfn::containing(range.base);
        match range.kind {
            RangeKind::Usable => {
                db.set_range(base, range.frames, FrameType::Free);
                usable += range.frames;
            }
            RangeKind::Reserved => {
                db.set_range(base, range.frames, FrameType::System);
                reserved += range.frames;
            }
        }
    }
    let iomap = db.substitute(FrameType::Invalid, FrameType::IoMap);

    log::info!(
        "physical memory: {} MiB usable, {} MiB reserved, {} MiB address gaps, {max_pfn} frames tracked",
        mib(usable),
        mib(reserved),
        mib(iomap)
    );
    Ok(FrameAllocator::new(db))
}

fn mib(frames: u32) -> u64 {
    u64::from(frames) * FRAME_SIZE / (1024 * 1024)
}
