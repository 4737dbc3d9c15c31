//! First-fit pagezone allocation over the frame database.

use crate::pfndb::{FrameDb, FrameType};
use mem_addr::layout::{KERN_TOP, LOKERN_TOP};
use mem_addr::Pfn;
use mem_paging::PtableSource;

bitflags::bitflags! {
    /// Address-tier policy for an allocation.
    ///
    /// Tiers nest by bit inclusion: `KERN` carries the `LOKERN` bit and
    /// `HIGH` carries both, so a request's eligibility only ever widens as
    /// bits are added. The strictest tier present decides the ceiling.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct AllocFlags: u8 {
        /// Low memory only: legacy-addressable structures (ISA DMA).
        const LOKERN = 0b001;
        /// Ordinary kernel memory; includes `LOKERN` eligibility.
        const KERN   = 0b011;
        /// Any memory including high; includes `KERN` eligibility.
        const HIGH   = 0b111;
    }
}

impl AllocFlags {
    /// Exclusive PFN ceiling implied by the tier, `None` when unbounded.
    fn ceiling(self) -> Option<Pfn> {
        assert!(!self.is_empty(), "allocation request without a tier");
        if self.contains(Self::HIGH) {
            None
        } else if self.contains(Self::KERN) {
            Some(Pfn::containing(KERN_TOP))
        } else {
            Some(Pfn::containing(LOKERN_TOP))
        }
    }
}

/// Allocation failure: recoverable, the caller decides what it means.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    #[error("no free pagezone of {frames} frame(s) satisfies {flags:?}")]
    Exhausted { frames: u32, flags: AllocFlags },
}

/// The physical frame allocator, owning the frame database.
///
/// First-fit over free pagezones in ascending base order, no best-fit
/// search: deterministic and cheap, which matters more than fragmentation
/// at microkernel frame counts. A failed request mutates nothing.
pub struct FrameAllocator {
    db: FrameDb,
}

impl FrameAllocator {
    #[must_use]
    pub const fn new(db: FrameDb) -> Self {
        Self { db }
    }

    #[must_use]
    pub const fn db(&self) -> &FrameDb {
        &self.db
    }

    pub const fn db_mut(&mut self) -> &mut FrameDb {
        &mut self.db
    }

    /// Allocate `frames` contiguous frames typed `kind` under `flags`.
    ///
    /// The chosen sub-range comes from the front of the first eligible
    /// zone; a remainder keeps its free markers recomputed.
    ///
    /// # Errors
    /// [`AllocError::Exhausted`] when no zone of sufficient length and
    /// eligibility exists. The database is untouched in that case.
    pub fn allocate(
        &mut self,
        frames: u32,
        kind: FrameType,
        flags: AllocFlags,
    ) -> Result<Pfn, AllocError> {
        assert!(frames > 0, "zero-frame allocation");
        assert!(
            !kind.is_free() && kind != FrameType::Invalid,
            "allocation must assign an owned frame type, not {kind:?}"
        );
        let ceiling = flags.ceiling();

        let Some(zone) = self.db.free_zones().find(|zone| {
            zone.frames >= frames
                && ceiling.is_none_or(|c| zone.base.as_u32() + frames <= c.as_u32())
        }) else {
            log::warn!("frame allocation failed: {frames} frame(s), {flags:?}");
            return Err(AllocError::Exhausted { frames, flags });
        };

        self.db.set_range(zone.base, frames, kind);
        let remainder = zone.frames - frames;
        if remainder > 0 {
            self.db.mark_free_run(zone.base + frames, remainder);
        }
        log::trace!("allocated {frames} frame(s) at {} as {kind:?}", zone.base);
        Ok(zone.base)
    }

    /// Free exactly the range a prior [`allocate`](Self::allocate)
    /// returned, coalescing with adjacent free zones.
    ///
    /// # Panics
    /// Freeing frames that are not allocated, or a range of mixed types, is
    /// an invariant violation: callers free exactly what they allocated.
    pub fn free(&mut self, base: Pfn, frames: u32) {
        assert!(frames > 0, "zero-frame free");
        let kind = self.db.get_type(base);
        assert!(
            !kind.is_free() && kind != FrameType::Invalid,
            "double free or freeing unowned {base:?}"
        );
        for off in 0..frames {
            assert!(
                self.db.get_type(base + off) == kind,
                "partial or mismatched free at {:?} (range typed {kind:?})",
                base + off
            );
        }

        // The marker writer extends over adjacent free runs itself.
        self.db.mark_free_run(base, frames);
        log::trace!("freed {frames} frame(s) at {base} ({kind:?})");
    }
}

impl PtableSource for FrameAllocator {
    fn alloc_table(&mut self) -> Option<Pfn> {
        self.allocate(1, FrameType::Ptable, AllocFlags::KERN).ok()
    }

    fn free_table(&mut self, pfn: Pfn) {
        self.free(pfn, 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pfndb::FrameType::*;
    use crate::pfndb::PageZone;
    use mem_addr::layout::FRAME_SHIFT;

    /// A database with a single free zone `[base, base+frames)`.
    fn one_zone(max_pfn: u32, base: u32, frames: u32) -> FrameAllocator {
        let mut db = FrameDb::new(max_pfn);
        db.mark_free_run(Pfn::new(base), frames);
        FrameAllocator::new(db)
    }

    fn types(alloc: &FrameAllocator) -> Vec<FrameType> {
        (0..alloc.db().max_pfn())
            .map(|pfn| alloc.db().get_type(Pfn::new(pfn)))
            .collect()
    }

    #[test]
    fn first_fit_takes_lowest_zone() {
        let mut db = FrameDb::new(32);
        db.mark_free_run(Pfn::new(4), 2);
        db.mark_free_run(Pfn::new(10), 8);
        let mut alloc = FrameAllocator::new(db);

        // Too big for the first zone: skipped, not split.
        let base = alloc.allocate(4, User, AllocFlags::HIGH).unwrap();
        assert_eq!(base, Pfn::new(10));
        // Fits the first zone now.
        let base = alloc.allocate(2, User, AllocFlags::HIGH).unwrap();
        assert_eq!(base, Pfn::new(4));
    }

    #[test]
    fn remainder_markers_are_recomputed() {
        let mut alloc = one_zone(8, 0, 5);
        alloc.allocate(3, Ptable, AllocFlags::KERN).unwrap();
        // Remainder of 2: START/END pair.
        assert_eq!(alloc.db().get_type(Pfn::new(3)), FreePzStart);
        assert_eq!(alloc.db().get_type(Pfn::new(4)), FreePzEnd);

        let mut alloc = one_zone(8, 0, 5);
        alloc.allocate(4, Ptable, AllocFlags::KERN).unwrap();
        // Remainder of 1: a lone zone.
        assert_eq!(alloc.db().get_type(Pfn::new(4)), FreePzLone);

        let mut alloc = one_zone(8, 0, 5);
        alloc.allocate(5, Ptable, AllocFlags::KERN).unwrap();
        // Exact consumption: no free frames remain.
        assert!(alloc.db().free_zones().next().is_none());
    }

    #[test]
    fn coalescing_round_trip_any_free_order() {
        // Free single-frame allocations in a scrambled order; the original
        // zone must come back exactly, markers included.
        let original = one_zone(16, 2, 9);
        let snapshot = types(&original);

        let mut alloc = one_zone(16, 2, 9);
        let mut held = Vec::new();
        for _ in 0..9 {
            held.push(alloc.allocate(1, User, AllocFlags::HIGH).unwrap());
        }
        assert!(alloc.db().free_zones().next().is_none());

        for i in [4, 0, 8, 2, 6, 1, 7, 3, 5] {
            alloc.free(held[i], 1);
        }
        assert_eq!(types(&alloc), snapshot);
        assert_eq!(
            alloc.db().free_zones().collect::<Vec<_>>(),
            [PageZone { base: Pfn::new(2), frames: 9 }]
        );
    }

    #[test]
    fn free_coalesces_both_sides() {
        let mut alloc = one_zone(16, 0, 12);
        let a = alloc.allocate(4, User, AllocFlags::HIGH).unwrap();
        let b = alloc.allocate(4, User, AllocFlags::HIGH).unwrap();
        let c = alloc.allocate(4, User, AllocFlags::HIGH).unwrap();
        alloc.free(a, 4);
        alloc.free(c, 4);
        // Freeing the middle merges all three back into one zone.
        alloc.free(b, 4);
        assert_eq!(
            alloc.db().free_zones().collect::<Vec<_>>(),
            [PageZone { base: Pfn::new(0), frames: 12 }]
        );
    }

    #[test]
    fn tier_ceilings_nest() {
        const LOKERN_PFN: u32 = (16 * 1024 * 1024) >> FRAME_SHIFT;
        const KERN_PFN: u32 = (896 * 1024 * 1024) >> FRAME_SHIFT;

        // One zone per tier, far enough apart not to coalesce.
        let mut db = FrameDb::new(KERN_PFN + 64);
        db.mark_free_run(Pfn::new(8), 4); // lokern
        db.mark_free_run(Pfn::new(LOKERN_PFN + 8), 4); // kern only
        db.mark_free_run(Pfn::new(KERN_PFN + 8), 4); // high only
        let mut alloc = FrameAllocator::new(db);

        // LOKERN must take the low zone.
        let lo = alloc.allocate(4, User, AllocFlags::LOKERN).unwrap();
        assert_eq!(lo, Pfn::new(8));
        // Another LOKERN request cannot be satisfied from the others.
        assert!(alloc.allocate(4, User, AllocFlags::LOKERN).is_err());
        // KERN takes the mid zone (first fit among eligible).
        let mid = alloc.allocate(4, User, AllocFlags::KERN).unwrap();
        assert_eq!(mid, Pfn::new(LOKERN_PFN + 8));
        // KERN cannot reach the high zone.
        assert!(alloc.allocate(4, User, AllocFlags::KERN).is_err());
        // HIGH reaches everything that is left.
        let hi = alloc.allocate(4, User, AllocFlags::HIGH).unwrap();
        assert_eq!(hi, Pfn::new(KERN_PFN + 8));
    }

    #[test]
    fn zone_straddling_ceiling_serves_from_its_front() {
        const LOKERN_PFN: u32 = (16 * 1024 * 1024) >> FRAME_SHIFT;
        let mut db = FrameDb::new(LOKERN_PFN + 64);
        // Zone starts below the LOKERN ceiling, ends above it.
        db.mark_free_run(Pfn::new(LOKERN_PFN - 4), 16);
        let mut alloc = FrameAllocator::new(db);

        // A small request fits below the ceiling.
        assert_eq!(
            alloc.allocate(4, User, AllocFlags::LOKERN).unwrap(),
            Pfn::new(LOKERN_PFN - 4)
        );
        // A large one would cross it.
        assert!(alloc.allocate(8, User, AllocFlags::LOKERN).is_err());
    }

    #[test]
    fn exhaustion_is_non_destructive() {
        let mut alloc = one_zone(16, 2, 5);
        alloc.allocate(2, User, AllocFlags::HIGH).unwrap();
        let snapshot = types(&alloc);
        assert!(alloc.allocate(4, User, AllocFlags::HIGH).is_err());
        assert_eq!(types(&alloc), snapshot);
    }

    #[test]
    fn ptable_source_types_frames() {
        let mut alloc = one_zone(8, 0, 4);
        let pfn = alloc.alloc_table().unwrap();
        assert_eq!(alloc.db().get_type(pfn), Ptable);
        alloc.free_table(pfn);
        assert!(alloc.db().get_type(pfn).is_free());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let mut alloc = one_zone(8, 0, 4);
        let pfn = alloc.allocate(2, User, AllocFlags::HIGH).unwrap();
        alloc.free(pfn, 2);
        alloc.free(pfn, 2);
    }

    #[test]
    #[should_panic(expected = "partial or mismatched")]
    fn mismatched_range_free_is_fatal() {
        let mut alloc = one_zone(8, 0, 6);
        let a = alloc.allocate(2, User, AllocFlags::HIGH).unwrap();
        let _b = alloc.allocate(2, Ptable, AllocFlags::HIGH).unwrap();
        // Crosses from the User range into the Ptable one.
        alloc.free(a, 3);
    }
}
