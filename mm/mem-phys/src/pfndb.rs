//! The page-frame database.

use alloc::vec;
use alloc::vec::Vec;
use mem_addr::Pfn;

/// Role of one physical frame.
///
/// Exactly one type holds per frame at any time. The three `FreePz*`
/// variants are boundary markers for free pagezones: a maximal free run of
/// length 1 is `FreePzLone`; a longer run has `FreePzStart` and `FreePzEnd`
/// at its two ends with plain `Free` in between. Interior `Free` never
/// appears outside a run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameType {
    /// Not backed by RAM (address gap in the memory map).
    Invalid,
    /// Free, interior of a pagezone of length ≥ 3.
    Free,
    /// Free, the whole of a length-1 pagezone.
    FreePzLone,
    /// Free, first frame of a pagezone of length ≥ 2.
    FreePzStart,
    /// Free, last frame of a pagezone of length ≥ 2.
    FreePzEnd,
    /// Kernel image, boot structures, firmware-reserved RAM.
    System,
    /// Device memory discovered as an address gap and reclassified.
    IoMap,
    /// A page-table frame owned by some address space.
    Ptable,
    /// Backing for the meta slab allocator.
    SysMslab,
    /// Backing for an ordinary kernel slab cache.
    SysSlab,
    /// Owned by a user domain.
    User,
}

impl FrameType {
    /// Any of the four free-run variants.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(
            self,
            Self::Free | Self::FreePzLone | Self::FreePzStart | Self::FreePzEnd
        )
    }
}

/// Opaque handle to the slab cache owning a `SysSlab`/`SysMslab` frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SlabRef(pub u32);

/// One record per physical frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FrameRecord {
    kind: FrameType,
    slab: Option<SlabRef>,
}

impl FrameRecord {
    const INVALID: Self = Self {
        kind: FrameType::Invalid,
        slab: None,
    };

    #[must_use]
    pub const fn kind(self) -> FrameType {
        self.kind
    }
}

/// A maximal run of contiguous free frames, recovered from the markers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageZone {
    pub base: Pfn,
    pub frames: u32,
}

/// The frame database: one [`FrameRecord`] per PFN in `[0, max_pfn)`.
///
/// Sized once at boot and never resized; an out-of-range PFN is a caller
/// bug and panics.
pub struct FrameDb {
    records: Vec<FrameRecord>,
}

impl FrameDb {
    /// Build the database for `max_pfn` frames, every record `Invalid`.
    #[must_use]
    pub fn new(max_pfn: u32) -> Self {
        Self {
            records: vec![FrameRecord::INVALID; max_pfn as usize],
        }
    }

    /// Exclusive upper bound of tracked PFNs.
    #[must_use]
    pub fn max_pfn(&self) -> u32 {
        u32::try_from(self.records.len()).expect("frame count fits u32")
    }

    #[inline]
    fn idx(&self, pfn: Pfn) -> usize {
        assert!(
            pfn.as_usize() < self.records.len(),
            "{pfn} out of range (max_pfn {})",
            self.max_pfn()
        );
        pfn.as_usize()
    }

    #[must_use]
    pub fn get_type(&self, pfn: Pfn) -> FrameType {
        self.records[self.idx(pfn)].kind
    }

    pub fn set_type(&mut self, pfn: Pfn, kind: FrameType) {
        let i = self.idx(pfn);
        self.records[i].kind = kind;
    }

    #[must_use]
    pub fn get_slab(&self, pfn: Pfn) -> Option<SlabRef> {
        self.records[self.idx(pfn)].slab
    }

    pub fn set_slab(&mut self, pfn: Pfn, slab: Option<SlabRef>) {
        let i = self.idx(pfn);
        self.records[i].slab = slab;
    }

    /// Type a contiguous range, frame by frame. `Free` ranges get proper
    /// pagezone boundary markers.
    pub fn set_range(&mut self, base: Pfn, frames: u32, kind: FrameType) {
        if kind.is_free() {
            self.mark_free_run(base, frames);
            return;
        }
        for off in 0..frames {
            let i = self.idx(base + off);
            self.records[i] = FrameRecord { kind, slab: None };
        }
    }

    /// Rewrite every record currently `from` to `to` in one pass; returns
    /// how many changed. Used once at boot to reclassify memory-map gaps.
    pub fn substitute(&mut self, from: FrameType, to: FrameType) -> u32 {
        let mut changed = 0;
        for rec in &mut self.records {
            if rec.kind == from {
                rec.kind = to;
                changed += 1;
            }
        }
        changed
    }

    /// Write the boundary markers for a free run.
    ///
    /// The run is first extended over any free run already adjacent on
    /// either side, so markers always bound *maximal* runs no matter how
    /// the range arrived (boot-map ingestion of touching ranges, allocator
    /// frees next to existing zones). Overwrites every record in the
    /// resulting range, clearing slab refs.
    pub fn mark_free_run(&mut self, base: Pfn, frames: u32) {
        assert!(frames > 0, "empty free run");
        let _ = self.idx(base + (frames - 1));

        let mut base = base;
        let mut frames = frames;
        if base.as_u32() > 0 {
            if let Some(before) = self.free_run_ending_at(Pfn::new(base.as_u32() - 1)) {
                base = before.base;
                frames += before.frames;
            }
        }
        let after = base + frames;
        if after.as_u32() < self.max_pfn() {
            if let Some(run) = self.free_run_starting_at(after) {
                frames += run.frames;
            }
        }

        if frames == 1 {
            let i = self.idx(base);
            self.records[i] = FrameRecord {
                kind: FrameType::FreePzLone,
                slab: None,
            };
            return;
        }
        for off in 0..frames {
            let kind = if off == 0 {
                FrameType::FreePzStart
            } else if off == frames - 1 {
                FrameType::FreePzEnd
            } else {
                FrameType::Free
            };
            let i = self.idx(base + off);
            self.records[i] = FrameRecord { kind, slab: None };
        }
    }

    /// Iterate free pagezones in ascending base order.
    pub fn free_zones(&self) -> impl Iterator<Item = PageZone> + '_ {
        FreeZones { db: self, next: 0 }
    }

    /// The free run whose last frame is `end` (an `FreePzEnd`/`FreePzLone`
    /// frame), recovered by walking the markers backwards.
    pub(crate) fn free_run_ending_at(&self, end: Pfn) -> Option<PageZone> {
        match self.get_type(end) {
            FrameType::FreePzLone => Some(PageZone {
                base: end,
                frames: 1,
            }),
            FrameType::FreePzEnd => {
                let mut pfn = end.as_u32();
                loop {
                    pfn -= 1;
                    match self.get_type(Pfn::new(pfn)) {
                        FrameType::Free => {}
                        FrameType::FreePzStart => {
                            return Some(PageZone {
                                base: Pfn::new(pfn),
                                frames: end.as_u32() - pfn + 1,
                            });
                        }
                        other => panic!("corrupt pagezone markers: {other:?} inside run"),
                    }
                }
            }
            _ => None,
        }
    }

    /// The free run whose first frame is `start` (an
    /// `FreePzStart`/`FreePzLone` frame).
    pub(crate) fn free_run_starting_at(&self, start: Pfn) -> Option<PageZone> {
        match self.get_type(start) {
            FrameType::FreePzLone => Some(PageZone {
                base: start,
                frames: 1,
            }),
            FrameType::FreePzStart => {
                let mut pfn = start.as_u32();
                loop {
                    pfn += 1;
                    match self.get_type(Pfn::new(pfn)) {
                        FrameType::Free => {}
                        FrameType::FreePzEnd => {
                            return Some(PageZone {
                                base: start,
                                frames: pfn - start.as_u32() + 1,
                            });
                        }
                        other => panic!("corrupt pagezone markers: {other:?} inside run"),
                    }
                }
            }
            _ => None,
        }
    }
}

struct FreeZones<'a> {
    db: &'a FrameDb,
    next: u32,
}

impl Iterator for FreeZones<'_> {
    type Item = PageZone;

    fn next(&mut self) -> Option<PageZone> {
        while self.next < self.db.max_pfn() {
            let base = Pfn::new(self.next);
            if let Some(zone) = self.db.free_run_starting_at(base) {
                self.next = zone.base.as_u32() + zone.frames;
                return Some(zone);
            }
            self.next += 1;
        }
        None
    }
}
