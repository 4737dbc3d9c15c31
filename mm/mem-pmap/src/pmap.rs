//! Per-domain address spaces and their TLB bookkeeping.

use crate::cpu::{CpuId, CpuMask, CpuOps};
use mem_addr::{Pfn, PhysAddr, VirtAddr};
use mem_paging::{
    flush_class, FlushClass, L2Kind, L2e, LinearTable, PageDirectory, PdptTable, Pdpte, PhysAccess,
    Prot, PtableSource, PD_ENTRIES, PDPT_ENTRIES,
};
use mem_sync::SpinLock;

#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The frame allocator could not supply a page-table frame.
    #[error("out of page-table frames")]
    OutOfTables,
}

/// What [`Pmap::probe`] found at a virtual address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mapping {
    /// Exact physical address `va` translates to.
    pub pa: PhysAddr,
    pub writable: bool,
    pub user: bool,
}

struct PmapState {
    /// A change requiring a cross-CPU flush has not been broadcast yet.
    tlb_dirty: bool,
    /// CPUs this address space is currently loaded on.
    resident: CpuMask,
    /// References held by CPUs running in this space.
    refcount: u32,
}

/// One address space: the PAE root plus consistency state.
///
/// All table edits are write-through: the entry word is in its final form
/// when the mapping call returns, and local invalidation has already
/// happened. The only deferred effect is the cross-CPU broadcast for
/// changes touching global entries; [`commit`](Self::commit) pays it.
/// [`acquire`](Self::acquire) refuses an uncommitted space, so a CPU can
/// never start running on stale translations.
pub struct Pmap {
    root: PhysAddr,
    state: SpinLock<PmapState>,
}

impl Pmap {
    /// Allocate and clear a root table, yielding an empty address space.
    ///
    /// # Errors
    /// [`MapError::OutOfTables`] when no frame is available.
    pub fn new<A, P>(tables: &mut A, phys: &P) -> Result<Self, MapError>
    where
        A: PtableSource,
        P: PhysAccess,
    {
        let root = tables.alloc_table().ok_or(MapError::OutOfTables)?;
        unsafe { phys.phys_to_mut::<PdptTable>(root.base()) }.reset();
        log::debug!("pmap: new address space, root at {}", root.base());
        Ok(Self {
            root: root.base(),
            state: SpinLock::new(PmapState {
                tlb_dirty: false,
                resident: CpuMask::EMPTY,
                refcount: 0,
            }),
        })
    }

    /// Physical address of the root table (what gets loaded into CR3).
    #[must_use]
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    /// Install (or, with [`L2e::ZERO`], remove) the leaf translation for
    /// `va`, allocating the covering page directory on demand.
    ///
    /// The prior entry is read first; the flush class of the change is
    /// applied before returning: `Local` is paid on the calling CPU
    /// immediately, `Global` is banked until [`commit`](Self::commit).
    /// Clearing an address nothing covers is a no-op and allocates
    /// nothing.
    ///
    /// # Errors
    /// [`MapError::OutOfTables`] when a page directory was needed and the
    /// allocator is empty; the address space is unchanged in that case.
    pub fn set_leaf<A, P, C>(
        &self,
        tables: &mut A,
        phys: &P,
        cpus: &C,
        va: VirtAddr,
        entry: L2e,
    ) -> Result<FlushClass, MapError>
    where
        A: PtableSource,
        P: PhysAccess,
        C: CpuOps,
    {
        debug_assert!(va.leaf_offset() == 0, "mapping base not leaf-aligned");

        let mut state = self.state.lock();
        let pdpt = unsafe { phys.phys_to_mut::<PdptTable>(self.root) };
        let pd_pa = match pdpt.get(va.pdpt_index()).pd_base() {
            Some(pd_pa) => pd_pa,
            None if entry == L2e::ZERO => return Ok(FlushClass::None),
            None => {
                let frame = tables.alloc_table().ok_or(MapError::OutOfTables)?;
                unsafe { phys.phys_to_mut::<PageDirectory>(frame.base()) }.reset();
                pdpt.set(va.pdpt_index(), Pdpte::table(frame.base()));
                frame.base()
            }
        };

        let pd = unsafe { phys.phys_to_mut::<PageDirectory>(pd_pa) };
        let old = pd.get(va.pd_index());
        debug_assert!(
            old.next_table().is_none(),
            "leaf write would replace a table pointer at {va}"
        );
        pd.set(va.pd_index(), entry);
        Ok(Self::settle(&mut state, cpus, flush_class(old, entry)))
    }

    /// Map the 2 MiB leaf at `va` to `pa` with `prot`.
    ///
    /// # Errors
    /// See [`set_leaf`](Self::set_leaf).
    pub fn enter<A, P, C>(
        &self,
        tables: &mut A,
        phys: &P,
        cpus: &C,
        va: VirtAddr,
        pa: PhysAddr,
        prot: Prot,
    ) -> Result<FlushClass, MapError>
    where
        A: PtableSource,
        P: PhysAccess,
        C: CpuOps,
    {
        self.set_leaf(tables, phys, cpus, va, L2e::leaf(pa, prot))
    }

    /// Remove the leaf mapping at `va`, if any.
    ///
    /// # Errors
    /// See [`set_leaf`](Self::set_leaf), though clearing itself never
    /// allocates.
    pub fn clear<A, P, C>(
        &self,
        tables: &mut A,
        phys: &P,
        cpus: &C,
        va: VirtAddr,
    ) -> Result<FlushClass, MapError>
    where
        A: PtableSource,
        P: PhysAccess,
        C: CpuOps,
    {
        self.set_leaf(tables, phys, cpus, va, L2e::ZERO)
    }

    /// Link the linear-map table `pt` under the slot covering `va`.
    ///
    /// The slot must be vacant; the table pointer never changes once
    /// linked, so this never flushes.
    pub(crate) fn link_table<A, P>(
        &self,
        tables: &mut A,
        phys: &P,
        va: VirtAddr,
        pt: PhysAddr,
    ) -> Result<(), MapError>
    where
        A: PtableSource,
        P: PhysAccess,
    {
        let _state = self.state.lock();
        let pdpt = unsafe { phys.phys_to_mut::<PdptTable>(self.root) };
        let pd_pa = match pdpt.get(va.pdpt_index()).pd_base() {
            Some(pd_pa) => pd_pa,
            None => {
                let frame = tables.alloc_table().ok_or(MapError::OutOfTables)?;
                unsafe { phys.phys_to_mut::<PageDirectory>(frame.base()) }.reset();
                pdpt.set(va.pdpt_index(), Pdpte::table(frame.base()));
                frame.base()
            }
        };
        let pd = unsafe { phys.phys_to_mut::<PageDirectory>(pd_pa) };
        assert!(
            pd.get(va.pd_index()).kind().is_none(),
            "window slot at {va} already occupied"
        );
        pd.set(va.pd_index(), L2e::table(pt));
        Ok(())
    }

    /// Translate `va` by walking the tables, exactly as the MMU would.
    /// Handles both 2 MiB leaves and 4 KiB linear-map pages.
    #[must_use]
    pub fn probe<P: PhysAccess>(&self, phys: &P, va: VirtAddr) -> Option<Mapping> {
        let _state = self.state.lock();
        let pdpt = unsafe { phys.phys_to_mut::<PdptTable>(self.root) };
        let pd_pa = pdpt.get(va.pdpt_index()).pd_base()?;
        let pd = unsafe { phys.phys_to_mut::<PageDirectory>(pd_pa) };
        let entry = pd.get(va.pd_index());
        match entry.kind()? {
            L2Kind::Leaf(base) => Some(Mapping {
                pa: base + u64::from(va.leaf_offset()),
                writable: entry.writable(),
                user: entry.user(),
            }),
            L2Kind::Table(pt) => {
                let table = unsafe { phys.phys_to_mut::<LinearTable>(pt) };
                let page = table.get(va.pt_index());
                page.present().then(|| Mapping {
                    pa: page.page_base() + u64::from(va.page_offset()),
                    writable: page.writable(),
                    user: page.user(),
                })
            }
        }
    }

    /// The exact physical address `va` translates to, if mapped.
    #[must_use]
    pub fn translate<P: PhysAccess>(&self, phys: &P, va: VirtAddr) -> Option<PhysAddr> {
        self.probe(phys, va).map(|m| m.pa)
    }

    /// Pay the pending cross-CPU flush, if any: one blocking broadcast to
    /// every CPU the space is resident on. Idempotent.
    pub fn commit<C: CpuOps>(&self, cpus: &C) {
        let mut state = self.state.lock();
        if state.tlb_dirty {
            // Deferred flushes always stem from global-entry changes.
            cpus.flush_tlbs(state.resident, true);
            state.tlb_dirty = false;
        }
    }

    /// Record that `cpu` is about to load this space.
    ///
    /// # Panics
    /// The space must be committed first; activating with a broadcast
    /// still pending would run `cpu` on translations other CPUs already
    /// know are stale.
    pub fn acquire(&self, cpu: CpuId) {
        let mut state = self.state.lock();
        assert!(!state.tlb_dirty, "activating an uncommitted address space");
        state.refcount += 1;
        state.resident.insert(cpu);
    }

    /// Record that `cpu` has switched away from this space.
    pub fn release(&self, cpu: CpuId) {
        let mut state = self.state.lock();
        assert!(state.refcount > 0, "releasing an unreferenced address space");
        state.refcount -= 1;
        state.resident.remove(cpu);
    }

    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.state.lock().refcount
    }

    /// Tear the space down, returning its table frames to the allocator.
    /// Leaf mappings are simply abandoned; the frames they covered belong
    /// to whoever mapped them.
    ///
    /// # Panics
    /// The space must be fully released: no references, not resident
    /// anywhere, and no linear-map table still linked below it.
    pub fn destroy<A, P>(mut self, tables: &mut A, phys: &P)
    where
        A: PtableSource,
        P: PhysAccess,
    {
        let state = self.state.get_mut();
        assert!(state.refcount == 0, "destroying a referenced address space");
        assert!(
            state.resident.is_empty(),
            "destroying a resident address space"
        );

        let pdpt = unsafe { phys.phys_to_mut::<PdptTable>(self.root) };
        for i in 0..PDPT_ENTRIES {
            if let Some(pd_pa) = pdpt.get(i).pd_base() {
                let pd = unsafe { phys.phys_to_mut::<PageDirectory>(pd_pa) };
                for j in 0..PD_ENTRIES {
                    assert!(
                        pd.get(j).next_table().is_none(),
                        "destroying a space with a window table linked"
                    );
                }
                tables.free_table(Pfn::containing(pd_pa));
            }
        }
        tables.free_table(Pfn::containing(self.root));
        log::debug!("pmap: destroyed address space rooted at {}", self.root);
    }

    /// Apply a flush decision: pay `Local` now, bank `Global` for
    /// [`commit`](Self::commit).
    fn settle<C: CpuOps>(state: &mut PmapState, cpus: &C, class: FlushClass) -> FlushClass {
        match class {
            FlushClass::None => {}
            FlushClass::Local => cpus.invalidate_local(false),
            FlushClass::Global => state.tlb_dirty = true,
        }
        class
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FlushEvent, TestCpus, TestRam};
    use mem_addr::layout::LEAF_SIZE;
    use mem_phys::{FrameAllocator, FrameDb, FrameType};

    const RAM_FRAMES: u32 = 64;

    /// Allocator over the test RAM, frame 0 held back so no table ever
    /// lands at physical zero.
    fn table_source() -> FrameAllocator {
        let mut db = FrameDb::new(RAM_FRAMES);
        db.set_range(Pfn::new(1), RAM_FRAMES - 1, FrameType::Free);
        FrameAllocator::new(db)
    }

    fn harness() -> (FrameAllocator, TestRam, TestCpus) {
        (
            table_source(),
            TestRam::new(RAM_FRAMES as usize),
            TestCpus::new(),
        )
    }

    const VA: VirtAddr = VirtAddr::from_u32(0x0040_0000);
    const PA: PhysAddr = PhysAddr::from_u64(0x0600_0000);

    #[test]
    fn first_mapping_needs_no_flush() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();

        let class = pmap
            .enter(&mut alloc, &ram, &cpus, VA, PA, Prot::KERNEL_WRITABLE)
            .unwrap();
        assert_eq!(class, FlushClass::None);
        assert!(cpus.take_log().is_empty());

        let m = pmap.probe(&ram, VA + 0x1234).unwrap();
        assert_eq!(m.pa, PA + 0x1234);
        assert!(m.writable);
        assert!(!m.user);
    }

    #[test]
    fn demand_directories_are_table_typed() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        let root_pfn = Pfn::containing(pmap.root());
        assert_eq!(alloc.db().get_type(root_pfn), FrameType::Ptable);

        // One directory for the first gigabyte, another for the third.
        pmap.enter(&mut alloc, &ram, &cpus, VA, PA, Prot::KERNEL)
            .unwrap();
        pmap.enter(
            &mut alloc,
            &ram,
            &cpus,
            VirtAddr::from_u32(0x8000_0000),
            PA,
            Prot::KERNEL,
        )
        .unwrap();
        let typed = (0..RAM_FRAMES)
            .filter(|&i| alloc.db().get_type(Pfn::new(i)) == FrameType::Ptable)
            .count();
        assert_eq!(typed, 3); // root + two directories
    }

    #[test]
    fn remap_to_new_frame_flushes_locally_at_once() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.enter(&mut alloc, &ram, &cpus, VA, PA, Prot::KERNEL)
            .unwrap();
        cpus.take_log();

        let class = pmap
            .enter(
                &mut alloc,
                &ram,
                &cpus,
                VA,
                PhysAddr::from_u64(0x0800_0000),
                Prot::KERNEL,
            )
            .unwrap();
        assert_eq!(class, FlushClass::Local);
        assert_eq!(
            cpus.take_log(),
            [FlushEvent::Local {
                include_global: false
            }]
        );
    }

    #[test]
    fn global_changes_batch_until_commit() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.acquire(CpuId::new(0));
        pmap.acquire(CpuId::new(2));

        let prot = Prot::KERNEL_WRITABLE | Prot::GLOBAL;
        pmap.enter(&mut alloc, &ram, &cpus, VA, PA, prot).unwrap();
        let a = pmap
            .enter(
                &mut alloc,
                &ram,
                &cpus,
                VA,
                PhysAddr::from_u64(0x0800_0000),
                prot,
            )
            .unwrap();
        let b = pmap.clear(&mut alloc, &ram, &cpus, VA).unwrap();
        assert_eq!((a, b), (FlushClass::Global, FlushClass::Global));
        // Nothing broadcast yet.
        assert!(cpus.take_log().is_empty());

        pmap.commit(&cpus);
        let mut expect = CpuMask::EMPTY;
        expect.insert(CpuId::new(0));
        expect.insert(CpuId::new(2));
        assert_eq!(
            cpus.take_log(),
            [FlushEvent::Broadcast {
                targets: expect,
                include_global: true
            }]
        );

        // Second commit has nothing to pay.
        pmap.commit(&cpus);
        assert!(cpus.take_log().is_empty());
    }

    #[test]
    fn clearing_an_uncovered_address_allocates_nothing() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        let free_before: Vec<_> = alloc.db().free_zones().collect();

        assert_eq!(
            pmap.clear(&mut alloc, &ram, &cpus, VA).unwrap(),
            FlushClass::None
        );
        assert_eq!(alloc.db().free_zones().collect::<Vec<_>>(), free_before);
        assert!(cpus.take_log().is_empty());
    }

    #[test]
    #[should_panic(expected = "uncommitted address space")]
    fn activation_requires_commit() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.enter(
            &mut alloc,
            &ram,
            &cpus,
            VA,
            PA,
            Prot::KERNEL | Prot::GLOBAL,
        )
        .unwrap();
        pmap.clear(&mut alloc, &ram, &cpus, VA).unwrap(); // leaves a pending global flush
        pmap.acquire(CpuId::new(1));
    }

    #[test]
    fn destroy_returns_every_table_frame() {
        let (mut alloc, ram, cpus) = harness();
        let free_before: Vec<_> = alloc.db().free_zones().collect();

        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.enter(&mut alloc, &ram, &cpus, VA, PA, Prot::KERNEL)
            .unwrap();
        pmap.acquire(CpuId::new(0));
        pmap.release(CpuId::new(0));
        pmap.destroy(&mut alloc, &ram);

        assert_eq!(alloc.db().free_zones().collect::<Vec<_>>(), free_before);
    }

    #[test]
    #[should_panic(expected = "referenced address space")]
    fn destroy_of_referenced_space_is_fatal() {
        let (mut alloc, ram, _cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.acquire(CpuId::new(0));
        pmap.destroy(&mut alloc, &ram);
    }

    #[test]
    fn probe_walks_leaf_offsets() {
        let (mut alloc, ram, cpus) = harness();
        let pmap = Pmap::new(&mut alloc, &ram).unwrap();
        pmap.enter(&mut alloc, &ram, &cpus, VA, PA, Prot::USER_RO)
            .unwrap();

        let last = VA + u32::try_from(LEAF_SIZE - 1).unwrap();
        let m = pmap.probe(&ram, last).unwrap();
        assert_eq!(m.pa, PA + (LEAF_SIZE - 1));
        assert!(!m.writable);
        assert!(m.user);
        assert_eq!(pmap.translate(&ram, last), Some(m.pa));
        assert_eq!(pmap.probe(&ram, VA + u32::try_from(LEAF_SIZE).unwrap()), None);
    }
}
