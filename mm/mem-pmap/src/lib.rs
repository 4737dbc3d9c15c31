//! # Address Spaces and TLB Consistency
//!
//! One [`Pmap`] per protection domain: the PAE root table, the leaf
//! install/clear path, and the bookkeeping that keeps every CPU's TLB
//! honest as mappings change.
//!
//! ## Flush discipline
//!
//! Every leaf write consults [`mem_paging::flush_class`] with the old and
//! new entry. `Local` flushes are paid immediately on the issuing CPU;
//! `Global` ones are batched into the pmap's dirty flag and paid by
//! [`Pmap::commit`] as a single blocking broadcast to the CPUs the space is
//! resident on, so callers making several changes pay the expensive
//! cross-CPU invalidation once.
//!
//! ## Hyperspace
//!
//! [`Hyperspace`] is the reserved per-CPU window through which
//! [`copy_from_foreign`]/[`copy_to_foreign`] reach pages of an address
//! space that is not active anywhere. The window's own mappings are
//! ordinary page-table writes and follow the same flush discipline.
//!
//! All hardware contact (current CPU, local invalidation, the IPI
//! broadcast-and-wait) goes through the [`CpuOps`] seam the platform layer
//! implements; this crate contains no interrupt or register mechanics.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod cpu;
mod pmap;
mod xcopy;

pub use cpu::{CpuId, CpuMask, CpuOps};
pub use pmap::{MapError, Mapping, Pmap};
pub use xcopy::{copy_from_foreign, copy_to_foreign, CopyFault, Hyperspace};

#[cfg(test)]
pub(crate) mod testutil {
    //! Simulated physical RAM and a recording CPU stub.

    use crate::cpu::{CpuId, CpuMask, CpuOps};
    use core::cell::{Cell, RefCell, UnsafeCell};
    use mem_addr::{PhysAddr, VirtAddr};
    use mem_paging::PhysAccess;

    /// A 4 KiB-aligned frame of simulated RAM. The bytes sit in an
    /// `UnsafeCell` so writing through a pointer obtained from `&self` is
    /// sound; exclusivity is the test author's job, exactly as it is for
    /// the kernel's own linear map.
    #[repr(align(4096))]
    struct Frame(UnsafeCell<[u8; 4096]>);

    /// Fake physical memory: frame `i` lives at physical address
    /// `i * 4096`.
    pub struct TestRam {
        frames: Vec<Box<Frame>>,
    }

    impl TestRam {
        pub fn new(frames: usize) -> Self {
            Self {
                frames: (0..frames)
                    .map(|_| Box::new(Frame(UnsafeCell::new([0; 4096]))))
                    .collect(),
            }
        }

        fn frame_ptr(&self, pa: PhysAddr) -> *mut u8 {
            let idx = (pa.as_u64() >> 12) as usize;
            let off = pa.frame_offset() as usize;
            assert!(idx < self.frames.len(), "test RAM access out of range");
            unsafe { self.frames[idx].0.get().cast::<u8>().add(off) }
        }
    }

    impl PhysAccess for TestRam {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysAddr) -> &'a mut T {
            assert_eq!(pa.frame_offset(), 0, "typed access must be frame-aligned");
            unsafe { &mut *self.frame_ptr(pa).cast::<T>() }
        }

        unsafe fn phys_bytes<'a>(&self, pa: PhysAddr, len: usize) -> &'a [u8] {
            assert!(pa.frame_offset() as usize + len <= 4096, "crosses a frame");
            unsafe { core::slice::from_raw_parts(self.frame_ptr(pa), len) }
        }

        unsafe fn phys_bytes_mut<'a>(&self, pa: PhysAddr, len: usize) -> &'a mut [u8] {
            assert!(pa.frame_offset() as usize + len <= 4096, "crosses a frame");
            unsafe { core::slice::from_raw_parts_mut(self.frame_ptr(pa), len) }
        }
    }

    /// Everything the platform seam was asked to do, in order.
    #[derive(Debug, Eq, PartialEq)]
    pub enum FlushEvent {
        Local { include_global: bool },
        LocalPage(VirtAddr),
        Broadcast { targets: CpuMask, include_global: bool },
    }

    /// CPU stub: a settable "current CPU" and a log of flush calls.
    pub struct TestCpus {
        pub current: Cell<CpuId>,
        pub log: RefCell<Vec<FlushEvent>>,
    }

    impl TestCpus {
        pub fn new() -> Self {
            Self {
                current: Cell::new(CpuId::new(0)),
                log: RefCell::new(Vec::new()),
            }
        }

        pub fn take_log(&self) -> Vec<FlushEvent> {
            self.log.take()
        }
    }

    impl CpuOps for TestCpus {
        fn current(&self) -> CpuId {
            self.current.get()
        }

        fn invalidate_local(&self, include_global: bool) {
            self.log
                .borrow_mut()
                .push(FlushEvent::Local { include_global });
        }

        fn invalidate_local_page(&self, va: VirtAddr) {
            self.log.borrow_mut().push(FlushEvent::LocalPage(va));
        }

        fn flush_tlbs(&self, targets: CpuMask, include_global: bool) {
            self.log.borrow_mut().push(FlushEvent::Broadcast {
                targets,
                include_global,
            });
        }
    }

    mod tests {
        use super::TestRam;
        use mem_addr::PhysAddr;
        use mem_paging::PhysAccess;

        #[test]
        fn simulated_ram_round_trips_writes() {
            let ram = TestRam::new(2);
            let pa = PhysAddr::from_u64(0x1ff0);
            unsafe { ram.phys_bytes_mut(pa, 4) }.copy_from_slice(&[1, 2, 3, 4]);
            assert_eq!(unsafe { ram.phys_bytes(pa, 4) }, &[1, 2, 3, 4]);
            // A fresh frame is still zeroed.
            assert_eq!(unsafe { ram.phys_bytes(PhysAddr::from_u64(0), 4) }, &[0; 4]);
        }
    }
}
