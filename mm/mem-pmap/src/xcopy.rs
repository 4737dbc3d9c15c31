//! Cross-domain copy through the per-CPU hyperspace window.
//!
//! To read or write pages of an address space that is not loaded anywhere,
//! the kernel briefly maps the target frame into its own space at a fixed
//! per-CPU window address, touches the bytes, and unmaps. The window slot
//! is a 4 KiB linear-map entry, so each step moves at most one page; copies
//! are chunked at page boundaries of the *foreign* address.
//!
//! Window mappings follow the normal flush rules, which collapse nicely
//! here: opening a window replaces an absent entry (no flush), closing it
//! replaces a present non-global one (a single local page invalidation).
//! No cross-CPU traffic ever, because each CPU only touches its own slot.
//!
//! Byte access to the window's backing frame goes through [`PhysAccess`]
//! like every other physical touch in this subsystem.

use crate::cpu::{CpuId, CpuOps};
use crate::pmap::{MapError, Pmap};
use mem_addr::layout::{FRAME_SIZE, HYPERSPACE_BASE};
use mem_addr::{Pfn, PhysAddr, VirtAddr};
use mem_paging::{L1e, LinearTable, PhysAccess, Prot, PtableSource};

/// A foreign access faulted. The copy stops where it was; bytes already
/// moved stay moved.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum CopyFault {
    #[error("foreign address {0} is not mapped")]
    NotMapped(VirtAddr),
    #[error("foreign address {0} is not writable")]
    ReadOnly(VirtAddr),
}

/// The per-CPU window region: one linear-map table linked into the kernel
/// address space at the reserved top-of-space slot, one 4 KiB page per CPU.
pub struct Hyperspace {
    pt: PhysAddr,
    base: VirtAddr,
}

impl Hyperspace {
    /// Allocate the window table and link it into `kernel` at
    /// [`HYPERSPACE_BASE`]. Done once at boot, before the first copy.
    ///
    /// # Errors
    /// [`MapError::OutOfTables`] on frame exhaustion.
    pub fn install<A, P>(kernel: &Pmap, tables: &mut A, phys: &P) -> Result<Self, MapError>
    where
        A: PtableSource,
        P: PhysAccess,
    {
        let frame = tables.alloc_table().ok_or(MapError::OutOfTables)?;
        unsafe { phys.phys_to_mut::<LinearTable>(frame.base()) }.reset();
        kernel.link_table(tables, phys, HYPERSPACE_BASE, frame.base())?;
        log::debug!("hyperspace: window table at {}", frame.base());
        Ok(Self {
            pt: frame.base(),
            base: HYPERSPACE_BASE,
        })
    }

    /// The window page owned by `cpu`.
    #[must_use]
    pub fn window_va(&self, cpu: CpuId) -> VirtAddr {
        self.base + (cpu.index() as u32) * (FRAME_SIZE as u32)
    }

    /// Map `frame` at the current CPU's window. The returned guard unmaps
    /// on drop; at most one window per CPU is open at a time.
    fn map_foreign<'a, P, C>(&'a self, phys: &'a P, cpus: &'a C, frame: Pfn) -> Window<'a, P, C>
    where
        P: PhysAccess,
        C: CpuOps,
    {
        let va = self.window_va(cpus.current());
        let pt = unsafe { phys.phys_to_mut::<LinearTable>(self.pt) };
        debug_assert!(
            !pt.get(va.pt_index()).present(),
            "window at {va} already open"
        );
        // Replacing an absent entry: nothing can be cached, no flush.
        pt.set(va.pt_index(), L1e::page(frame.base(), Prot::KERNEL_WRITABLE));
        Window {
            hs: self,
            phys,
            cpus,
            va,
            frame,
        }
    }
}

/// An open window; unmaps and invalidates on drop.
struct Window<'a, P: PhysAccess, C: CpuOps> {
    hs: &'a Hyperspace,
    phys: &'a P,
    cpus: &'a C,
    va: VirtAddr,
    frame: Pfn,
}

impl<P: PhysAccess, C: CpuOps> Window<'_, P, C> {
    fn bytes(&self, offset: u32, len: usize) -> &[u8] {
        unsafe { self.phys.phys_bytes(self.frame.base() + u64::from(offset), len) }
    }

    fn bytes_mut(&mut self, offset: u32, len: usize) -> &mut [u8] {
        unsafe {
            self.phys
                .phys_bytes_mut(self.frame.base() + u64::from(offset), len)
        }
    }
}

impl<P: PhysAccess, C: CpuOps> Drop for Window<'_, P, C> {
    fn drop(&mut self) {
        let pt = unsafe { self.phys.phys_to_mut::<LinearTable>(self.hs.pt) };
        pt.set(self.va.pt_index(), L1e::ZERO);
        // Present and never global: a local single-page flush suffices.
        self.cpus.invalidate_local_page(self.va);
    }
}

/// Largest step starting at `va` with `remaining` bytes to move: runs to
/// the end of the buffer or of the current foreign page, whichever is
/// closer.
fn chunk_len(va: VirtAddr, remaining: usize) -> usize {
    remaining.min((FRAME_SIZE - u64::from(va.page_offset())) as usize)
}

/// Read `dst.len()` bytes from `src` in the `foreign` address space.
///
/// The borrow of `foreign` keeps it alive for the duration; it does not
/// need to be resident anywhere.
///
/// # Errors
/// [`CopyFault::NotMapped`] at the first unmapped foreign page. Earlier
/// chunks have already been copied into `dst`.
pub fn copy_from_foreign<P, C>(
    hs: &Hyperspace,
    phys: &P,
    cpus: &C,
    foreign: &Pmap,
    mut src: VirtAddr,
    dst: &mut [u8],
) -> Result<(), CopyFault>
where
    P: PhysAccess,
    C: CpuOps,
{
    let mut done = 0;
    while done < dst.len() {
        let chunk = chunk_len(src, dst.len() - done);
        let mapping = foreign
            .probe(phys, src)
            .ok_or(CopyFault::NotMapped(src))?;

        let window = hs.map_foreign(phys, cpus, Pfn::containing(mapping.pa));
        dst[done..done + chunk].copy_from_slice(window.bytes(src.page_offset(), chunk));
        drop(window);

        done += chunk;
        if done < dst.len() {
            src = src + chunk as u32;
        }
    }
    Ok(())
}

/// Write `src` to `dst` in the `foreign` address space.
///
/// # Errors
/// [`CopyFault::NotMapped`] or [`CopyFault::ReadOnly`] at the first
/// foreign page that cannot take the write. Earlier chunks have already
/// landed; there is no rollback.
pub fn copy_to_foreign<P, C>(
    hs: &Hyperspace,
    phys: &P,
    cpus: &C,
    foreign: &Pmap,
    mut dst: VirtAddr,
    src: &[u8],
) -> Result<(), CopyFault>
where
    P: PhysAccess,
    C: CpuOps,
{
    let mut done = 0;
    while done < src.len() {
        let chunk = chunk_len(dst, src.len() - done);
        let mapping = foreign
            .probe(phys, dst)
            .ok_or(CopyFault::NotMapped(dst))?;
        if !mapping.writable {
            return Err(CopyFault::ReadOnly(dst));
        }

        let mut window = hs.map_foreign(phys, cpus, Pfn::containing(mapping.pa));
        window
            .bytes_mut(dst.page_offset(), chunk)
            .copy_from_slice(&src[done..done + chunk]);
        drop(window);

        done += chunk;
        if done < src.len() {
            dst = dst + chunk as u32;
        }
    }
    Ok(())
}
