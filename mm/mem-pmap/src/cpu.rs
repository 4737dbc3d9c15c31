//! CPU identities, CPU sets, and the platform flush seam.

use core::fmt;
use mem_addr::layout::MAX_CPUS;
use mem_addr::VirtAddr;

/// Identifies one CPU; always below [`MAX_CPUS`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CpuId(u8);

impl CpuId {
    #[must_use]
    pub const fn new(id: usize) -> Self {
        assert!(id < MAX_CPUS, "CPU id out of range");
        Self(id as u8)
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu{}", self.0)
    }
}

impl fmt::Debug for CpuId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A set of CPUs, one bit per [`CpuId`].
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct CpuMask(u32);

impl CpuMask {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, cpu: CpuId) -> bool {
        self.0 & (1 << cpu.index()) != 0
    }

    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub const fn insert(&mut self, cpu: CpuId) {
        self.0 |= 1 << cpu.index();
    }

    pub const fn remove(&mut self, cpu: CpuId) {
        self.0 &= !(1 << cpu.index());
    }

    /// The member CPUs in ascending id order.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter_map(move |i| self.contains(CpuId::new(i)).then(|| CpuId::new(i)))
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpus[{:#010x}]", self.0)
    }
}

/// What the platform layer does on behalf of the memory manager.
///
/// The implementation lives with the interrupt and register code: reading
/// the local APIC id, `invlpg`/CR3 and CR4.PGE games for invalidation, and
/// the shootdown IPI. [`flush_tlbs`](Self::flush_tlbs) **blocks** until
/// every target CPU has acknowledged its invalidation; the memory manager
/// relies on that for its consistency guarantee and the platform is
/// responsible for the liveness of the handshake (targets must take the
/// IPI promptly).
pub trait CpuOps {
    /// The CPU this code is running on.
    fn current(&self) -> CpuId;

    /// Invalidate this CPU's whole TLB; with `include_global`, global
    /// entries too.
    fn invalidate_local(&self, include_global: bool);

    /// Invalidate this CPU's cached translation for the single 4 KiB page
    /// at `va`. Used only for hyperspace window pages.
    fn invalidate_local_page(&self, va: VirtAddr);

    /// Make every CPU in `targets` invalidate, and return only once all of
    /// them have. The current CPU may or may not be in `targets`.
    fn flush_tlbs(&self, targets: CpuMask, include_global: bool);
}
