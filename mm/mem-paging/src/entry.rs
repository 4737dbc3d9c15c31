//! Hardware entry words and protection-flag sets.

use bitfield_struct::bitfield;
use mem_addr::layout::{FRAME_SIZE, LEAF_SIZE};
use mem_addr::PhysAddr;

/// Physical-address field of a non-leaf entry (bits 51:12, 4 KiB aligned).
const TABLE_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

bitflags::bitflags! {
    /// Protection-flag combinations for leaf entries.
    ///
    /// The raw bits line up with the hardware positions so builders can
    /// transfer them verbatim. Callers use the named sets; the individual
    /// bits exist for composing the `GLOBAL` modifier onto a set.
    #[derive(Copy, Clone, Eq, PartialEq, Debug)]
    pub struct Prot: u64 {
        const PRESENT    = 1 << 0;
        const WRITABLE   = 1 << 1;
        const USER       = 1 << 2;
        const ACCESSED   = 1 << 5;
        const DIRTY      = 1 << 6;
        /// Keep the translation across address-space switches. Changing a
        /// mapping that carries this bit forces a cross-CPU flush.
        const GLOBAL     = 1 << 8;
        const NO_EXECUTE = 1 << 63;

        /// Supervisor read-only data.
        const KERNEL          = Self::PRESENT.bits() | Self::NO_EXECUTE.bits();
        /// Supervisor executable (text).
        const KERNEL_EXEC     = Self::PRESENT.bits();
        /// Supervisor read-write data. A and D are pre-set so the CPU never
        /// write-faults just to record them.
        const KERNEL_WRITABLE = Self::PRESENT.bits()
            | Self::WRITABLE.bits()
            | Self::ACCESSED.bits()
            | Self::DIRTY.bits()
            | Self::NO_EXECUTE.bits();
        /// User read-only data.
        const USER_RO       = Self::KERNEL.bits() | Self::USER.bits();
        /// User executable.
        const USER_EXEC     = Self::KERNEL_EXEC.bits() | Self::USER.bits();
        /// User read-write data.
        const USER_WRITABLE = Self::KERNEL_WRITABLE.bits() | Self::USER.bits();
    }
}

/// L2 page-directory entry, **2 MiB leaf** layout (`PS = 1`).
///
/// The same slot can instead hold a pointer to a [`crate::LinearTable`]
/// (`PS = 0`, address in bits 51:12); that form is built and read through
/// [`L2e::table`] / [`L2e::next_table`] because its address field does not
/// line up with the leaf's.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct L2e {
    /// Present (bit 0): the entry translates.
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User-accessible (bit 2); clear means supervisor-only.
    pub user: bool,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5), set by the CPU on first use.
    pub accessed: bool,
    /// Dirty (bit 6), set by the CPU on first write. Leaf-only.
    pub dirty: bool,
    /// Page size (bit 7). Set on every 2 MiB leaf; clear marks the
    /// linear-map table pointer form.
    pub page_size: bool,
    /// Global (bit 8): survives CR3 reloads.
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub avl: u8,
    /// PAT selector; the 2 MiB leaf form moves it to bit 12.
    pub pat: bool,
    /// Reserved, must be zero (bits 13..20).
    #[bits(8)]
    __mbz: u8,
    /// Leaf physical base, 2 MiB aligned (bits 21..51).
    #[bits(31)]
    frame_51_21: u32,
    /// Ignored by hardware (bits 52..62).
    #[bits(11)]
    __ignored: u16,
    /// No-execute (bit 63, requires EFER.NXE).
    pub no_execute: bool,
}

/// What an L2 slot currently holds.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum L2Kind {
    /// A 2 MiB leaf mapping with its physical base.
    Leaf(PhysAddr),
    /// A pointer to a 4 KiB-entry linear-map table.
    Table(PhysAddr),
}

impl L2e {
    /// The cleared entry; installing it removes the translation.
    pub const ZERO: Self = Self::from_bits(0);

    /// Build a 2 MiB leaf for `base` with `prot`.
    #[must_use]
    pub fn leaf(base: PhysAddr, prot: Prot) -> Self {
        debug_assert!(base.is_aligned_to(LEAF_SIZE), "leaf base not 2 MiB aligned");
        Self::from_bits(prot.bits())
            .with_page_size(true)
            .with_frame_51_21((base.as_u64() >> 21) as u32)
    }

    /// Build a non-leaf pointer to the linear-map table at `pt`.
    ///
    /// Non-leaf entries are created present and writable; the leaf below
    /// decides the effective permissions.
    #[must_use]
    pub fn table(pt: PhysAddr) -> Self {
        debug_assert!(pt.is_aligned_to(FRAME_SIZE), "table frame not aligned");
        Self::from_bits((pt.as_u64() & TABLE_ADDR_MASK) | 0b11).with_accessed(true)
    }

    /// Physical base of the 2 MiB leaf. Meaningless if `PS = 0`.
    #[must_use]
    pub const fn leaf_base(self) -> PhysAddr {
        PhysAddr::from_u64((self.frame_51_21() as u64) << 21)
    }

    /// Address of the next-level table if this is a present non-leaf.
    #[must_use]
    pub fn next_table(self) -> Option<PhysAddr> {
        (self.present() && !self.page_size())
            .then(|| PhysAddr::from_u64(self.into_bits() & TABLE_ADDR_MASK))
    }

    /// Classify a present entry; `None` when not present.
    #[must_use]
    pub fn kind(self) -> Option<L2Kind> {
        if !self.present() {
            return None;
        }
        Some(if self.page_size() {
            L2Kind::Leaf(self.leaf_base())
        } else {
            L2Kind::Table(PhysAddr::from_u64(self.into_bits() & TABLE_ADDR_MASK))
        })
    }
}

/// L1 entry: a 4 KiB page inside the fixed linear-map window.
///
/// This is the only place 4 KiB mappings exist; everything else is 2 MiB
/// leaves. Bit 7 is PAT in this form, not PS.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct L1e {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1).
    pub writable: bool,
    /// User-accessible (bit 2).
    pub user: bool,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Dirty (bit 6).
    pub dirty: bool,
    /// PAT selector (bit 7).
    pub pat: bool,
    /// Global (bit 8).
    pub global: bool,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub avl: u8,
    /// Page physical base, 4 KiB aligned (bits 12..51).
    #[bits(40)]
    frame_51_12: u64,
    /// Ignored by hardware (bits 52..62).
    #[bits(11)]
    __ignored: u16,
    /// No-execute (bit 63).
    pub no_execute: bool,
}

impl L1e {
    pub const ZERO: Self = Self::from_bits(0);

    /// Build a 4 KiB mapping of `base` with `prot`.
    #[must_use]
    pub fn page(base: PhysAddr, prot: Prot) -> Self {
        debug_assert!(base.is_aligned_to(FRAME_SIZE), "page base not aligned");
        Self::from_bits(prot.bits()).with_frame_51_12(base.as_u64() >> 12)
    }

    /// Physical base of the mapped page.
    #[must_use]
    pub const fn page_base(self) -> PhysAddr {
        PhysAddr::from_u64(self.frame_51_12() << 12)
    }
}

/// PAE root entry: one of four, pointing at a page directory.
///
/// PAE root entries have no Writable/User/NX; those bit positions are
/// reserved and the CPU faults on a set reserved bit, so the builders here
/// can only produce the shape hardware accepts.
#[bitfield(u64)]
#[derive(Eq, PartialEq)]
pub struct Pdpte {
    /// Present (bit 0).
    pub present: bool,
    /// Reserved, must be zero (bits 1..2); no W/U at this level.
    #[bits(2)]
    __mbz_low: u8,
    /// Write-through caching (bit 3).
    pub write_through: bool,
    /// Cache disable (bit 4).
    pub cache_disable: bool,
    /// Reserved, must be zero (bits 5..8).
    #[bits(4)]
    __mbz_mid: u8,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub avl: u8,
    /// Page-directory base, 4 KiB aligned (bits 12..51).
    #[bits(40)]
    table_51_12: u64,
    /// Reserved, must be zero (bits 52..63).
    #[bits(12)]
    __mbz_high: u16,
}

impl Pdpte {
    pub const ZERO: Self = Self::from_bits(0);

    /// Build a present root entry pointing at the page directory `pd`.
    #[must_use]
    pub fn table(pd: PhysAddr) -> Self {
        debug_assert!(pd.is_aligned_to(FRAME_SIZE), "page directory not aligned");
        Self::new()
            .with_present(true)
            .with_table_51_12(pd.as_u64() >> 12)
    }

    /// Address of the page directory if present.
    #[must_use]
    pub fn pd_base(self) -> Option<PhysAddr> {
        self.present()
            .then(|| PhysAddr::from_u64(self.table_51_12() << 12))
    }
}
