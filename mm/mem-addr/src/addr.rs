//! Address and frame-number newtypes.

use crate::layout::{FRAME_SHIFT, FRAME_SIZE, LEAF_SIZE};
use core::fmt;
use core::ops::Add;

/// A **physical** memory address (machine bus address).
///
/// `u64` because PAE physical addresses exceed the 32-bit virtual space.
/// No alignment guarantees by itself.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysAddr(u64);

/// A 32-bit **virtual** address.
///
/// Newtype over `u32` to prevent mixing with physical addresses.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtAddr(u32);

/// A **physical frame number**: a physical address divided by the 4 KiB
/// frame size. Indexes the frame database.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pfn(u32);

/// Either address kind as a plain integer; used only for diagnostics.
pub type MemoryAddress = u64;

impl PhysAddr {
    #[must_use]
    pub const fn from_u64(addr: u64) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Offset of this address within its 4 KiB frame.
    #[must_use]
    pub const fn frame_offset(self) -> u64 {
        self.0 & (FRAME_SIZE - 1)
    }

    /// Offset of this address within its 2 MiB leaf.
    #[must_use]
    pub const fn leaf_offset(self) -> u64 {
        self.0 & (LEAF_SIZE - 1)
    }

    /// Base of the 2 MiB leaf containing this address.
    #[must_use]
    pub const fn leaf_base(self) -> Self {
        Self(self.0 & !(LEAF_SIZE - 1))
    }

    #[must_use]
    pub const fn is_aligned_to(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl VirtAddr {
    #[must_use]
    pub const fn from_u32(addr: u32) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// PDPT index (bits 31..30): one of the four root entries.
    #[must_use]
    pub const fn pdpt_index(self) -> usize {
        (self.0 >> 30) as usize
    }

    /// Page-directory index (bits 29..21).
    #[must_use]
    pub const fn pd_index(self) -> usize {
        ((self.0 >> 21) & 0x1ff) as usize
    }

    /// Page-table index (bits 20..12); meaningful only inside the fixed
    /// 4 KiB linear-map window.
    #[must_use]
    pub const fn pt_index(self) -> usize {
        ((self.0 >> 12) & 0x1ff) as usize
    }

    /// Offset within the 4 KiB page (bits 11..0).
    #[must_use]
    pub const fn page_offset(self) -> u32 {
        self.0 & 0xfff
    }

    /// Offset within the 2 MiB leaf (bits 20..0).
    #[must_use]
    pub const fn leaf_offset(self) -> u32 {
        self.0 & ((LEAF_SIZE as u32) - 1)
    }

    /// Base of the 2 MiB leaf containing this address.
    #[must_use]
    pub const fn leaf_base(self) -> Self {
        Self(self.0 & !((LEAF_SIZE as u32) - 1))
    }

    #[must_use]
    pub const fn is_aligned_to(self, align: u32) -> bool {
        self.0 & (align - 1) == 0
    }

    /// `self + rhs`, or `None` on 32-bit overflow.
    #[must_use]
    pub const fn checked_add(self, rhs: u32) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl Pfn {
    #[must_use]
    pub const fn new(pfn: u32) -> Self {
        Self(pfn)
    }

    /// Frame containing the given physical address.
    #[must_use]
    pub const fn containing(pa: PhysAddr) -> Self {
        Self((pa.as_u64() >> FRAME_SHIFT) as u32)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Physical base address of this frame.
    #[must_use]
    pub const fn base(self) -> PhysAddr {
        PhysAddr::from_u64((self.0 as u64) << FRAME_SHIFT)
    }
}

impl Add<u64> for PhysAddr {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0.checked_add(rhs).expect("PhysAddr add"))
    }
}

impl Add<u32> for VirtAddr {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0.checked_add(rhs).expect("VirtAddr add"))
    }
}

impl Add<u32> for Pfn {
    type Output = Self;

    fn add(self, rhs: u32) -> Self {
        Self(self.0.checked_add(rhs).expect("Pfn add"))
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x}", self.0)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:012x} (phys)", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x} (virt)", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {}", self.0)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pfn {} ({})", self.0, self.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pfn_round_trip() {
        let pa = PhysAddr::from_u64(0x0001_2345_6789);
        let pfn = Pfn::containing(pa);
        assert_eq!(pfn.base().as_u64(), 0x0001_2345_6000);
        assert_eq!(pa.frame_offset(), 0x789);
    }

    #[test]
    fn virt_indices() {
        // 0xC1234567: PDPT 3, PD (0x01234567 >> 21) = 9, PT 0x34, offset 0x567.
        let va = VirtAddr::from_u32(0xC123_4567);
        assert_eq!(va.pdpt_index(), 3);
        assert_eq!(va.pd_index(), 9);
        assert_eq!(va.pt_index(), 0x34);
        assert_eq!(va.page_offset(), 0x567);
        assert_eq!(va.leaf_offset(), 0x0123_4567 & 0x1f_ffff);
    }

    #[test]
    fn leaf_base_masks_low_bits() {
        let va = VirtAddr::from_u32(0x0030_1234);
        assert_eq!(va.leaf_base().as_u32(), 0x0020_0000);
        let pa = PhysAddr::from_u64(0x0070_8000);
        assert_eq!(pa.leaf_base().as_u64(), 0x0060_0000);
    }
}
