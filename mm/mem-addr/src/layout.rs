//! Fixed layout constants.
//!
//! These are compile-time facts about the machine model, not tunables: the
//! frame and leaf sizes come from the PAE format, the tier ceilings from the
//! kernel's linear-map window, and the hyperspace base from the reserved
//! slot at the top of the 32-bit space.

use crate::{PhysAddr, VirtAddr};

/// Size of one physical frame in bytes (4 KiB).
pub const FRAME_SIZE: u64 = 4096;

/// `log2(FRAME_SIZE)`; a PFN is a physical address shifted right by this.
pub const FRAME_SHIFT: u32 = 12;

/// Size of one leaf mapping in bytes (2 MiB). All mappings outside the
/// fixed linear-map window use this granularity.
pub const LEAF_SIZE: u64 = 2 * 1024 * 1024;

/// `log2(LEAF_SIZE)`.
pub const LEAF_SHIFT: u32 = 21;

/// Frames covered by one 2 MiB leaf.
pub const FRAMES_PER_LEAF: u32 = (LEAF_SIZE / FRAME_SIZE) as u32;

/// Exclusive ceiling of low kernel memory: legacy-addressable structures
/// (ISA DMA and friends) must come from below this.
pub const LOKERN_TOP: PhysAddr = PhysAddr::from_u64(16 * 1024 * 1024);

/// Exclusive ceiling of ordinary kernel memory: the part of physical memory
/// the kernel keeps permanently linear-mapped.
pub const KERN_TOP: PhysAddr = PhysAddr::from_u64(896 * 1024 * 1024);

/// Base of the per-CPU hyperspace window region, one 2 MiB slot at the top
/// of the virtual space. Each CPU owns one 4 KiB window page inside it.
pub const HYPERSPACE_BASE: VirtAddr = VirtAddr::from_u32(0xFFC0_0000);

/// Upper bound on CPUs the kernel supports; sizes CPU masks and the
/// hyperspace window table.
pub const MAX_CPUS: usize = 32;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hyperspace_is_leaf_aligned_and_holds_all_cpus() {
        assert_eq!(u64::from(HYPERSPACE_BASE.as_u32()) % LEAF_SIZE, 0);
        // One 4 KiB window per CPU must fit in a single 2 MiB slot.
        assert!((MAX_CPUS as u64) * FRAME_SIZE <= LEAF_SIZE);
    }

    #[test]
    fn tiers_nest() {
        assert!(LOKERN_TOP.as_u64() < KERN_TOP.as_u64());
    }
}
