//! # Physical ↔ Virtual Translation
//!
//! The manager computes physical frame numbers but can only touch memory
//! through virtual addresses. Both directions are plain affine offsets:
//!
//! * Kernel: every physical address `pa` is mapped at `HHDM_BASE + pa`
//!   ([`HhdmPhysMapper`]).
//! * Tests: a heap buffer stands in for a chosen physical range
//!   ([`OffsetPhysMapper`]).

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Fixed-offset address translation.
pub trait PhysMapper {
    /// Virtual address at which `pa` is visible.
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress;

    /// Physical address backing `va`.
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress;
}

/// Translation through the higher-half direct map.
///
/// The HHDM must be present and cover every address translated.
#[derive(Debug, Copy, Clone, Default)]
pub struct HhdmPhysMapper;

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        OffsetPhysMapper::new(HHDM_BASE).phys_to_virt(pa)
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        OffsetPhysMapper::new(HHDM_BASE).virt_to_phys(va)
    }
}

/// Translation by an arbitrary constant: `va = pa + offset` (mod 2^64).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Mapper under which `va` is the virtual alias of `pa`.
    #[must_use]
    pub const fn aliasing(va: VirtualAddress, pa: PhysicalAddress) -> Self {
        Self::new(va.as_u64().wrapping_sub(pa.as_u64()))
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    #[inline]
    fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(pa.as_u64().wrapping_add(self.offset))
    }

    #[inline]
    fn virt_to_phys(&self, va: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(va.as_u64().wrapping_sub(self.offset))
    }
}
