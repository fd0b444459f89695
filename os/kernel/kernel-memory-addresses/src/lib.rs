//! # Physical and Virtual Memory Address Types
//!
//! Strongly typed wrappers for raw memory addresses used by the early-boot
//! memory code.
//!
//! ## Overview
//!
//! Boot-time memory management constantly converts between three kinds of
//! numbers: physical addresses reported by firmware, virtual addresses the
//! kernel can dereference, and frame numbers used as table indices. Mixing the
//! first two up goes unnoticed until something is dereferenced, so they get
//! distinct types:
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 64-bit address, either physical or virtual. |
//! | [`PhysicalAddress`] | Physical memory (RAM, firmware regions, MMIO). |
//! | [`VirtualAddress`] | An address in the current (direct-mapped) address space. |
//!
//! ## Page Sizes
//!
//! The three x86-64 page sizes are modelled as marker types implementing
//! [`PageSize`]:
//!
//! - [`Size4K`]: 4 KiB pages (metadata placement granularity)
//! - [`Size2M`]: 2 MiB huge pages (the allocation unit of the frame manager)
//! - [`Size1G`]: 1 GiB giant pages
//!
//! [`PageSizeClass`] is the runtime mirror of the markers and is what gets
//! stored in per-frame metadata.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0030_1234);
//! assert_eq!(pa.align_down::<Size2M>().as_u64(), 0x0020_0000);
//! assert_eq!(pa.align_up::<Size2M>().as_u64(), 0x0040_0000);
//! assert!(!pa.is_aligned::<Size4K>());
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` over `u64` and implement `Copy`,
//!   `Eq`, `Ord` and `Hash`.
//! - All alignment helpers are `const fn`.
//! - The page size is a type parameter of the helpers instead of a runtime
//!   argument, so every alignment in the memory code names its granularity.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page_size::{PageSize, PageSizeClass, Size1G, Size2M, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` on overflow.
#[inline]
#[must_use]
pub const fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    let mask = align - 1;
    match value.checked_add(mask) {
        Some(v) => Some(v & !mask),
        None => None,
    }
}

/// Round `value` down to a multiple of `align` (a power of two).
#[inline]
#[must_use]
pub const fn align_down(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
    value & !(align - 1)
}

/// Round `value` up to the next multiple of `align` (a power of two).
///
/// # Panics
/// Panics if the rounded value does not fit in a `u64`.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> u64 {
    match checked_align_up(value, align) {
        Some(v) => v,
        None => panic!("align_up overflow"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_alignment() {
        assert_eq!(align_down(23, 8), 16);
        assert_eq!(align_down(24, 8), 24);
        assert_eq!(align_up(23, 8), 24);
        assert_eq!(align_up(24, 8), 24);
        assert_eq!(align_up(25, 8), 32);
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(checked_align_up(u64::MAX, 4096), None);
        assert_eq!(checked_align_up(u64::MAX - 4095, 4096), Some(u64::MAX - 4095));
    }

    #[test]
    fn alignment_helpers_2m() {
        let a = PhysicalAddress::new(0x0000_0008_1234_5678);
        assert_eq!(a.align_down::<Size2M>().as_u64(), 0x0000_0008_1220_0000);
        assert_eq!(a.align_up::<Size2M>().as_u64(), 0x0000_0008_1240_0000);
        assert!(a.align_up::<Size2M>().is_aligned::<Size2M>());

        let exact = PhysicalAddress::new(16 * 1024 * 1024);
        assert_eq!(exact.align_up::<Size2M>(), exact);
        assert_eq!(exact.align_down::<Size2M>(), exact);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xFFFF_8000_0010_1234);
        assert_eq!(va.align_down::<Size4K>().as_u64(), 0xFFFF_8000_0010_1000);
        assert_eq!(va.align_up::<Size4K>().as_u64(), 0xFFFF_8000_0010_2000);

        let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
        assert_eq!(pa.align_down::<Size1G>().as_u64(), 0x0000_0010_0000_0000);
        assert_eq!(pa - PhysicalAddress::new(0x0000_0010_2000_0000), 0x42);
    }

    #[test]
    fn page_size_classes_follow_markers() {
        assert_eq!(Size4K::CLASS, PageSizeClass::Size4K);
        assert_eq!(Size2M::CLASS, PageSizeClass::Size2M);
        assert_eq!(Size1G::CLASS, PageSizeClass::Size1G);
        assert_eq!(PageSizeClass::Size2M.size(), Size2M::SIZE);
        assert_eq!(1_u64 << Size2M::SHIFT, Size2M::SIZE);
    }
}
